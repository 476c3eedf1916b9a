//! Workspace bundles: a zip with a manifest, the SQLite database, and a
//! small metadata entry. A bare SQLite file is accepted on import so a
//! database copied out of a workspace by hand can still be restored.

use anyhow::{anyhow, bail, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE;

pub const BUNDLE_FORMAT_V1: &str = "gradebook-workspace-v1";

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradebook.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn write_json_entry(
    zip: &mut ZipWriter<File>,
    opts: FileOptions,
    name: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start entry {}", name))?;
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", name))?;
    zip.write_all(text.as_bytes())
        .with_context(|| format!("failed to write entry {}", name))?;
    Ok(())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        bail!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        );
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    write_json_entry(
        &mut zip,
        opts,
        MANIFEST_ENTRY,
        &json!({
            "format": BUNDLE_FORMAT_V1,
            "version": 1,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "exportedAt": exported_at,
        }),
    )?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    write_json_entry(
        &mut zip,
        opts,
        META_WORKSPACE_ENTRY,
        &json!({ "sourceWorkspace": workspace_path.to_string_lossy() }),
    )?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
    })
}

fn read_bundle_format(archive: &mut ZipArchive<File>) -> anyhow::Result<String> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&text).context("manifest.json is invalid JSON")?;
    manifest
        .get("format")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("manifest.json carries no format field"))
}

/// Extract the database into a sibling temp file, then rename over the
/// destination so a failed import never leaves a half-written database.
fn stage_database(archive: &mut ZipArchive<File>, dst: &Path) -> anyhow::Result<()> {
    let tmp: PathBuf = dst.with_extension("sqlite3.importing");
    if tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
    }

    let mut staged = File::create(&tmp)
        .with_context(|| format!("failed to create temp database {}", tmp.to_string_lossy()))?;
    {
        let mut entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
        std::io::copy(&mut entry, &mut staged).context("failed to extract database entry")?;
    }
    staged.flush().context("failed to flush staged database")?;

    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp, dst)
        .with_context(|| format!("failed to move database to {}", dst.to_string_lossy()))?;
    Ok(())
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);

    if !has_zip_signature(in_path)? {
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy bare sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: "bare-sqlite3".to_string(),
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let format = read_bundle_format(&mut archive)?;
    if format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", format);
    }

    stage_database(&mut archive, &dst)?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}

fn has_zip_signature(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(read == 4 && sig == ZIP_MAGIC)
}
