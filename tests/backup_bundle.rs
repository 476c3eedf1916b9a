#[path = "../src/backup.rs"]
mod backup;
#[path = "../src/db.rs"]
mod db;

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("gradebook-backup-src");
    let workspace2 = temp_dir("gradebook-backup-dst");
    let out_dir = temp_dir("gradebook-backup-out");

    let db_src = workspace.join("gradebook.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.gbbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    archive
        .by_name("db/gradebook.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("gradebook.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_sqlite_import_is_supported() {
    let out_dir = temp_dir("gradebook-backup-bare");
    let workspace = temp_dir("gradebook-backup-bare-dst");

    let bare_file = out_dir.join("copy.sqlite3");
    let bytes = b"bare-sqlite-copy";
    std::fs::write(&bare_file, bytes).expect("write bare sqlite file");

    let import =
        backup::import_workspace_bundle(&bare_file, &workspace).expect("import bare sqlite");
    assert_eq!(import.bundle_format_detected, "bare-sqlite3");

    let restored =
        std::fs::read(workspace.join("gradebook.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn export_without_a_database_fails() {
    let workspace = temp_dir("gradebook-backup-empty");
    let out_dir = temp_dir("gradebook-backup-empty-out");

    let res = backup::export_workspace_bundle(&workspace, &out_dir.join("bundle.zip"));
    assert!(res.is_err());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
