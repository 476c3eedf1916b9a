mod backup;
mod db;
mod directory;
mod dispatch;
mod ipc;
mod ledger;
mod notify;

use std::io::{self, BufRead, Write};

use serde_json::json;

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let _ = writeln!(stdout, "{}", text);
    let _ = stdout.flush();
}

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    // One JSON request per line, one JSON response per line, until EOF.
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
            }
            Err(e) => {
                // Unparseable line carries no id to echo back.
                write_line(
                    &mut stdout,
                    &json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                );
            }
        }
    }
}
