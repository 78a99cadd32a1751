mod backup;
mod config;
mod db;
mod ipc;
mod logging;
mod matrix;
mod store;

use std::io::{self, BufRead, Write};

fn main() {
    let cfg = config::Config::from_env();
    logging::init(&cfg.log_filter);

    let mut state = ipc::AppState::new();
    if let Some(ws) = cfg.workspace.as_ref() {
        if let Err(e) = ipc::open_workspace(&mut state, ws) {
            tracing::error!(workspace = %ws.to_string_lossy(), error = ?e, "startup workspace not opened");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "notesd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparsable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
