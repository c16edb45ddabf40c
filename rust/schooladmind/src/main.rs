mod access;
mod config;
mod db;
mod ipc;
mod tree;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    let config = match config::DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting schooladmind");

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        seed_catalog: config.seed_catalog,
    };

    if let Some(path) = config.workspace.as_ref() {
        match db::open_db(path, config.seed_catalog) {
            Ok(conn) => {
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => warn!(workspace = %path.display(), error = %e, "could not open configured workspace"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "unparseable request line");
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
                );
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

    info!("stdin closed; shutting down");
}
