//! Canvas sync server.
//!
//! Configuration comes from the environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CANVAS_BIND_ADDR` | `127.0.0.1:9090` |
//! | `CANVAS_DATA_DIR` | unset (in-memory only) |
//! | `CANVAS_HEARTBEAT_TIMEOUT_SECS` | `30` |
//! | `CANVAS_SNAPSHOT_INTERVAL` | `100` |
//! | `CANVAS_ARTBOARD_NAME` | `Artboard` (name of newly created artboards) |
//!
//! `RUST_LOG` controls log verbosity.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use canvas_collab::{ServerConfig, SyncServer};
use log::{error, info, warn};

/// Build a server config from `lookup` (normally the process environment).
fn config_from(lookup: impl Fn(&str) -> Option<String>) -> ServerConfig {
    let mut config = ServerConfig::default();

    if let Some(addr) = lookup("CANVAS_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Some(dir) = lookup("CANVAS_DATA_DIR").filter(|d| !d.is_empty()) {
        config.storage_path = Some(PathBuf::from(dir));
    }
    if let Some(secs) = parsed::<u64>(&lookup, "CANVAS_HEARTBEAT_TIMEOUT_SECS") {
        let timeout = Duration::from_secs(secs.max(1));
        // Grace period stays at twice the timeout.
        config.engine.heartbeat_timeout = timeout;
        config.engine.grace_period = timeout * 2;
        config.sweep_interval = config.sweep_interval.min(timeout);
    }
    if let Some(interval) = parsed::<u64>(&lookup, "CANVAS_SNAPSHOT_INTERVAL") {
        config.engine.snapshot_interval = interval.max(1);
    }
    if let Some(name) = lookup("CANVAS_ARTBOARD_NAME").filter(|n| !n.trim().is_empty()) {
        config.engine.default_name = name;
    }
    config
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = config_from(|key| std::env::var(key).ok());
    info!(
        "Starting canvas sync server on {} ({})",
        config.bind_addr,
        match &config.storage_path {
            Some(path) => format!("data in {}", path.display()),
            None => "in-memory".to_string(),
        }
    );

    let server = match SyncServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to open storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    server.shutdown().await;
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        config_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_with(&[]);
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert!(config.storage_path.is_none());
        assert_eq!(config.engine.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.snapshot_interval, 100);
        assert_eq!(config.engine.default_name, "Artboard");
    }

    #[test]
    fn test_environment_overrides() {
        let config = config_with(&[
            ("CANVAS_BIND_ADDR", "0.0.0.0:7000"),
            ("CANVAS_DATA_DIR", "/var/lib/canvas"),
            ("CANVAS_HEARTBEAT_TIMEOUT_SECS", "3"),
            ("CANVAS_SNAPSHOT_INTERVAL", "25"),
            ("CANVAS_ARTBOARD_NAME", "Sketch"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/canvas")));
        assert_eq!(config.engine.heartbeat_timeout, Duration::from_secs(3));
        assert_eq!(config.engine.grace_period, Duration::from_secs(6));
        assert_eq!(config.sweep_interval, Duration::from_secs(3));
        assert_eq!(config.engine.snapshot_interval, 25);
        assert_eq!(config.engine.default_name, "Sketch");
    }

    #[test]
    fn test_bad_numbers_are_ignored() {
        let config = config_with(&[
            ("CANVAS_HEARTBEAT_TIMEOUT_SECS", "soon"),
            ("CANVAS_SNAPSHOT_INTERVAL", "-4"),
            ("CANVAS_DATA_DIR", ""),
            ("CANVAS_ARTBOARD_NAME", "  "),
        ]);
        assert_eq!(config.engine.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.engine.snapshot_interval, 100);
        assert!(config.storage_path.is_none());
        assert_eq!(config.engine.default_name, "Artboard");
    }
}
