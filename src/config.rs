use std::env;
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "tutord=info";

/// Sidecar settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Workspace opened at startup; otherwise the UI sends `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            workspace: non_empty("TUTORD_WORKSPACE").map(PathBuf::from),
            log_filter: non_empty("TUTORD_LOG")
                .or_else(|| non_empty("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
