use std::path::PathBuf;

pub const WORKSPACE_ENV: &str = "NOTESD_WORKSPACE";
pub const LOG_ENV: &str = "NOTESD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process-level settings. Per-workspace settings live in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Opened at startup when set, as if `workspace.select` had been sent.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            workspace: non_empty(WORKSPACE_ENV).map(PathBuf::from),
            log_filter: non_empty(LOG_ENV)
                .or_else(|| non_empty("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}
