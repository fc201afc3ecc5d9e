use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtMgrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unparsable subprocess output or manifest. Callers usually recover with defaults.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A settings file exists but is not valid. Never recovered silently.
    #[error("Invalid settings file: {0}")]
    StrictFormat(String),

    /// The change contradicts state already on disk.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Command failed: {0}")]
    Subprocess(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for ExtMgrError {
    fn from(s: String) -> Self {
        ExtMgrError::Other(s)
    }
}

impl From<&str> for ExtMgrError {
    fn from(s: &str) -> Self {
        ExtMgrError::Other(s.to_string())
    }
}
