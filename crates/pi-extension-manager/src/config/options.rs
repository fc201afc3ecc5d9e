use std::time::Duration;

/// Tunables for subprocess calls, cache lifetimes and batching.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Host binary that owns `list`/`install`/`remove`.
    pub host_command: String,
    /// Registry client used for `view`/`search`.
    pub registry_command: String,
    pub list_timeout: Duration,
    pub view_timeout: Duration,
    pub search_timeout: Duration,
    pub metadata_ttl: Duration,
    pub search_ttl: Duration,
    /// Maximum concurrent registry lookups.
    pub metadata_batch_size: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            host_command: "pi".to_string(),
            registry_command: "npm".to_string(),
            list_timeout: Duration::from_secs(10),
            view_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(20),
            metadata_ttl: Duration::from_secs(24 * 60 * 60),
            search_ttl: Duration::from_secs(15 * 60),
            metadata_batch_size: 5,
        }
    }
}
