use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

use crate::types::Scope;

pub const CONFIG_DIR_NAME: &str = ".pi";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const EXTENSIONS_DIR_NAME: &str = "extensions";
pub const CACHE_FILE_NAME: &str = ".extmgr-cache.json";
pub const EXTMGR_DIR_NAME: &str = "extmgr";
pub const AUTO_UPDATE_FILE_NAME: &str = "auto-update.json";
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Overrides the global agent directory.
pub const AGENT_DIR_ENV: &str = "PI_CODING_AGENT_DIR";
/// Overrides the directory holding the metadata cache file.
pub const CACHE_DIR_ENV: &str = "PI_EXTMGR_CACHE_DIR";

/// Default base directory: ~/.pi/agent/
pub static DEFAULT_BASE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join("agent")
});

/// Resolve the agent directory: explicit override, then env, then the default.
pub fn resolve_base_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    match std::env::var(AGENT_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => DEFAULT_BASE_DIR.clone(),
    }
}

/// Metadata cache location, honoring `PI_EXTMGR_CACHE_DIR`.
pub fn cache_file(agent_dir: &Path) -> PathBuf {
    match std::env::var(CACHE_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir).join(CACHE_FILE_NAME),
        _ => agent_dir.join(CACHE_FILE_NAME),
    }
}

/// The two directory bases every scope-specific path hangs off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDirs {
    pub agent_dir: PathBuf,
    pub cwd: PathBuf,
}

impl ScopeDirs {
    pub fn new(agent_dir: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            agent_dir: agent_dir.into(),
            cwd: cwd.into(),
        }
    }

    /// Uses the resolved agent directory and the process working directory.
    pub fn from_env() -> Self {
        Self::new(
            resolve_base_dir(None),
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        )
    }

    /// `~/.pi/agent` for global, `<cwd>/.pi` for project.
    pub fn base(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Global => self.agent_dir.clone(),
            Scope::Project => self.cwd.join(CONFIG_DIR_NAME),
        }
    }

    pub fn settings_file(&self, scope: Scope) -> PathBuf {
        self.base(scope).join(SETTINGS_FILE_NAME)
    }

    pub fn extensions_dir(&self, scope: Scope) -> PathBuf {
        self.base(scope).join(EXTENSIONS_DIR_NAME)
    }

    pub fn cache_file(&self) -> PathBuf {
        cache_file(&self.agent_dir)
    }

    pub fn auto_update_file(&self) -> PathBuf {
        self.agent_dir
            .join(EXTMGR_DIR_NAME)
            .join(AUTO_UPDATE_FILE_NAME)
    }

    pub fn audit_file(&self) -> PathBuf {
        self.agent_dir.join(EXTMGR_DIR_NAME).join(AUDIT_FILE_NAME)
    }
}

/// Ensure a directory exists, creating it if needed.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
