use std::path::{Path, PathBuf};

use crate::config::ScopeDirs;
use crate::error::ExtMgrError;
use crate::persist::write_atomic;
use crate::settings::types::Settings;
use crate::types::Scope;

/// How to treat a settings file that exists but does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Fail with [`ExtMgrError::StrictFormat`]. Used before any write.
    Strict,
    /// Log and fall back to defaults. Used for read-only queries.
    Lenient,
}

/// Loads and saves one scope's `settings.json`.
pub struct SettingsManager {
    path: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            settings: Settings::default(),
        }
    }

    pub fn for_scope(dirs: &ScopeDirs, scope: Scope) -> Self {
        Self::new(&dirs.settings_file(scope))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings from disk. A missing or blank file yields defaults.
    pub fn load(&mut self, mode: LoadMode) -> Result<&Settings, ExtMgrError> {
        self.settings = read_settings(&self.path, mode)?;
        Ok(&self.settings)
    }

    /// Save current settings atomically (temp file + rename).
    pub fn save(&self) -> Result<(), ExtMgrError> {
        let mut content = serde_json::to_string_pretty(&self.settings)?;
        content.push('\n');
        write_atomic(&self.path, content.as_bytes())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

fn read_settings(path: &Path, mode: LoadMode) -> Result<Settings, ExtMgrError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => return Err(ExtMgrError::Io(e)),
    };
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }

    match serde_json::from_str::<Settings>(&content) {
        Ok(settings) => Ok(settings),
        Err(e) => match mode {
            LoadMode::Strict => Err(ExtMgrError::StrictFormat(format!(
                "{}: {e}",
                path.display()
            ))),
            LoadMode::Lenient => {
                tracing::warn!("Ignoring invalid settings file {}: {e}", path.display());
                Ok(Settings::default())
            }
        },
    }
}
