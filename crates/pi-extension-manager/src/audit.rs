use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::paths;
use crate::error::ExtMgrError;
use crate::extensions::toggle::UnitDescriptor;
use crate::types::{Applied, ExtensionState, Scope};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// RFC 3339
    pub timestamp: String,
    pub action: String,
    pub id: String,
    pub kind: String,
    pub scope: Scope,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub from: ExtensionState,
    pub to: ExtensionState,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn state_change(
        id: &str,
        descriptor: &UnitDescriptor,
        from: ExtensionState,
        to: ExtensionState,
        result: &Result<Applied, ExtMgrError>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            action: if to.is_enabled() { "enable" } else { "disable" }.to_string(),
            id: id.to_string(),
            kind: descriptor.kind.label().to_string(),
            scope: descriptor.scope,
            name: descriptor.name.clone(),
            package_source: descriptor.package_source.clone(),
            path: descriptor.path.clone(),
            from,
            to,
            ok: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        }
    }
}

/// Append-only JSON Lines log of state changes.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A log that records nothing.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one record. Failures are logged, never returned.
    pub fn record(&self, record: &AuditRecord) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = append_line(path, record) {
            tracing::warn!("Failed to append audit record to {}: {e}", path.display());
        }
    }

    /// Every well-formed record, oldest first.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, ExtMgrError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<AuditRecord>(line).ok())
            .collect())
    }
}

fn append_line(path: &Path, record: &AuditRecord) -> Result<(), ExtMgrError> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        paths::ensure_dir(dir)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}
