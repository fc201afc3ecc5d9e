use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ScopeDirs;
use crate::error::ExtMgrError;
use crate::types::{Applied, ExtensionState, Scope};

pub const DISABLED_SUFFIX: &str = ".disabled";

const SCRIPT_EXTENSIONS: [&str; 2] = [".ts", ".js"];
const INDEX_FILES: [&str; 2] = ["index.ts", "index.js"];

/// A standalone extension file (or `dir/index.{ts,js}`) under an extension root.
///
/// State lives only in the filename: the file exists at exactly one of
/// `active_path` or `disabled_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalExtension {
    pub id: String,
    pub scope: Scope,
    pub state: ExtensionState,
    pub active_path: PathBuf,
    pub disabled_path: PathBuf,
    pub display_name: String,
    pub summary: String,
}

impl LocalExtension {
    fn new(
        scope: Scope,
        active_path: PathBuf,
        state: ExtensionState,
        display_name: String,
    ) -> Self {
        let disabled_path = with_disabled_suffix(&active_path);
        Self {
            id: format!("{}:{}", scope, active_path.display()),
            scope,
            state,
            active_path,
            disabled_path,
            display_name,
            summary: String::new(),
        }
    }

    /// Whichever of the two paths currently exists.
    pub fn current_path(&self) -> Option<&Path> {
        if self.active_path.exists() {
            Some(&self.active_path)
        } else if self.disabled_path.exists() {
            Some(&self.disabled_path)
        } else {
            None
        }
    }
}

fn with_disabled_suffix(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(DISABLED_SUFFIX);
    PathBuf::from(raw)
}

fn script_stem(name: &str) -> Option<&str> {
    SCRIPT_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .filter(|stem| !stem.is_empty())
}

/// First leading comment line of a script, used as its summary.
pub fn extract_summary(content: &str) -> String {
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("#!") {
            continue;
        }
        let text = if in_block {
            line.trim_end_matches("*/").trim_start_matches('*').trim()
        } else if let Some(rest) = line.strip_prefix("//") {
            rest.trim_start_matches('/').trim()
        } else if let Some(rest) = line.strip_prefix("/*") {
            in_block = !rest.contains("*/");
            rest.trim_end_matches("*/").trim_start_matches('*').trim()
        } else {
            return String::new();
        };
        if !text.is_empty() {
            return text.to_string();
        }
        if in_block && line.ends_with("*/") {
            return String::new();
        }
    }
    String::new()
}

async fn summary_for(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => extract_summary(&content),
        Err(_) => String::new(),
    }
}

async fn dir_index(dir: &Path) -> Option<(PathBuf, ExtensionState)> {
    for index in INDEX_FILES {
        let active = dir.join(index);
        if tokio::fs::metadata(&active).await.is_ok_and(|m| m.is_file()) {
            return Some((active, ExtensionState::Enabled));
        }
        let disabled = with_disabled_suffix(&active);
        if tokio::fs::metadata(&disabled).await.is_ok_and(|m| m.is_file()) {
            return Some((active, ExtensionState::Disabled));
        }
    }
    None
}

/// Non-recursive scan of one extension root. A missing root yields nothing.
pub async fn scan_extension_root(root: &Path, scope: Scope) -> Vec<LocalExtension> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read extension root {}: {e}", root.display());
            }
            return Vec::new();
        }
    };

    let mut found = Vec::<LocalExtension>::new();
    let mut seen = HashSet::<String>::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to list {}: {e}", root.display());
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };

        let candidate = if metadata.is_dir() {
            dir_index(&path)
                .await
                .map(|(active, state)| LocalExtension::new(scope, active, state, name.clone()))
        } else if let Some(stem) = script_stem(&name) {
            Some(LocalExtension::new(
                scope,
                path.clone(),
                ExtensionState::Enabled,
                stem.to_string(),
            ))
        } else if let Some(stem) = name.strip_suffix(DISABLED_SUFFIX).and_then(script_stem) {
            Some(LocalExtension::new(
                scope,
                root.join(&name[..name.len() - DISABLED_SUFFIX.len()]),
                ExtensionState::Disabled,
                stem.to_string(),
            ))
        } else {
            None
        };

        let Some(mut extension) = candidate else {
            continue;
        };
        if !seen.insert(extension.id.clone()) {
            // Both `x.ts` and `x.ts.disabled` exist; the active copy wins.
            tracing::warn!(
                "Extension {} exists both enabled and disabled",
                extension.active_path.display()
            );
            if extension.state.is_enabled()
                && let Some(existing) = found.iter_mut().find(|e| e.id == extension.id)
            {
                existing.state = ExtensionState::Enabled;
            }
            continue;
        }
        if let Some(current) = extension.current_path().map(Path::to_path_buf) {
            extension.summary = summary_for(&current).await;
        }
        found.push(extension);
    }

    found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    found
}

/// Scan the global and project extension roots.
pub async fn discover_local_extensions(dirs: &ScopeDirs) -> Vec<LocalExtension> {
    let global_root = dirs.extensions_dir(Scope::Global);
    let project_root = dirs.extensions_dir(Scope::Project);
    let (mut global, project) = tokio::join!(
        scan_extension_root(&global_root, Scope::Global),
        scan_extension_root(&project_root, Scope::Project),
    );
    global.extend(project);
    global
}

/// Rename between `active_path` and `disabled_path`. A file already at the
/// target path yields [`Applied::AlreadySet`].
pub async fn set_extension_state(
    extension: &LocalExtension,
    target: ExtensionState,
) -> Result<Applied, ExtMgrError> {
    let (from, to) = match target {
        ExtensionState::Enabled => (&extension.disabled_path, &extension.active_path),
        ExtensionState::Disabled => (&extension.active_path, &extension.disabled_path),
    };
    if tokio::fs::metadata(from).await.is_err() {
        if tokio::fs::metadata(to).await.is_ok() {
            tracing::debug!("{} is already {target}", to.display());
            return Ok(Applied::AlreadySet);
        }
        return Err(ExtMgrError::NotFound(format!(
            "Extension file missing: {}",
            from.display()
        )));
    }
    tokio::fs::rename(from, to).await?;
    tracing::debug!("Renamed {} -> {}", from.display(), to.display());
    Ok(Applied::Changed)
}

/// Delete an extension. `dir/index.{ts,js}` outside the roots removes the whole directory.
pub async fn remove_local_extension(
    extension: &LocalExtension,
    dirs: &ScopeDirs,
) -> Result<(), ExtMgrError> {
    let Some(current) = extension.current_path().map(Path::to_path_buf) else {
        return Err(ExtMgrError::NotFound(format!(
            "Extension not found: {}",
            extension.active_path.display()
        )));
    };

    let is_index = extension
        .active_path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| INDEX_FILES.contains(&n));
    let parent = extension.active_path.parent();
    let parent_is_root = parent.is_some_and(|p| {
        Scope::ALL
            .iter()
            .any(|scope| dirs.extensions_dir(*scope) == p)
    });

    match parent {
        Some(dir) if is_index && !parent_is_root => {
            tokio::fs::remove_dir_all(dir).await?;
            tracing::info!("Removed extension directory {}", dir.display());
        }
        _ => {
            tokio::fs::remove_file(&current).await?;
            tracing::info!("Removed extension {}", current.display());
        }
    }
    Ok(())
}
