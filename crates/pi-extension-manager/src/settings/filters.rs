//! Enabled/disabled state of package entrypoints and resources, stored as
//! ordered `+path` / `-path` marker logs in each scope's `settings.json`.

use crate::config::ScopeDirs;
use crate::error::ExtMgrError;
use crate::packages::source::strip_annotations;
use crate::settings::manager::{LoadMode, SettingsManager};
use crate::settings::types::{PackageSource, ResourceKind, Settings};
use crate::types::{ExtensionState, Scope};

/// One parsed `+path` / `-path` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub state: ExtensionState,
    pub path: String,
}

/// Strip a marker/negation prefix and `./`, and use forward slashes.
pub fn normalize_marker_path(value: &str) -> String {
    let trimmed = value.trim();
    let stripped = trimmed
        .strip_prefix('!')
        .or_else(|| trimmed.strip_prefix('+'))
        .or_else(|| trimmed.strip_prefix('-'))
        .unwrap_or(trimmed)
        .replace('\\', "/");
    stripped
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(stripped)
}

/// Only `+`/`-` entries are markers; other patterns carry no toggle state.
pub fn parse_marker(entry: &str) -> Option<Marker> {
    let entry = entry.trim();
    let state = match entry.chars().next()? {
        '+' => ExtensionState::Enabled,
        '-' => ExtensionState::Disabled,
        _ => return None,
    };
    Some(Marker {
        state,
        path: normalize_marker_path(entry),
    })
}

pub fn format_marker(state: ExtensionState, path: &str) -> String {
    let sign = if state.is_enabled() { '+' } else { '-' };
    format!("{sign}{}", normalize_marker_path(path))
}

/// Fold the marker log: the last marker for `path` wins, else `default`.
pub fn effective_state(markers: &[String], path: &str, default: ExtensionState) -> ExtensionState {
    let path = normalize_marker_path(path);
    markers
        .iter()
        .filter_map(|entry| parse_marker(entry))
        .filter(|marker| marker.path == path)
        .fold(default, |_, marker| marker.state)
}

/// Effective state of one path given its package's settings entry.
///
/// A missing entry, bare source or absent array resolves to `default`; a
/// present-but-empty array (including the fully-disabled encoding) disables
/// every path of that kind.
pub fn resolve_state(
    entry: Option<&PackageSource>,
    kind: ResourceKind,
    relative_path: &str,
    default: ExtensionState,
) -> ExtensionState {
    let Some(entry) = entry else {
        return default;
    };
    match entry.markers(kind) {
        None => default,
        Some([]) => ExtensionState::Disabled,
        Some(markers) => effective_state(markers, relative_path, default),
    }
}

pub fn sources_match(a: &str, b: &str) -> bool {
    strip_annotations(a) == strip_annotations(b)
}

pub fn find_package<'a>(settings: &'a Settings, source: &str) -> Option<&'a PackageSource> {
    settings
        .packages
        .as_ref()?
        .iter()
        .find(|entry| sources_match(entry.source(), source))
}

fn package_index(packages: &[PackageSource], source: &str) -> Option<usize> {
    packages
        .iter()
        .position(|entry| sources_match(entry.source(), source))
}

/// Index of the entry for `source`, appending a bare entry if there is none.
fn ensure_package(packages: &mut Vec<PackageSource>, source: &str) -> usize {
    match package_index(packages, source) {
        Some(index) => index,
        None => {
            packages.push(PackageSource::Source(strip_annotations(source).to_string()));
            packages.len() - 1
        }
    }
}

/// Replace every marker for `relative_path` in `kind` with one marker for `target`.
///
/// Fails on a fully-disabled package: any marker would break the empty-array
/// encoding and re-enable every other path.
pub fn apply_marker(
    settings: &mut Settings,
    source: &str,
    kind: ResourceKind,
    relative_path: &str,
    target: ExtensionState,
) -> Result<(), ExtMgrError> {
    let packages = settings.packages.get_or_insert_with(Vec::new);
    let index = ensure_package(packages, source);
    if packages[index].is_fully_disabled() {
        return Err(ExtMgrError::Conflict(format!(
            "package {} is disabled; enable it before changing its resources",
            packages[index].source()
        )));
    }
    let normalized_path = normalize_marker_path(relative_path);

    let mut filter = std::mem::replace(&mut packages[index], PackageSource::Source(String::new()))
        .into_filter();
    let slot = filter.markers_mut(kind);
    let was_empty = slot.as_ref().is_some_and(Vec::is_empty);
    let mut markers = slot.take().unwrap_or_default();
    if was_empty {
        tracing::warn!(
            "Empty {} list of {source} gains a marker; its unmarked paths become enabled",
            kind.label()
        );
    }
    markers.retain(|entry| parse_marker(entry).is_none_or(|marker| marker.path != normalized_path));
    markers.push(format_marker(target, &normalized_path));
    *slot = Some(markers);

    packages[index] = PackageSource::Filtered(filter);
    Ok(())
}

/// Disable: all resource arrays become empty. Enable: back to a bare source.
pub fn apply_package_disabled(settings: &mut Settings, source: &str, disabled: bool) {
    let packages = settings.packages.get_or_insert_with(Vec::new);
    let index = ensure_package(packages, source);

    let current = std::mem::replace(&mut packages[index], PackageSource::Source(String::new()));
    packages[index] = if disabled {
        let mut filter = current.into_filter();
        for kind in ResourceKind::ALL {
            *filter.markers_mut(kind) = Some(Vec::new());
        }
        PackageSource::Filtered(filter)
    } else {
        PackageSource::Source(current.source().to_string())
    };
}

/// File-backed marker store, one `settings.json` per scope.
#[derive(Debug, Clone)]
pub struct PackageFilterStore {
    dirs: ScopeDirs,
}

impl PackageFilterStore {
    pub fn new(dirs: ScopeDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &ScopeDirs {
        &self.dirs
    }

    /// Read-only snapshot; malformed files read as empty.
    pub fn snapshot(&self, scope: Scope) -> Settings {
        let mut manager = SettingsManager::for_scope(&self.dirs, scope);
        match manager.load(LoadMode::Lenient) {
            Ok(_) => manager.settings().clone(),
            Err(e) => {
                tracing::warn!("Failed to read settings for {scope} scope: {e}");
                Settings::default()
            }
        }
    }

    pub fn get_state(
        &self,
        source: &str,
        kind: ResourceKind,
        relative_path: &str,
        scope: Scope,
    ) -> ExtensionState {
        let settings = self.snapshot(scope);
        resolve_state(
            find_package(&settings, source),
            kind,
            relative_path,
            ExtensionState::Enabled,
        )
    }

    pub fn is_package_disabled(&self, source: &str, scope: Scope) -> bool {
        let settings = self.snapshot(scope);
        find_package(&settings, source).is_some_and(PackageSource::is_fully_disabled)
    }

    /// Record `target` for one path. Refuses to touch a malformed settings file.
    pub fn set_state(
        &self,
        source: &str,
        kind: ResourceKind,
        relative_path: &str,
        scope: Scope,
        target: ExtensionState,
    ) -> Result<(), ExtMgrError> {
        self.mutate(scope, |settings| {
            apply_marker(settings, source, kind, relative_path, target)
        })?;
        tracing::debug!(
            "Set {} {relative_path} of {source} ({scope}) to {target}",
            kind.label()
        );
        Ok(())
    }

    pub fn set_package_disabled(
        &self,
        source: &str,
        scope: Scope,
        disabled: bool,
    ) -> Result<(), ExtMgrError> {
        self.mutate(scope, |settings| {
            apply_package_disabled(settings, source, disabled);
            Ok(())
        })?;
        tracing::debug!(
            "{} package {source} ({scope})",
            if disabled { "Disabled" } else { "Enabled" }
        );
        Ok(())
    }

    /// Nothing is written when `f` fails.
    fn mutate<F>(&self, scope: Scope, f: F) -> Result<(), ExtMgrError>
    where
        F: FnOnce(&mut Settings) -> Result<(), ExtMgrError>,
    {
        let mut manager = SettingsManager::for_scope(&self.dirs, scope);
        manager.load(LoadMode::Strict)?;
        f(manager.settings_mut())?;
        manager.save()
    }
}
