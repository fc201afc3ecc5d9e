//! Apply staged enable/disable edits to disk.
//!
//! Units are applied one at a time so that marker read-modify-write cycles
//! on the same settings file never overlap. A failing unit is reported and
//! the batch continues.
//!
//! A whole-package change overrides resource changes staged for the same
//! package in the same batch: disabling rewrites every marker array and
//! enabling discards them.

use std::collections::{HashMap, HashSet};

use crate::audit::{AuditLog, AuditRecord};
use crate::extensions::toggle::{ToggleableUnit, UnitKind};
use crate::packages::source::strip_annotations;
use crate::types::{Applied, ExtensionState, Scope};

/// Desired states for the units a user actually touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedChanges {
    changes: HashMap<String, ExtensionState>,
}

impl StagedChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `target` for `unit`. Staging the unit's original state unstages it.
    pub fn stage(&mut self, unit: &dyn ToggleableUnit, target: ExtensionState) {
        if target == unit.original_state() {
            self.changes.remove(unit.id());
        } else {
            self.changes.insert(unit.id().to_string(), target);
        }
    }

    /// Flip the unit's currently displayed state.
    pub fn toggle(&mut self, unit: &dyn ToggleableUnit) -> ExtensionState {
        let next = if self.state_of(unit).is_enabled() {
            ExtensionState::Disabled
        } else {
            ExtensionState::Enabled
        };
        self.stage(unit, next);
        next
    }

    /// Staged state if any, else the original.
    pub fn state_of(&self, unit: &dyn ToggleableUnit) -> ExtensionState {
        self.changes
            .get(unit.id())
            .copied()
            .unwrap_or_else(|| unit.original_state())
    }

    pub fn get(&self, id: &str) -> Option<ExtensionState> {
        self.changes.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    pub fn as_map(&self) -> &HashMap<String, ExtensionState> {
        &self.changes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileError {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub changed: usize,
    /// Applied, but already in the target state on disk.
    pub unchanged: usize,
    /// Resource ids skipped because their package changes in the same batch.
    pub superseded: Vec<String>,
    pub errors: Vec<ReconcileError>,
}

impl ReconcileOutcome {
    /// Loaded code only sees state changes after the host reloads.
    pub fn reload_required(&self) -> bool {
        self.changed > 0
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

fn package_key(unit: &dyn ToggleableUnit) -> Option<(UnitKind, Scope, String)> {
    let descriptor = unit.descriptor();
    let source = descriptor.package_source?;
    Some((
        descriptor.kind,
        descriptor.scope,
        strip_annotations(&source).to_string(),
    ))
}

/// Apply every staged change that differs from its unit's original state.
pub async fn reconcile(
    units: &[Box<dyn ToggleableUnit>],
    staged: &HashMap<String, ExtensionState>,
    audit: &AuditLog,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let pending = units
        .iter()
        .filter_map(|unit| {
            let target = staged.get(unit.id()).copied()?;
            (target != unit.original_state()).then_some((unit.as_ref(), target))
        })
        .collect::<Vec<_>>();

    let changing_packages = pending
        .iter()
        .filter_map(|(unit, _)| package_key(*unit))
        .filter(|(kind, _, _)| *kind == UnitKind::Package)
        .map(|(_, scope, source)| (scope, source))
        .collect::<HashSet<_>>();

    for (unit, target) in pending {
        let original = unit.original_state();
        if let Some((UnitKind::Resource(_), scope, source)) = package_key(unit)
            && changing_packages.contains(&(scope, source))
        {
            tracing::info!("Skipping {}; its package changes in the same batch", unit.id());
            outcome.superseded.push(unit.id().to_string());
            continue;
        }

        let result = unit.apply(target).await;
        let descriptor = unit.descriptor();
        audit.record(&AuditRecord::state_change(
            unit.id(),
            &descriptor,
            original,
            target,
            &result,
        ));

        match result {
            Ok(Applied::Changed) => {
                tracing::info!(
                    "{} {} {} ({})",
                    if target.is_enabled() { "Enabled" } else { "Disabled" },
                    descriptor.kind.label(),
                    descriptor.name,
                    descriptor.scope
                );
                outcome.changed += 1;
            }
            Ok(Applied::AlreadySet) => {
                tracing::debug!("{} was already {target}", unit.id());
                outcome.unchanged += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to set {} to {target}: {e}", unit.id());
                outcome.errors.push(ReconcileError {
                    id: unit.id().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ScopeDirs;
    use crate::extensions::local::scan_extension_root;
    use crate::extensions::toggle::{MarkerArrayBackend, RenameBackend};
    use crate::packages::InstalledPackage;
    use crate::resources::PackageResourceEntry;
    use crate::settings::{PackageFilterStore, ResourceKind};

    async fn local_units(root: &std::path::Path) -> Vec<Box<dyn ToggleableUnit>> {
        scan_extension_root(root, Scope::Global)
            .await
            .into_iter()
            .map(|ext| Box::new(RenameBackend::new(ext)) as Box<dyn ToggleableUnit>)
            .collect()
    }

    fn demo_package(scope: Scope) -> InstalledPackage {
        InstalledPackage {
            source: "npm:demo".to_string(),
            name: "demo".to_string(),
            version: None,
            scope,
            resolved_path: None,
            description: None,
            size: None,
        }
    }

    fn demo_extension(path: &str, state: ExtensionState) -> PackageResourceEntry {
        PackageResourceEntry {
            id: format!("extensions:global:npm:demo:{path}"),
            kind: ResourceKind::Extensions,
            scope: Scope::Global,
            package_source: "npm:demo".to_string(),
            package_name: "demo".to_string(),
            relative_path: path.to_string(),
            absolute_path: std::path::PathBuf::from("/pkgs/demo").join(path),
            state,
            default_state: ExtensionState::Enabled,
        }
    }

    /// Package unit first, then its two entrypoints, as the inventory lists them.
    fn package_units(
        store: &Arc<PackageFilterStore>,
        state: ExtensionState,
    ) -> Vec<Box<dyn ToggleableUnit>> {
        vec![
            Box::new(MarkerArrayBackend::for_package(
                &demo_package(Scope::Global),
                state,
                store.clone(),
            )),
            Box::new(MarkerArrayBackend::for_resource(
                &demo_extension("a.ts", state),
                store.clone(),
            )),
            Box::new(MarkerArrayBackend::for_resource(
                &demo_extension("b.ts", state),
                store.clone(),
            )),
        ]
    }

    #[tokio::test]
    async fn test_package_disable_wins_over_resource_changes_in_same_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let store = Arc::new(PackageFilterStore::new(dirs));
        let units = package_units(&store, ExtensionState::Enabled);

        let mut staged = StagedChanges::new();
        staged.stage(units[0].as_ref(), ExtensionState::Disabled);
        staged.stage(units[1].as_ref(), ExtensionState::Disabled);
        let audit = AuditLog::new(tmp.path().join("audit.jsonl"));
        let outcome = reconcile(&units, staged.as_map(), &audit).await;

        assert_eq!(outcome.changed, 1);
        assert!(outcome.is_clean());
        assert_eq!(outcome.superseded, vec![units[1].id().to_string()]);
        assert!(store.is_package_disabled("npm:demo", Scope::Global));
        assert_eq!(
            store.get_state("npm:demo", ResourceKind::Extensions, "b.ts", Scope::Global),
            ExtensionState::Disabled
        );
        assert_eq!(audit.read_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_package_enable_wins_over_resource_changes_in_same_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let store = Arc::new(PackageFilterStore::new(dirs));
        store
            .set_package_disabled("npm:demo", Scope::Global, true)
            .unwrap();
        let units = package_units(&store, ExtensionState::Disabled);

        let mut staged = StagedChanges::new();
        staged.stage(units[0].as_ref(), ExtensionState::Enabled);
        staged.stage(units[2].as_ref(), ExtensionState::Enabled);
        let outcome = reconcile(&units, staged.as_map(), &AuditLog::disabled()).await;

        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.superseded, vec![units[2].id().to_string()]);
        assert!(!store.is_package_disabled("npm:demo", Scope::Global));
        assert_eq!(
            store.get_state("npm:demo", ResourceKind::Extensions, "a.ts", Scope::Global),
            ExtensionState::Enabled
        );
    }

    #[tokio::test]
    async fn test_resource_change_on_disabled_package_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let store = Arc::new(PackageFilterStore::new(dirs));
        store
            .set_package_disabled("npm:demo", Scope::Global, true)
            .unwrap();
        let units = package_units(&store, ExtensionState::Disabled);

        let mut staged = StagedChanges::new();
        staged.stage(units[1].as_ref(), ExtensionState::Enabled);
        let outcome = reconcile(&units, staged.as_map(), &AuditLog::disabled()).await;

        assert_eq!(outcome.changed, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, units[1].id());
        assert!(outcome.errors[0].message.starts_with("Conflict"));
        assert!(store.is_package_disabled("npm:demo", Scope::Global));
    }

    #[tokio::test]
    async fn test_already_applied_rename_needs_no_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("exts");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.ts"), "").unwrap();
        let units = local_units(&root).await;

        let mut staged = StagedChanges::new();
        staged.stage(units[0].as_ref(), ExtensionState::Disabled);
        // Someone else disabled it after discovery.
        std::fs::rename(root.join("a.ts"), root.join("a.ts.disabled")).unwrap();

        let outcome = reconcile(&units, staged.as_map(), &AuditLog::disabled()).await;
        assert_eq!(outcome.changed, 0);
        assert_eq!(outcome.unchanged, 1);
        assert!(outcome.is_clean());
        assert!(!outcome.reload_required());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("exts");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.ts"), "").unwrap();
        std::fs::write(root.join("b.ts"), "").unwrap();
        let units = local_units(&root).await;

        let mut staged = StagedChanges::new();
        for unit in &units {
            staged.stage(unit.as_ref(), ExtensionState::Disabled);
        }
        // b is deleted behind our back.
        std::fs::remove_file(root.join("b.ts")).unwrap();

        let audit = AuditLog::new(tmp.path().join("audit.jsonl"));
        let outcome = reconcile(&units, staged.as_map(), &audit).await;

        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, units[1].id());
        assert!(outcome.reload_required());
        assert!(root.join("a.ts.disabled").exists());

        let records = audit.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.ok).count(), 1);
    }

    #[tokio::test]
    async fn test_untouched_and_reverted_units_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("exts");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.ts"), "").unwrap();
        let units = local_units(&root).await;

        let mut staged = StagedChanges::new();
        assert_eq!(staged.toggle(units[0].as_ref()), ExtensionState::Disabled);
        assert_eq!(staged.toggle(units[0].as_ref()), ExtensionState::Enabled);
        assert!(staged.is_empty());

        // A stale entry equal to the original state is a no-op as well.
        let mut raw = HashMap::new();
        raw.insert(units[0].id().to_string(), ExtensionState::Enabled);
        let outcome = reconcile(&units, &raw, &AuditLog::disabled()).await;
        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(!outcome.reload_required());
        assert!(root.join("a.ts").exists());
    }

    #[tokio::test]
    async fn test_mixed_backends() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let root = dirs.extensions_dir(Scope::Global);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("local.ts"), "").unwrap();
        // A malformed project settings file must not be overwritten.
        std::fs::create_dir_all(dirs.base(Scope::Project)).unwrap();
        std::fs::write(dirs.settings_file(Scope::Project), "{oops").unwrap();

        let store = Arc::new(PackageFilterStore::new(dirs.clone()));

        let mut units = local_units(&root).await;
        units.push(Box::new(MarkerArrayBackend::for_package(
            &demo_package(Scope::Global),
            ExtensionState::Enabled,
            store.clone(),
        )));
        units.push(Box::new(MarkerArrayBackend::for_package(
            &demo_package(Scope::Project),
            ExtensionState::Enabled,
            store.clone(),
        )));

        let mut staged = StagedChanges::new();
        for unit in &units {
            staged.stage(unit.as_ref(), ExtensionState::Disabled);
        }
        let outcome = reconcile(&units, staged.as_map(), &AuditLog::disabled()).await;

        assert_eq!(outcome.changed, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].id, "package:project:npm:demo");
        assert!(outcome.errors[0].message.contains("Invalid settings file"));
        assert!(root.join("local.ts.disabled").exists());
        assert!(store.is_package_disabled("npm:demo", Scope::Global));
        assert_eq!(
            std::fs::read_to_string(dirs.settings_file(Scope::Project)).unwrap(),
            "{oops"
        );
    }
}
