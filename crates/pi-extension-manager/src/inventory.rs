use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ManagerOptions;
use crate::exec::CommandExecutor;
use crate::extensions::local::{LocalExtension, discover_local_extensions};
use crate::extensions::toggle::{MarkerArrayBackend, RenameBackend, ToggleableUnit};
use crate::packages::{InstalledPackage, list_installed_packages_all_scopes};
use crate::resources::{PackageResourceEntry, discover_package_resources};
use crate::settings::PackageFilterStore;
use crate::settings::filters::find_package;
use crate::settings::types::{PackageSource, Settings};
use crate::types::{ExtensionState, Scope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageItem {
    #[serde(flatten)]
    pub package: InstalledPackage,
    /// Whole-package state in the package's own scope.
    pub state: ExtensionState,
}

/// Everything that can be toggled, discovered in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub local: Vec<LocalExtension>,
    pub packages: Vec<PackageItem>,
    pub resources: Vec<PackageResourceEntry>,
}

impl Inventory {
    /// Local extensions and installed packages are discovered concurrently;
    /// package resources are resolved once the package list is known.
    pub async fn discover(
        exec: &dyn CommandExecutor,
        options: &ManagerOptions,
        store: &PackageFilterStore,
    ) -> Self {
        let dirs = store.dirs();
        let (local, packages) = tokio::join!(
            discover_local_extensions(dirs),
            list_installed_packages_all_scopes(exec, options, dirs),
        );

        let snapshots = Scope::ALL
            .iter()
            .map(|scope| (*scope, store.snapshot(*scope)))
            .collect::<HashMap<Scope, Settings>>();
        let resources = discover_package_resources(&packages, dirs, &snapshots).await;

        let packages = packages
            .into_iter()
            .map(|package| {
                let disabled = snapshots
                    .get(&package.scope)
                    .and_then(|settings| find_package(settings, &package.source))
                    .is_some_and(PackageSource::is_fully_disabled);
                PackageItem {
                    package,
                    state: ExtensionState::from_enabled(!disabled),
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "Discovered {} local extensions, {} packages, {} package resources",
            local.len(),
            packages.len(),
            resources.len()
        );
        Self {
            local,
            packages,
            resources,
        }
    }

    /// One toggleable unit per local extension, package and package resource.
    pub fn units(&self, store: Arc<PackageFilterStore>) -> Vec<Box<dyn ToggleableUnit>> {
        let mut units = Vec::<Box<dyn ToggleableUnit>>::with_capacity(
            self.local.len() + self.packages.len() + self.resources.len(),
        );
        for extension in &self.local {
            units.push(Box::new(RenameBackend::new(extension.clone())));
        }
        for item in &self.packages {
            units.push(Box::new(MarkerArrayBackend::for_package(
                &item.package,
                item.state,
                store.clone(),
            )));
        }
        for entry in &self.resources {
            units.push(Box::new(MarkerArrayBackend::for_resource(
                entry,
                store.clone(),
            )));
        }
        units
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.packages.is_empty() && self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::config::ScopeDirs;
    use crate::exec::testing::FakeExecutor;
    use crate::reconcile::{StagedChanges, reconcile};
    use crate::settings::types::ResourceKind;

    #[tokio::test]
    async fn test_discover_and_reconcile_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let ext_root = dirs.extensions_dir(Scope::Project);
        std::fs::create_dir_all(&ext_root).unwrap();
        std::fs::write(ext_root.join("helper.ts"), "// Helps\n").unwrap();

        let pkg_root = tmp.path().join("pkgs").join("demo");
        std::fs::create_dir_all(pkg_root.join("prompts")).unwrap();
        std::fs::write(pkg_root.join("index.ts"), "").unwrap();
        std::fs::write(pkg_root.join("prompts").join("fix.md"), "").unwrap();

        let listing = format!("Global:\n  {}\n", pkg_root.display());
        let exec = FakeExecutor::default().reply("pi list", 0, &listing);
        let store = Arc::new(PackageFilterStore::new(dirs.clone()));

        let inventory = Inventory::discover(&exec, &ManagerOptions::default(), &store).await;
        assert_eq!(inventory.local.len(), 1);
        assert_eq!(inventory.local[0].summary, "Helps");
        assert_eq!(inventory.packages.len(), 1);
        assert_eq!(inventory.packages[0].state, ExtensionState::Enabled);
        assert_eq!(inventory.resources.len(), 2);

        let units = inventory.units(store.clone());
        assert_eq!(units.len(), 4);

        let source = inventory.packages[0].package.source.clone();
        let entrypoint_id = format!("extensions:global:{source}:index.ts");
        let mut staged = StagedChanges::new();
        for unit in &units {
            if unit.id() == entrypoint_id {
                staged.stage(unit.as_ref(), ExtensionState::Disabled);
            }
        }
        assert_eq!(staged.len(), 1);

        let outcome = reconcile(&units, staged.as_map(), &AuditLog::disabled()).await;
        assert_eq!(outcome.changed, 1);
        assert_eq!(
            store.get_state(&source, ResourceKind::Extensions, "index.ts", Scope::Global),
            ExtensionState::Disabled
        );

        let again = Inventory::discover(&exec, &ManagerOptions::default(), &store).await;
        let entry = again
            .resources
            .iter()
            .find(|e| e.id == entrypoint_id)
            .unwrap();
        assert_eq!(entry.state, ExtensionState::Disabled);
    }

    #[tokio::test]
    async fn test_failed_listing_still_reports_local_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = ScopeDirs::new(tmp.path().join("agent"), tmp.path().join("proj"));
        let ext_root = dirs.extensions_dir(Scope::Global);
        std::fs::create_dir_all(&ext_root).unwrap();
        std::fs::write(ext_root.join("solo.js.disabled"), "").unwrap();

        let store = PackageFilterStore::new(dirs);
        let inventory =
            Inventory::discover(&FakeExecutor::default(), &ManagerOptions::default(), &store)
                .await;
        assert_eq!(inventory.local.len(), 1);
        assert_eq!(inventory.local[0].state, ExtensionState::Disabled);
        assert!(inventory.packages.is_empty());
        assert!(!inventory.is_empty());
    }
}
