use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ExtMgrError;
use crate::extensions::local::{LocalExtension, set_extension_state};
use crate::packages::InstalledPackage;
use crate::resources::PackageResourceEntry;
use crate::settings::PackageFilterStore;
use crate::settings::types::ResourceKind;
use crate::types::{Applied, ExtensionState, Scope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "resource")]
pub enum UnitKind {
    /// Standalone file under an extension root.
    Local,
    /// One entrypoint or resource of a package.
    Resource(ResourceKind),
    /// A package as a whole.
    Package,
}

impl UnitKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Resource(kind) => kind.label(),
            Self::Package => "package",
        }
    }
}

/// Identity of a unit for display and audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDescriptor {
    pub kind: UnitKind,
    pub scope: Scope,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Something with an enabled/disabled state that can be changed durably.
#[async_trait]
pub trait ToggleableUnit: Send + Sync {
    fn id(&self) -> &str;

    /// State at discovery time.
    fn original_state(&self) -> ExtensionState;

    fn descriptor(&self) -> UnitDescriptor;

    /// Persist `target`.
    async fn apply(&self, target: ExtensionState) -> Result<Applied, ExtMgrError>;
}

/// Local extension toggled by renaming to/from `.disabled`.
#[derive(Debug, Clone)]
pub struct RenameBackend {
    extension: LocalExtension,
}

impl RenameBackend {
    pub fn new(extension: LocalExtension) -> Self {
        Self { extension }
    }
}

#[async_trait]
impl ToggleableUnit for RenameBackend {
    fn id(&self) -> &str {
        &self.extension.id
    }

    fn original_state(&self) -> ExtensionState {
        self.extension.state
    }

    fn descriptor(&self) -> UnitDescriptor {
        UnitDescriptor {
            kind: UnitKind::Local,
            scope: self.extension.scope,
            name: self.extension.display_name.clone(),
            package_source: None,
            path: Some(self.extension.active_path.clone()),
        }
    }

    async fn apply(&self, target: ExtensionState) -> Result<Applied, ExtMgrError> {
        set_extension_state(&self.extension, target).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerTarget {
    Resource {
        kind: ResourceKind,
        relative_path: String,
    },
    WholePackage,
}

/// Package entrypoint, resource or whole package, toggled through the
/// settings marker arrays.
#[derive(Debug, Clone)]
pub struct MarkerArrayBackend {
    id: String,
    store: Arc<PackageFilterStore>,
    source: String,
    scope: Scope,
    name: String,
    original: ExtensionState,
    target: MarkerTarget,
    path: Option<PathBuf>,
}

impl MarkerArrayBackend {
    pub fn for_resource(entry: &PackageResourceEntry, store: Arc<PackageFilterStore>) -> Self {
        Self {
            id: entry.id.clone(),
            store,
            source: entry.package_source.clone(),
            scope: entry.scope,
            name: format!("{}/{}", entry.package_name, entry.relative_path),
            original: entry.state,
            target: MarkerTarget::Resource {
                kind: entry.kind,
                relative_path: entry.relative_path.clone(),
            },
            path: Some(entry.absolute_path.clone()),
        }
    }

    /// `original` is the package's current whole-package state.
    pub fn for_package(
        package: &InstalledPackage,
        original: ExtensionState,
        store: Arc<PackageFilterStore>,
    ) -> Self {
        Self {
            id: package_unit_id(package.scope, &package.source),
            store,
            source: package.source.clone(),
            scope: package.scope,
            name: package.name.clone(),
            original,
            target: MarkerTarget::WholePackage,
            path: package.resolved_path.clone(),
        }
    }
}

pub fn package_unit_id(scope: Scope, source: &str) -> String {
    format!("package:{scope}:{source}")
}

#[async_trait]
impl ToggleableUnit for MarkerArrayBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn original_state(&self) -> ExtensionState {
        self.original
    }

    fn descriptor(&self) -> UnitDescriptor {
        let kind = match &self.target {
            MarkerTarget::Resource { kind, .. } => UnitKind::Resource(*kind),
            MarkerTarget::WholePackage => UnitKind::Package,
        };
        UnitDescriptor {
            kind,
            scope: self.scope,
            name: self.name.clone(),
            package_source: Some(self.source.clone()),
            path: self.path.clone(),
        }
    }

    async fn apply(&self, target: ExtensionState) -> Result<Applied, ExtMgrError> {
        match &self.target {
            MarkerTarget::Resource {
                kind,
                relative_path,
            } => self
                .store
                .set_state(&self.source, *kind, relative_path, self.scope, target)?,
            MarkerTarget::WholePackage => {
                self.store
                    .set_package_disabled(&self.source, self.scope, !target.is_enabled())?
            }
        }
        Ok(Applied::Changed)
    }
}
