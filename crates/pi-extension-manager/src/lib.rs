pub mod audit;
pub mod auto_update;
pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod extensions;
pub mod inventory;
pub mod packages;
pub mod persist;
pub mod reconcile;
pub mod resources;
pub mod settings;
pub mod types;

// ========== Public API re-exports ==========

// Error
pub use error::ExtMgrError;

// Config
pub use config::{ManagerOptions, ScopeDirs, paths};
pub use types::{Applied, ExtensionState, Scope};

// Subprocess
pub use exec::{CommandExecutor, ExecOptions, ExecOutput, TokioCommandExecutor};

// Packages
pub use packages::metadata::{
    MetadataError, RegistryPackage, fetch_package_metadata, latest_version, search_registry,
};
pub use packages::{
    DedupeStrategy, InstalledPackage, SourceKind, classify, list_installed_packages,
    list_installed_packages_all_scopes, normalize_for_install, parse_installed_packages,
};

// Cache
pub use cache::{CacheStats, Clock, MetadataCache, PackageMetadata, SystemClock};

// Settings
pub use settings::{LoadMode, PackageFilterStore, ResourceKind, SettingsManager};

// Discovery
pub use extensions::{LocalExtension, discover_local_extensions};
pub use inventory::{Inventory, PackageItem};
pub use resources::{PackageResourceEntry, discover_package_resources};

// Toggling
pub use audit::{AuditLog, AuditRecord};
pub use extensions::{MarkerArrayBackend, RenameBackend, ToggleableUnit, UnitDescriptor, UnitKind};
pub use reconcile::{ReconcileError, ReconcileOutcome, StagedChanges, reconcile};

// Auto-update
pub use auto_update::{
    AutoUpdateConfig, AutoUpdateScheduler, AutoUpdateStore, PackageUpdate, RegistryUpdateChecker,
    UpdateChecker, UpdateContext, parse_duration,
};
