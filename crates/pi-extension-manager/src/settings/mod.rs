pub mod filters;
pub mod manager;
pub mod types;

pub use filters::PackageFilterStore;
pub use manager::{LoadMode, SettingsManager};
pub use types::{PackageSource, PackageSourceFilter, ResourceKind, Settings};
