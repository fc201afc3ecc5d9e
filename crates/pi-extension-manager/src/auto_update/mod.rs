pub mod check;
pub mod config;
pub mod scheduler;

pub use check::{PackageUpdate, check_for_updates};
pub use config::{AutoUpdateConfig, AutoUpdateStore, describe_interval, parse_duration};
pub use scheduler::{
    AutoUpdateScheduler, ContextAccessor, RegistryUpdateChecker, UpdateChecker, UpdateContext,
};
