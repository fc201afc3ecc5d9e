pub mod discovery;

pub use discovery::{PackageResourceEntry, discover_package_resources, package_root};
