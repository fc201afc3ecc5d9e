pub mod installed;
pub mod manifest;
pub mod metadata;
pub mod source;

pub use installed::{
    DedupeStrategy, InstalledPackage, list_installed_packages, list_installed_packages_all_scopes,
    parse_installed_packages,
};
pub use source::{SourceKind, classify, normalize_for_install};
