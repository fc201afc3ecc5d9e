pub mod options;
pub mod paths;

pub use options::ManagerOptions;
pub use paths::ScopeDirs;
