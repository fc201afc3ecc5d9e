pub mod local;
pub mod toggle;

pub use local::{
    LocalExtension, discover_local_extensions, remove_local_extension, set_extension_state,
};
pub use toggle::{MarkerArrayBackend, RenameBackend, ToggleableUnit, UnitDescriptor, UnitKind};
