pub mod mount;
pub mod shadow;

pub use mount::{mount_overlay, MountRequest};
pub use shadow::list_shadowed;
