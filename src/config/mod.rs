pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_fuse_ttl_secs() -> u64 {
    0
}

fn default_fs_name() -> String {
    "layerfs".to_string()
}
