//! Configuration types for calmirror.

mod mirror_config;
mod store_config;

pub use mirror_config::{LoggingConfig, MirrorConfig, RemoteSettings};
pub use store_config::{ConnectionTarget, StoreBackend, StoreConfig, TableNames};
