mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{load_config, RuntimeConfig, StoreBackend};
