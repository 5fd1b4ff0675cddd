pub mod bootstrap;
pub mod config;
pub mod gateway;

pub use bootstrap::{build_indexer, build_state};
pub use config::{AppConfig, ConfigError, Settings};
pub use gateway::{create_app, AppState};
