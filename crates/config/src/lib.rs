//! Gateway configuration: schema, file discovery and environment overrides.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, discover_and_load, load_config, set_config_dir},
    schema::{CourierConfig, ServerConfig, SessionConfig, WhatsAppConfig},
};
