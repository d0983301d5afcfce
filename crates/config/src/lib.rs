//! Configuration for the pipedeck service: schema, discovery and home-rooted paths.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, clear_data_dir, config_dir, data_dir, default_install_dir,
        discover_and_load, expand_home, find_config_file, load_config, set_config_dir,
        set_data_dir,
    },
    schema::{
        ApiConfig, DEFAULT_API_PORT, DashboardConfig, DashboardReadiness, ServiceConfig,
        ShutdownConfig,
    },
};
