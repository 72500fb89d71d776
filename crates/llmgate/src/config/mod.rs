pub mod loader;
pub mod schema;

pub use crate::error::ConfigError;
pub use loader::{
    apply_env_overrides, finish, load_config, load_config_file, load_config_from_str,
    CONFIG_PATH_VAR,
};
pub use schema::Config;
