//! Configuration system for strand session nodes.
//!
//! Provides TOML-based configuration with:
//! - Node identity (`[node]`), overridable with `STRAND_NODE_ID`
//! - Session timing and contexts (`[session]`, `[[session.contexts]]`)
//! - The shared SQLite store location (`[store]`)
//! - Log output directory (`[logging]`)
//! - Config file layering (user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, apply_env_overrides, load_config, load_config_file, load_config_with_options,
    save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
