//! Parsing and validation of placer configuration files.
//!
//! This crate reads a `tessera.toml` file and produces a strongly-typed,
//! immutable [`PlacerConfig`]. Every option has a default, so an empty file is
//! a valid configuration. The config is built once when a placement run
//! starts and is passed by reference to every stage.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, validate_config};
pub use types::*;
