//! Bootstrap helpers shared by the `rolewatch` binary

pub mod config;

pub use config::load_config;
