pub mod config;
pub mod logging;
pub mod bootstrap;
pub mod metrics;

pub use config::Config;
