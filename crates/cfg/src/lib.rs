//! Configuration and command-line parsing for kuang.

mod cli;
mod config;

pub use cli::Args;
pub use config::{
    Config, ConfigError, GeneratorConfig, GlobalConfig, LogLevel, LogTarget, LoggingConfig,
    ScannerConfig, WebConfig, XfrConfig,
};
