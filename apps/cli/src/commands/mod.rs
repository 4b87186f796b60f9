//! 命令定义

pub mod config;
pub mod motion;

pub use config::{CliConfig, ConfigCommand, default_config_file};
pub use motion::{MoveCommand, SweepCommand, WatchCommand};
