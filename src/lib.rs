pub mod app;
pub mod cli;
pub mod config;
pub mod list;
pub mod offline;
pub mod storage;
pub mod ui;
pub mod wrap;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
