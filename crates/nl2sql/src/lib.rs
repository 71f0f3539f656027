#![forbid(unsafe_code)]

pub mod accessor;
pub mod cli;
pub mod config;
pub mod importer;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod utils;

pub use cli::app::{Cli, Command};
