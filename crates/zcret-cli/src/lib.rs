//! Terminal client for Zcret
//!
//! A thin line-oriented shell over [`zcret_app::SessionHandle`]. All session
//! orchestration lives in the generic [`zcret_app::Runtime`]; this crate only
//! parses input, renders output and plays the identity provider.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod commands;
pub mod config;
pub mod render;
pub mod shell;

pub use commands::Command;
pub use config::{Args, ConfigError};
pub use shell::{Flow, Shell, ShellError};
