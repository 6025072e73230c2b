//! # xvdkit-cli - Command-line front end for xvdkit
//!
//! Argument parsing, key file discovery and the subcommand handlers behind
//! the `xvdkit` binary. Targets are local paths or `http(s)://` URLs served
//! with range support.
//!
//! ```text
//! xvdkit info game.xvc --json
//! xvdkit verify https://cdn.example.com/game.xvc
//! xvdkit extract game.xvc -o out --skip-region 0x4000
//! xvdkit decrypt game.xvc --keys-dir ~/.xvdkit
//! xvdkit extract-embedded game.xvc -o embedded.xvd
//! ```

#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod error;
pub mod keys;
pub mod progress;

pub use commands::run;
pub use config::{Cli, Command, KeyArgs, Target};
pub use error::{CliError, ConfigError, Result};
pub use progress::LogProgress;
