//! # logging-util
//!
//! Wraps a command-line program (or standard input) with persistent,
//! filterable logging. Output is passed through to the console unchanged
//! while each line is decoded, filtered and appended to a log file as a
//! timestamped record.
//!
//! ## Usage
//!
//! ```bash
//! logging-util [-o build.log] [--skip DEBUG] [--format html] -- make -j8
//! some-tool | logging-util -o tool.log
//! ```
//!
//! ## Modules
//!
//! - `capture` - Tokenizer, filter, formatter, log writer and process supervisor
//! - `config` - Run settings from TOML, environment and flags
//! - `error` - Crate error type
//! - `subprocess` - Child process creation and control
pub mod capture;
pub mod config;
pub mod error;
pub mod subprocess;

pub use capture::{CaptureOptions, Console, LogFormat, Supervisor};
pub use config::LoggerConfig;
pub use error::{Error, Result};
