//! Crate-level error type

use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("A process or input capture has already been started")]
    AlreadyStarted,

    #[error("Nothing to run: no process or input capture was started")]
    NotStarted,
}

pub type Result<T> = std::result::Result<T, Error>;
