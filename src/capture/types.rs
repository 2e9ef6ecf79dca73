//! Core types for the capture pipeline

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Source of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ChildStdout,
    ChildStderr,
    ExternalInput,
    SystemMessage,
}

impl Channel {
    /// Single-letter tag written in front of each record
    pub fn tag(self) -> char {
        match self {
            Channel::ChildStdout => 'O',
            Channel::ChildStderr => 'E',
            Channel::ExternalInput => 'I',
            Channel::SystemMessage => 'S',
        }
    }
}

/// On-disk rendering style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Message only, no timestamp and no system messages
    Plain,
    /// Tagged line with date and time
    #[default]
    Verbose,
    /// One table row per record
    Html,
}

impl LogFormat {
    /// File extension used when deriving a log file name
    pub fn extension(self) -> &'static str {
        match self {
            LogFormat::Html => "html",
            LogFormat::Plain | LogFormat::Verbose => "log",
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(LogFormat::Plain),
            "verbose" => Ok(LogFormat::Verbose),
            "html" => Ok(LogFormat::Html),
            other => Err(Error::Config(format!("unknown log format '{}'", other))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Plain => "plain",
            LogFormat::Verbose => "verbose",
            LogFormat::Html => "html",
        };
        f.write_str(name)
    }
}

/// Lifecycle of the supervised source.
///
/// Input capture runs use `Running` for "reader running" and go through the
/// same `Draining` and `Finished` states once the reader finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Starting,
    Running,
    Draining,
    Finished,
    FailedToStart,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_tags() {
        assert_eq!(Channel::ChildStdout.tag(), 'O');
        assert_eq!(Channel::ChildStderr.tag(), 'E');
        assert_eq!(Channel::ExternalInput.tag(), 'I');
        assert_eq!(Channel::SystemMessage.tag(), 'S');
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("HTML".parse::<LogFormat>().unwrap(), LogFormat::Html);
        assert_eq!(" plain ".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Verbose);
    }
}
