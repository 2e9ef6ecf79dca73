//! Record rendering for the three log formats

use chrono::{Local, NaiveDateTime};

use super::filter::FilterRule;
use super::types::{Channel, LogFormat};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// One line about to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub channel: Channel,
    pub message: String,
}

impl LogRecord {
    pub fn new(channel: Channel, message: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            channel,
            message: message.into(),
        }
    }

    /// Record stamped with the current local date and time
    pub fn now(channel: Channel, message: impl Into<String>) -> Self {
        Self::new(channel, message, Local::now().naive_local())
    }

    pub fn render(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => format!("{}\r\n", self.message),
            LogFormat::Verbose => format!(
                "[{}] [{}] [{}] {}\r\n",
                self.channel.tag(),
                self.timestamp.format(DATE_FORMAT),
                self.timestamp.format(TIME_FORMAT),
                self.message
            ),
            LogFormat::Html => format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\r\n",
                self.channel.tag(),
                self.timestamp.format(DATE_FORMAT),
                self.timestamp.format(TIME_FORMAT),
                escape_html(&self.message)
            ),
        }
    }
}

/// Escape `&` first so the entities added afterwards are not escaped again
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace(' ', "&nbsp;")
}

/// Applies filtering and renders surviving lines
#[derive(Debug, Clone)]
pub struct Formatter {
    format: LogFormat,
    filter: FilterRule,
}

impl Formatter {
    pub fn new(format: LogFormat, filter: FilterRule) -> Self {
        Self { format, filter }
    }

    /// Build the record for `line`, or `None` if it is dropped
    pub fn record(&self, channel: Channel, line: &str) -> Option<LogRecord> {
        if line.is_empty() {
            return None;
        }
        match channel {
            Channel::SystemMessage if self.format == LogFormat::Plain => None,
            Channel::SystemMessage => Some(LogRecord::now(channel, line)),
            _ if !self.filter.accepts(line) => None,
            _ => Some(LogRecord::now(channel, line)),
        }
    }

    pub fn emit(&self, channel: Channel, line: &str) -> Option<String> {
        self.record(channel, line)
            .map(|record| record.render(self.format))
    }
}
