//! Log file output with format-specific framing

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use super::types::LogFormat;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

pub const VERBOSE_SEPARATOR: &str = "---------------------------\r\n";

pub const HTML_HEADER: &str = concat!(
    "<!DOCTYPE html>\r\n",
    "<html>\r\n",
    "<head><meta charset=\"UTF-8\"><title>Logging Utility</title></head>\r\n",
    "<body>\r\n",
    "<table border=\"1\" cellspacing=\"0\" cellpadding=\"2\">\r\n",
    "<tr><th>Channel</th><th>Date</th><th>Time</th><th>Message</th></tr>\r\n",
);

pub const HTML_FOOTER: &str = "</table></body></html>\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Opened,
    Initialized,
    Finished,
}

/// Owns the destination stream.
///
/// Records are only ever appended. `initialize` and `finish` are guarded so
/// repeated or out-of-order calls have no additional effect.
pub struct LogWriter<W: Write = File> {
    out: W,
    format: LogFormat,
    was_empty: bool,
    state: WriterState,
}

impl LogWriter<File> {
    /// Open `path` for appending or truncation.
    pub fn open(path: &Path, append: bool, format: LogFormat) -> io::Result<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };
        let was_empty = file.metadata()?.len() == 0;
        tracing::debug!(
            "Opened log file {:?} (append: {}, empty: {})",
            path,
            append,
            was_empty
        );
        Self::new(file, was_empty, format)
    }
}

impl<W: Write> LogWriter<W> {
    /// Wrap an already opened stream; a BOM is written if it was empty
    pub fn new(mut out: W, was_empty: bool, format: LogFormat) -> io::Result<Self> {
        if was_empty {
            out.write_all(UTF8_BOM)?;
            out.flush()?;
        }
        Ok(Self {
            out,
            format,
            was_empty,
            state: WriterState::Opened,
        })
    }

    pub fn was_empty(&self) -> bool {
        self.was_empty
    }

    pub fn is_initialized(&self) -> bool {
        self.state != WriterState::Opened
    }

    pub fn is_finished(&self) -> bool {
        self.state == WriterState::Finished
    }

    /// Write the header (HTML on a fresh file) or the run separator
    /// (verbose output appended to existing content)
    pub fn initialize(&mut self) -> io::Result<()> {
        if self.state != WriterState::Opened {
            return Ok(());
        }
        self.state = WriterState::Initialized;

        match self.format {
            LogFormat::Html if self.was_empty => self.write_raw(HTML_HEADER),
            LogFormat::Verbose if !self.was_empty => self.write_raw(VERBOSE_SEPARATOR),
            _ => Ok(()),
        }
    }

    pub fn append(&mut self, rendered: &str) -> io::Result<()> {
        match self.state {
            WriterState::Opened => self.initialize()?,
            WriterState::Initialized => {}
            WriterState::Finished => {
                tracing::debug!("Dropping record written after finish");
                return Ok(());
            }
        }
        self.write_raw(rendered)
    }

    /// Close the HTML table; no-op unless initialized and not yet finished
    pub fn finish(&mut self) -> io::Result<()> {
        if self.state != WriterState::Initialized {
            return Ok(());
        }
        self.state = WriterState::Finished;

        if self.format == LogFormat::Html && self.was_empty {
            self.write_raw(HTML_FOOTER)?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_raw(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }
}
