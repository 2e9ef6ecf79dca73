//! Capture pipeline: raw bytes to decoded lines to filtered records to the
//! log file
//!
//! The [`Supervisor`] owns the child process (or the [`InputCapturer`]) and
//! drives everything else from a single task. The only state shared with
//! other threads is the capturer's byte accumulator and the quit slot in
//! [`quit`].

pub mod encoding;
pub mod filter;
pub mod format;
pub mod input;
pub mod quit;
pub mod signal;
pub mod supervisor;
pub mod tokenizer;
pub mod types;
pub mod writer;

pub use encoding::{TextDecoder, TextEncoding};
pub use filter::FilterRule;
pub use format::{escape_html, Formatter, LogRecord};
pub use input::{CaptureEvent, FdInput, InputCapturer, InputSource, ReaderInput};
pub use quit::QuitHandle;
pub use supervisor::{CaptureOptions, Console, Supervisor, DEFAULT_ABORT_TIMEOUT};
pub use tokenizer::{ChannelDecoder, Tokenizer};
pub use types::{Channel, LogFormat, ProcessState};
pub use writer::LogWriter;

#[cfg(test)]
mod test_support;
