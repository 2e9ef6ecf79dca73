//! Per-channel line splitting
//!
//! Raw chunks are decoded, backspaces are turned into carriage returns (so
//! progress-bar style overwrites end up as separate lines), and the decoded
//! text is split on form feed, line feed, carriage return and vertical tab.
//! Text after the last terminator stays buffered until the next chunk.

use super::encoding::{TextDecoder, TextEncoding};
use super::types::Channel;

const LINE_TERMINATORS: [char; 4] = ['\x0c', '\n', '\r', '\x0b'];

/// Collapse whitespace runs to single spaces and trim both ends
pub fn simplify_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decoder plus line buffer for a single channel
#[derive(Debug)]
pub struct ChannelDecoder {
    decoder: TextDecoder,
    buffer: String,
    simplify: bool,
}

impl ChannelDecoder {
    pub fn new(encoding: TextEncoding, simplify: bool) -> Self {
        Self {
            decoder: encoding.decoder(),
            buffer: String::new(),
            simplify,
        }
    }

    /// Text decoded so far that has not been terminated yet
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Decode `bytes` and return every line completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        if bytes.is_empty() {
            return Vec::new();
        }

        let decoded = self.decoder.decode(bytes).replace('\x08', "\r");
        self.buffer.push_str(&decoded);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find(LINE_TERMINATORS) {
            if pos > 0 {
                lines.push(self.finish_line(&self.buffer[..pos]));
            }
            // All terminators are single-byte
            self.buffer.drain(..=pos);
        }
        lines
    }

    /// Take whatever is left in the buffer as a final, unterminated line
    pub fn flush(&mut self) -> Option<String> {
        self.buffer.push_str(&self.decoder.finish());
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(self.finish_line(&rest))
    }

    fn finish_line(&self, line: &str) -> String {
        if self.simplify {
            simplify_whitespace(line)
        } else {
            line.to_string()
        }
    }
}

/// The set of channel decoders owned by the supervisor
#[derive(Debug)]
pub struct Tokenizer {
    stdout: ChannelDecoder,
    stderr: ChannelDecoder,
    input: ChannelDecoder,
}

impl Tokenizer {
    pub fn new(output_encoding: TextEncoding, input_encoding: TextEncoding, simplify: bool) -> Self {
        Self {
            stdout: ChannelDecoder::new(output_encoding, simplify),
            stderr: ChannelDecoder::new(output_encoding, simplify),
            input: ChannelDecoder::new(input_encoding, simplify),
        }
    }

    /// Feed a chunk for `channel`; system messages are never tokenized
    pub fn feed(&mut self, channel: Channel, bytes: &[u8]) -> Vec<String> {
        match self.channel_mut(channel) {
            Some(decoder) => decoder.feed(bytes),
            None => Vec::new(),
        }
    }

    pub fn flush(&mut self, channel: Channel) -> Option<String> {
        self.channel_mut(channel).and_then(ChannelDecoder::flush)
    }

    pub fn buffered(&self, channel: Channel) -> &str {
        match channel {
            Channel::ChildStdout => self.stdout.buffered(),
            Channel::ChildStderr => self.stderr.buffered(),
            Channel::ExternalInput => self.input.buffered(),
            Channel::SystemMessage => "",
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> Option<&mut ChannelDecoder> {
        match channel {
            Channel::ChildStdout => Some(&mut self.stdout),
            Channel::ChildStderr => Some(&mut self.stderr),
            Channel::ExternalInput => Some(&mut self.input),
            Channel::SystemMessage => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(simplify: bool) -> ChannelDecoder {
        ChannelDecoder::new(TextEncoding::Utf8, simplify)
    }

    #[test]
    fn test_two_lines_mixed_terminators() {
        let mut decoder = utf8(false);
        let lines = decoder.feed(b"hello\nworld\r\n");
        assert_eq!(lines, vec!["hello", "world"]);
        assert_eq!(decoder.buffered(), "");
    }

    #[test]
    fn test_partial_line_retained() {
        let mut decoder = utf8(false);
        assert!(decoder.feed(b"partial").is_empty());
        assert_eq!(decoder.buffered(), "partial");

        assert_eq!(decoder.feed(b" line\n"), vec!["partial line"]);
        assert_eq!(decoder.buffered(), "");
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut decoder = utf8(false);
        decoder.feed(b"abc");
        assert!(decoder.feed(b"").is_empty());
        assert_eq!(decoder.buffered(), "abc");
    }

    #[test]
    fn test_consecutive_terminators_produce_no_empty_lines() {
        let mut decoder = utf8(false);
        let lines = decoder.feed(b"\n\n\x0ca\x0b\x0b\rb\n\n");
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_backspace_splits_progress_output() {
        let mut decoder = utf8(false);
        let lines = decoder.feed(b"10%\x08\x08\x0820%\x08\x08\x08done\n");
        assert_eq!(lines, vec!["10%", "20%", "done"]);
    }

    #[test]
    fn test_simplify_whitespace() {
        let mut decoder = utf8(true);
        let lines = decoder.feed(b"  a \t  b  \n   \n");
        // The whitespace-only line simplifies to an empty string
        assert_eq!(lines, vec!["a b", ""]);

        decoder.feed(b"  tail   end ");
        assert_eq!(decoder.flush().as_deref(), Some("tail end"));
    }

    #[test]
    fn test_flush_returns_remainder_once() {
        let mut decoder = utf8(false);
        decoder.feed(b"line\nrest");
        assert_eq!(decoder.flush().as_deref(), Some("rest"));
        assert_eq!(decoder.flush(), None);
    }

    #[test]
    fn test_flush_includes_incomplete_sequence() {
        let mut decoder = utf8(false);
        decoder.feed(b"x\xc3");
        assert_eq!(decoder.flush().as_deref(), Some("x\u{FFFD}"));
    }

    #[test]
    fn test_multibyte_character_split_across_feeds() {
        let mut decoder = utf8(false);
        assert!(decoder.feed(b"caf\xc3").is_empty());
        assert_eq!(decoder.feed(b"\xa9\n"), vec!["café"]);
    }

    #[test]
    fn test_rejoined_lines_reproduce_input() {
        let text = "alpha\nbeta\r\ngamma\x0cdelta\x0bepsilon\rtail";
        let mut decoder = utf8(false);
        let mut lines = Vec::new();
        for chunk in text.as_bytes().chunks(3) {
            lines.extend(decoder.feed(chunk));
        }

        let expected: Vec<&str> = text
            .split(LINE_TERMINATORS)
            .filter(|s| !s.is_empty())
            .collect();
        let (complete, remainder) = expected.split_at(expected.len() - 1);
        assert_eq!(lines, complete);
        assert_eq!(decoder.buffered(), remainder[0]);
    }

    #[test]
    fn test_tokenizer_channels_are_independent() {
        let mut tokenizer = Tokenizer::new(TextEncoding::Utf8, TextEncoding::Latin1, false);
        assert!(tokenizer.feed(Channel::ChildStdout, b"out").is_empty());
        assert_eq!(tokenizer.feed(Channel::ChildStderr, b"err\n"), vec!["err"]);
        assert_eq!(tokenizer.feed(Channel::ExternalInput, b"\xe9\n"), vec!["é"]);
        assert!(tokenizer.feed(Channel::SystemMessage, b"x\n").is_empty());

        assert_eq!(tokenizer.buffered(Channel::ChildStdout), "out");
        assert_eq!(tokenizer.flush(Channel::ChildStdout).as_deref(), Some("out"));
        assert_eq!(tokenizer.flush(Channel::ChildStderr), None);
    }
}
