//! Incremental text decoders for captured byte streams
//!
//! Output arrives in arbitrary chunks, so a multi-byte sequence can be split
//! across two reads. Each [`TextDecoder`] keeps the incomplete tail of the
//! previous chunk and completes it on the next call.

use std::char::REPLACEMENT_CHARACTER;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const BYTE_ORDER_MARK: char = '\u{FEFF}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl TextEncoding {
    pub fn decoder(self) -> TextDecoder {
        TextDecoder::new(self)
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16le" | "utf-16" | "utf16le" | "utf16" => Ok(TextEncoding::Utf16Le),
            "utf-16be" | "utf16be" => Ok(TextEncoding::Utf16Be),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            _ => Err(Error::UnsupportedEncoding(label.to_string())),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Ascii => "US-ASCII",
        };
        f.write_str(name)
    }
}

/// Stateful decoder for one byte stream
#[derive(Debug)]
pub struct TextDecoder {
    encoding: TextEncoding,
    pending: Vec<u8>,
    at_start: bool,
}

impl TextDecoder {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
            at_start: true,
        }
    }

    /// Number of bytes held back waiting for the rest of a sequence
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode the next chunk of the stream
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len());
        match self.encoding {
            TextEncoding::Utf8 => self.decode_utf8(bytes, &mut out),
            TextEncoding::Utf16Le => self.decode_utf16(bytes, u16::from_le_bytes, &mut out),
            TextEncoding::Utf16Be => self.decode_utf16(bytes, u16::from_be_bytes, &mut out),
            TextEncoding::Latin1 => out.extend(bytes.iter().map(|&b| char::from(b))),
            TextEncoding::Ascii => out.extend(bytes.iter().map(|&b| {
                if b.is_ascii() {
                    char::from(b)
                } else {
                    REPLACEMENT_CHARACTER
                }
            })),
        }
        self.strip_leading_bom(out)
    }

    /// End of stream: an incomplete trailing sequence decodes to U+FFFD
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT_CHARACTER.to_string()
        }
    }

    fn strip_leading_bom(&mut self, mut text: String) -> String {
        if self.at_start && !text.is_empty() {
            self.at_start = false;
            if text.starts_with(BYTE_ORDER_MARK) {
                text.drain(..BYTE_ORDER_MARK.len_utf8());
            }
        }
        text
    }

    fn decode_utf8(&mut self, bytes: &[u8], out: &mut String) {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut rest = &data[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT_CHARACTER);
                            rest = &rest[valid_up_to + len..];
                        }
                        None => {
                            self.pending = rest[valid_up_to..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn decode_utf16(&mut self, bytes: &[u8], unit: fn([u8; 2]) -> u16, out: &mut String) {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();
        let mut consumed = units.len() * 2;

        // A lone high surrogate at the end may be completed by the next chunk
        if units
            .last()
            .is_some_and(|&last| (0xD800..=0xDBFF).contains(&last))
        {
            units.pop();
            consumed -= 2;
        }

        out.extend(
            char::decode_utf16(units.iter().copied())
                .map(|c| c.unwrap_or(REPLACEMENT_CHARACTER)),
        );
        self.pending = data[consumed..].to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("utf_16be".parse::<TextEncoding>().unwrap(), TextEncoding::Utf16Be);
        assert_eq!("ISO-8859-1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        match "klingon".parse::<TextEncoding>() {
            Err(Error::UnsupportedEncoding(label)) => assert_eq!(label, "klingon"),
            other => panic!("Expected UnsupportedEncoding, got {:?}", other),
        }
    }

    #[test]
    fn test_utf8_split_sequence() {
        let mut decoder = TextEncoding::Utf8.decoder();
        let bytes = "grüße".as_bytes();
        // Split inside the two-byte 'ü'
        let (first, second) = bytes.split_at(3);

        assert_eq!(decoder.decode(first), "gr");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(second), "üße");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_utf8_invalid_bytes_replaced() {
        let mut decoder = TextEncoding::Utf8.decoder();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_incomplete_tail_on_finish() {
        let mut decoder = TextEncoding::Utf8.decoder();
        assert_eq!(decoder.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_utf8_leading_bom_stripped_once() {
        let mut decoder = TextEncoding::Utf8.decoder();
        assert_eq!(decoder.decode(b"\xef\xbb\xbfhi"), "hi");
        assert_eq!(decoder.decode(b"\xef\xbb\xbf"), "\u{FEFF}");
    }

    #[test]
    fn test_utf16le_split_surrogate_pair() {
        let mut decoder = TextEncoding::Utf16Le.decoder();
        let bytes: Vec<u8> = "a😀".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        // 'a' plus the high surrogate plus one byte of the low surrogate
        let (first, second) = bytes.split_at(5);

        assert_eq!(decoder.decode(first), "a");
        assert_eq!(decoder.pending_len(), 3);
        assert_eq!(decoder.decode(second), "😀");
    }

    #[test]
    fn test_utf16be_decodes() {
        let mut decoder = TextEncoding::Utf16Be.decoder();
        assert_eq!(decoder.decode(&[0x00, 0x68, 0x00, 0x69]), "hi");
    }

    #[test]
    fn test_single_byte_encodings() {
        assert_eq!(TextEncoding::Latin1.decoder().decode(b"caf\xe9"), "café");
        assert_eq!(TextEncoding::Ascii.decoder().decode(b"caf\xe9"), "caf\u{FFFD}");
    }
}
