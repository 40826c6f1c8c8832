//! RS-MS1A text body encoding
//!
//! ICOM radios don't put plain UTF-8 on the wire. Two byte values are
//! rewritten to two-byte escape sequences, both starting with [`ESCAPE`]:
//!
//! ```plain
//! raw   wire
//! e7    ef 67
//! ef    ef 6f
//! ```
//!
//! The 8-bit checksum trailer uses the same escape byte for the two checksum
//! values that would otherwise collide with the framing (`0xef` itself, and
//! `,` which separates the `$$Msg` fields).

use std::borrow::Cow;

/// Escape byte used by both the text body and the checksum trailer.
pub const ESCAPE: u8 = 0xef;

const ESCAPED_E7: u8 = 0x67;
const ESCAPED_EF: u8 = 0x6f;

/// Restores raw bytes from an obfuscated wire body.
///
/// This is a single left-to-right scan: `ef 67` becomes `e7`, `ef 6f` becomes
/// `ef`, and a substituted byte is never looked at again. An `ef` followed by
/// anything else is passed through unchanged.
pub fn decode_obfuscated(wire: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(wire.len());
    let mut bytes = wire.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        if byte == ESCAPE {
            match bytes.peek() {
                Some(&ESCAPED_E7) => {
                    bytes.next();
                    raw.push(0xe7);
                }
                Some(&ESCAPED_EF) => {
                    bytes.next();
                    raw.push(0xef);
                }
                _ => raw.push(byte),
            }
        }
        else {
            raw.push(byte);
        }
    }

    raw
}

/// Obfuscates raw bytes for the wire.
///
/// Must be done byte by byte, otherwise the `ef` of an escape we just emitted
/// would be escaped again.
pub fn encode_obfuscated(raw: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(raw.len() + raw.len() / 4);

    for &byte in raw {
        match byte {
            0xe7 => wire.extend_from_slice(&[ESCAPE, ESCAPED_E7]),
            0xef => wire.extend_from_slice(&[ESCAPE, ESCAPED_EF]),
            _ => wire.push(byte),
        }
    }

    wire
}

/// 8-bit sum over the raw (not obfuscated) text bytes.
///
/// Only the text itself is summed, never the message ID or the packet footer.
pub fn checksum(raw: &[u8]) -> u8 {
    raw.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Wire form of a checksum: one byte, or two if it needs escaping.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EncodedChecksum {
    bytes: [u8; 2],
    len: usize,
}

impl EncodedChecksum {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl AsRef<[u8]> for EncodedChecksum {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for EncodedChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedChecksum({:02x?})", self.as_bytes())
    }
}

/// Encodes a checksum for the trailer.
///
/// Only `0xef` and `0x2c` have been observed in the escaped `ef, cs + 0x80`
/// form. Other values are sent as a single byte, even those that would fit
/// the same pattern.
pub fn encode_checksum(checksum: u8) -> EncodedChecksum {
    match checksum {
        0xef | 0x2c => {
            EncodedChecksum {
                bytes: [ESCAPE, checksum.wrapping_add(0x80)],
                len: 2,
            }
        }
        _ => {
            EncodedChecksum {
                bytes: [checksum, 0],
                len: 1,
            }
        }
    }
}

/// Decodes a checksum trailer as produced by [`split_trailer`].
///
/// Returns `None` if the trailer is empty or not a valid encoding.
pub fn decode_checksum(trailer: &[u8]) -> Option<u8> {
    match *trailer {
        [checksum] => Some(checksum),
        [ESCAPE, escaped] => Some(escaped.wrapping_sub(0x80)),
        _ => None,
    }
}

/// Splits a message body (without the ID) into payload and checksum trailer.
///
/// If the second-to-last byte is the escape byte, the trailer is two bytes
/// long, otherwise it's just the last byte.
pub fn split_trailer(body: &[u8]) -> (&[u8], &[u8]) {
    let trailer_len = match body {
        [] => 0,
        [.., ESCAPE, _] => 2,
        _ => 1,
    };
    body.split_at(body.len() - trailer_len)
}

/// Text decoded on a best-effort basis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LossyText {
    pub text: String,

    /// Number of invalid byte sequences that were replaced with U+FFFD.
    pub substitutions: usize,
}

impl LossyText {
    pub fn is_clean(&self) -> bool {
        self.substitutions == 0
    }
}

/// Decodes UTF-8, replacing invalid sequences instead of failing.
pub fn decode_lossy(bytes: &[u8]) -> LossyText {
    let substitutions = bytes
        .utf8_chunks()
        .filter(|chunk| !chunk.invalid().is_empty())
        .count();

    let text = match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_owned(),
        Cow::Owned(text) => text,
    };

    LossyText {
        text,
        substitutions,
    }
}
