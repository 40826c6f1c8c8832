//! Callsigns and the `$$Msg` message ID derived from them.

use std::{
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
    sync::Arc,
};

use parking_lot::Mutex;

/// Normalized callsign, e.g. `JA1XPM` or `JA1XPM C`.
///
/// The base is the first whitespace-separated token, uppercased. The suffix
/// is the second token, but only if it is exactly one character long. Anything
/// else is dropped.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Callsign {
    base: String,
    suffix: Option<char>,
}

impl Callsign {
    pub fn normalize(s: &str) -> Self {
        let mut tokens = s.split_whitespace();

        let Some(base) = tokens.next()
        else {
            return Self::default();
        };

        let suffix = tokens.next().and_then(|token| {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(suffix), None) => suffix.to_uppercase().next(),
                _ => None,
            }
        });

        Self {
            base: base.to_uppercase(),
            suffix,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn suffix(&self) -> Option<char> {
        self.suffix
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

impl FromStr for Callsign {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::normalize(s))
    }
}

impl Display for Callsign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base)?;
        if let Some(suffix) = self.suffix {
            write!(f, " {suffix}")?;
        }
        Ok(())
    }
}

impl Debug for Callsign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callsign({self})")
    }
}

/// Outbound identity: who we are (`MY`) and who we're sending to (`UR`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub my: Callsign,
    pub ur: Callsign,
}

impl Identity {
    pub fn new(my: Callsign, ur: Callsign) -> Self {
        Self { my, ur }
    }

    pub fn message_id(&self) -> MessageId {
        MessageId::derive(&self.my, &self.ur)
    }
}

/// Identity shared between the console input thread and the monitor.
///
/// Only hold the lock to read or replace the callsigns, never across I/O.
pub type SharedIdentity = Arc<Mutex<Identity>>;

/// The 6 byte `0011XX` token at the start of a `$$Msg` body.
///
/// The radio derives `XX` from the two callsigns. The rule was worked out by
/// sending messages with different callsign pairs:
///
/// ```plain
/// K  = sum(FROM_BASE) + 0x1a + lower(FROM_SUFFIX)
/// XX = sum(TO_BASE) + K + lower(TO_SUFFIX)
/// ```
///
/// All arithmetic is 8-bit, missing suffixes count as 0, and non-ASCII
/// characters of the bases are skipped.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; 6]);

impl MessageId {
    pub const LENGTH: usize = 6;

    /// Used when either callsign is empty.
    pub const FALLBACK: Self = Self(*b"001100");

    pub fn derive(from: &Callsign, to: &Callsign) -> Self {
        if from.is_empty() || to.is_empty() {
            return Self::FALLBACK;
        }

        let k = ascii_sum(&from.base)
            .wrapping_add(0x1a)
            .wrapping_add(suffix_code(from.suffix));
        let nn = ascii_sum(&to.base)
            .wrapping_add(k)
            .wrapping_add(suffix_code(to.suffix));

        Self::from_byte(nn)
    }

    pub fn from_byte(nn: u8) -> Self {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        Self([
            b'0',
            b'0',
            b'1',
            b'1',
            HEX[usize::from(nn >> 4)],
            HEX[usize::from(nn & 0xf)],
        ])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // only ever constructed from ASCII
        std::str::from_utf8(&self.0).unwrap_or("001100")
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({self})")
    }
}

fn ascii_sum(s: &str) -> u8 {
    s.bytes()
        .filter(u8::is_ascii)
        .fold(0u8, |sum, byte| sum.wrapping_add(byte))
}

fn suffix_code(suffix: Option<char>) -> u8 {
    suffix
        .and_then(|suffix| suffix.to_lowercase().next())
        .map_or(0, |suffix| (u32::from(suffix) & 0xff) as u8)
}
