//! Splits the serial byte stream into packets.
//!
//! Packets are terminated by `\r`. The radio follows the terminator with
//! `\n` or `\0` footer bytes, which we strip. There is no start marker, so a
//! packet that never gets its terminator (e.g. because we started listening
//! in the middle of it, or the radio lost it) would poison the buffer forever.
//! Instead, a partial packet is dropped once it is older than the timeout.
//! Image transfers (`$$Pic`) are slow, so they get a longer timeout.

use std::time::{
    Duration,
    Instant,
};

use bytes::{
    Buf,
    Bytes,
    BytesMut,
};

use crate::packet::PacketKind;

pub const DELIMITER: u8 = b'\r';

const INITIAL_BUFFER_CAPACITY: usize = 1024;

#[inline(always)]
fn is_footer(byte: u8) -> bool {
    byte == b'\n' || byte == 0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum age of a partial packet
    pub packet: Duration,

    /// Maximum age of a partial `$$Pic` packet
    pub picture: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            packet: Duration::from_secs(4),
            picture: Duration::from_secs(15),
        }
    }
}

/// A partial packet was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expired {
    /// Number of bytes that were discarded
    pub discarded: usize,

    /// Whether the partial packet was a `$$Pic`.
    pub picture: bool,

    /// How long we waited for the rest of the packet.
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,

    /// When the buffer went from empty to non-empty. `None` while idle.
    started_at: Option<Instant>,

    timeouts: Timeouts,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(Timeouts::default())
    }
}

impl Framer {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            started_at: None,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn is_idle(&self) -> bool {
        self.started_at.is_none()
    }

    /// Bytes of the current partial packet.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends received bytes.
    ///
    /// Footer bytes arriving while idle are leftovers of a packet we already
    /// handled, so they're dropped right away.
    pub fn push(&mut self, data: &[u8], now: Instant) {
        if data.is_empty() {
            return;
        }

        if self.buffer.is_empty() {
            if data.iter().copied().all(is_footer) {
                return;
            }
            self.started_at = Some(now);
        }

        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete packet, without its delimiter and footer.
    pub fn next_packet(&mut self) -> Option<Bytes> {
        let index = self.buffer.iter().position(|byte| *byte == DELIMITER)?;

        let packet = self.buffer.split_to(index).freeze();
        self.buffer.advance(1);

        let footer = self
            .buffer
            .iter()
            .position(|byte| !is_footer(*byte))
            .unwrap_or(self.buffer.len());
        self.buffer.advance(footer);

        if self.buffer.is_empty() {
            self.reset();
        }

        Some(packet)
    }

    /// Drops the partial packet if it has been waiting for too long.
    ///
    /// This should be called after every read, even if nothing was received.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Expired> {
        let started_at = self.started_at?;

        if self.buffer.iter().copied().all(is_footer) {
            self.reset();
            return None;
        }

        let picture = self.buffer.starts_with(PacketKind::Picture.prefix());
        let limit = if picture {
            self.timeouts.picture
        }
        else {
            self.timeouts.packet
        };

        let elapsed = now.saturating_duration_since(started_at);
        if elapsed > limit {
            let discarded = self.buffer.len();
            self.reset();
            Some(Expired {
                discarded,
                picture,
                elapsed,
            })
        }
        else {
            None
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        Instant,
    };

    use crate::framer::{
        Framer,
        Timeouts,
    };

    fn packets(framer: &mut Framer) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| framer.next_packet())
            .map(|packet| packet.to_vec())
            .collect()
    }

    #[test]
    fn it_splits_at_carriage_returns() {
        let now = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"$$CRC1\r\n$$Msg,A,B,C\r\x00$$Pi", now);
        assert_eq!(packets(&mut framer), [b"$$CRC1".to_vec(), b"$$Msg,A,B,C".to_vec()]);
        assert_eq!(framer.buffered(), b"$$Pi");
        assert!(!framer.is_idle());

        framer.push(b"c\r", now);
        assert_eq!(packets(&mut framer), [b"$$Pic".to_vec()]);
        assert!(framer.is_idle());
    }

    #[test]
    fn it_reassembles_split_packets() {
        let now = Instant::now();
        let mut framer = Framer::default();

        for byte in b"$$Msg,A,B,0011EAhi\x00\r\x00" {
            framer.push(&[*byte], now);
        }
        assert_eq!(packets(&mut framer), [b"$$Msg,A,B,0011EAhi\x00".to_vec()]);
        assert!(framer.is_idle());
    }

    #[test]
    fn it_strips_footers_arriving_later() {
        let now = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"$$CRC1\r", now);
        assert_eq!(packets(&mut framer).len(), 1);
        assert!(framer.is_idle());

        framer.push(b"\n\x00\n", now);
        assert!(framer.is_idle());
        assert!(framer.buffered().is_empty());
    }

    #[test]
    fn it_emits_empty_packets() {
        let now = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"\r\r\n", now);
        assert_eq!(packets(&mut framer), [Vec::<u8>::new(), Vec::new()]);
        assert!(framer.is_idle());
    }

    #[test]
    fn it_times_out_partial_packets() {
        let start = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"$$Msg,JA1XPM", start);
        assert_eq!(framer.check_timeout(start + Duration::from_secs(4)), None);
        assert!(!framer.is_idle());

        let expired = framer
            .check_timeout(start + Duration::from_millis(4001))
            .unwrap();
        assert_eq!(expired.discarded, 12);
        assert!(!expired.picture);
        assert!(framer.is_idle());
        assert!(framer.buffered().is_empty());
    }

    #[test]
    fn it_waits_longer_for_pictures() {
        let start = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"$$Pic\x01\x02", start);
        assert_eq!(framer.check_timeout(start + Duration::from_secs(10)), None);
        assert_eq!(framer.check_timeout(start + Duration::from_secs(15)), None);

        let expired = framer
            .check_timeout(start + Duration::from_millis(15001))
            .unwrap();
        assert!(expired.picture);
        assert!(framer.is_idle());
    }

    #[test]
    fn it_measures_from_the_first_byte() {
        let start = Instant::now();
        let mut framer = Framer::new(Timeouts {
            packet: Duration::from_secs(1),
            picture: Duration::from_secs(2),
        });

        framer.push(b"$$CRC1\r$$Ms", start);
        assert_eq!(packets(&mut framer).len(), 1);

        // the partial packet still counts from when the buffer started filling
        framer.push(b"g,A", start + Duration::from_millis(900));
        assert!(
            framer
                .check_timeout(start + Duration::from_millis(1100))
                .is_some()
        );
    }

    #[test]
    fn it_restarts_the_timer_after_a_packet() {
        let start = Instant::now();
        let mut framer = Framer::default();

        framer.push(b"$$CRC1\r", start);
        assert_eq!(packets(&mut framer).len(), 1);

        let later = start + Duration::from_secs(10);
        framer.push(b"$$Msg", later);
        assert_eq!(framer.check_timeout(later + Duration::from_secs(1)), None);
    }

    #[test]
    fn it_keeps_footer_bytes_before_a_delimiter() {
        let start = Instant::now();
        let mut framer = Framer::default();

        // only footer bytes following a delimiter are stripped
        framer.push(b"\n\r", start);
        assert_eq!(packets(&mut framer), [b"\n".to_vec()]);
        assert!(framer.is_idle());

        framer.push(b"\x00\n\r\n", start);
        assert_eq!(packets(&mut framer), [b"\x00\n".to_vec()]);
        assert!(framer.is_idle());
    }
}
