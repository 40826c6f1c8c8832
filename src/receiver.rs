//! Receive path: framer, packet decoding and block aggregation.

use std::time::Instant;

use crate::{
    block::BlockState,
    framer::{
        Expired,
        Framer,
        Timeouts,
    },
    packet::{
        MessagePacket,
        Packet,
    },
};

/// A message together with the context that was sent ahead of it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMessage {
    pub message: MessagePacket,
    pub block: BlockState,
}

impl DecodedMessage {
    pub fn sender(&self) -> &str {
        &self.message.sender
    }

    pub fn recipient(&self) -> &str {
        &self.message.recipient
    }

    pub fn text(&self) -> &str {
        &self.message.text.text
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Message(DecodedMessage),

    /// A partial packet was dropped, along with the pending block.
    Timeout(Expired),
}

#[derive(Debug, Default)]
pub struct Receiver {
    framer: Framer,
    block: BlockState,
}

impl Receiver {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            framer: Framer::new(timeouts),
            block: BlockState::default(),
        }
    }

    pub fn block(&self) -> &BlockState {
        &self.block
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    /// Feeds received bytes and handles all packets completed by them.
    pub fn receive(&mut self, data: &[u8], now: Instant) -> Vec<Event> {
        self.framer.push(data, now);

        let mut events = vec![];
        while let Some(packet) = self.framer.next_packet() {
            if let Some(message) = self.handle_packet(&packet) {
                events.push(Event::Message(message));
            }
        }
        events
    }

    /// Checks for a stale partial packet. The pending block is discarded with
    /// it, since the message it belonged to is lost.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Event> {
        let expired = self.framer.check_timeout(now)?;
        tracing::warn!(
            discarded = expired.discarded,
            picture = expired.picture,
            elapsed = ?expired.elapsed,
            "packet timeout, clearing buffer and block"
        );
        self.block.clear();
        Some(Event::Timeout(expired))
    }

    /// Handles a single packet. Only `$$Msg` packets produce output.
    pub fn handle_packet(&mut self, packet: &[u8]) -> Option<DecodedMessage> {
        let Some(decoded) = Packet::decode(packet)
        else {
            tracing::debug!(length = packet.len(), "ignoring packet");
            return None;
        };

        tracing::debug!(kind = ?decoded.kind(), length = packet.len(), "received packet");

        match decoded {
            Packet::Position(position) => {
                self.block.update_position(position);
                None
            }
            Packet::Auxiliary(line) => {
                self.block.update_auxiliary(&line);
                None
            }
            Packet::Message(message) => {
                if !message.checksum_matches() {
                    tracing::debug!(checksum = ?message.checksum, "checksum mismatch");
                }
                Some(DecodedMessage {
                    message,
                    block: self.block.flush(),
                })
            }
            Packet::Picture => None,
        }
    }
}
