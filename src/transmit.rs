//! Builds outbound `$$Msg` packets.
//!
//! ```plain
//! $$Msg,<from>,<to>,<id><payload><checksum>\r\0
//! ```
//!
//! The checksum is computed over the raw UTF-8 text, before obfuscation.

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};

use crate::{
    callsign::{
        Callsign,
        Identity,
        MessageId,
    },
    codec,
    packet::PacketKind,
};

/// Bytes terminating every packet we send.
pub const FOOTER: &[u8] = b"\r\x00";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("text is not valid UTF-8")]
    InvalidText(#[from] std::str::Utf8Error),
}

/// Builds a `$$Msg` packet from a line of input.
///
/// The line is checked to be valid UTF-8, since that is what the radio
/// expects.
pub fn build_message_packet(text: &[u8], identity: &Identity) -> Result<Bytes, Error> {
    let text = std::str::from_utf8(text)?;
    Ok(build_text_packet(text, identity))
}

/// Builds a `$$Msg` packet from text.
pub fn build_text_packet(text: &str, identity: &Identity) -> Bytes {
    let raw = text.as_bytes();

    let checksum = codec::encode_checksum(codec::checksum(raw));
    let payload = codec::encode_obfuscated(raw);
    let id = identity.message_id();

    let my = ascii_callsign(&identity.my);
    let ur = ascii_callsign(&identity.ur);

    let prefix = PacketKind::Message.prefix();
    let mut packet = BytesMut::with_capacity(
        prefix.len()
            + my.len()
            + ur.len()
            + MessageId::LENGTH
            + payload.len()
            + checksum.as_bytes().len()
            + FOOTER.len()
            + 3,
    );

    packet.put_slice(prefix);
    packet.put_u8(b',');
    packet.put_slice(&my);
    packet.put_u8(b',');
    packet.put_slice(&ur);
    packet.put_u8(b',');
    packet.put_slice(id.as_bytes());
    packet.put_slice(&payload);
    packet.put_slice(checksum.as_bytes());
    packet.put_slice(FOOTER);

    packet.freeze()
}

/// Callsign as ASCII, other characters are dropped.
fn ascii_callsign(callsign: &Callsign) -> Vec<u8> {
    callsign
        .to_string()
        .bytes()
        .filter(u8::is_ascii)
        .collect()
}
