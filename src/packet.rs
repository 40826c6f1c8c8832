//! Packet classification and decoding
//!
//! A packet is everything between two carriage returns. The kind is
//! determined by a fixed prefix:
//!
//! | prefix   | content                                  |
//! |----------|------------------------------------------|
//! | `$GPGGA` | NMEA GGA sentence with our position      |
//! | `$$CRC`  | D-PRS line                               |
//! | `$$Msg`  | text message: `$$Msg,<from>,<to>,<body>` |
//! | `$$Pic`  | image transfer (not supported)           |
//!
//! Everything else is ignored.

use crate::{
    block::Position,
    callsign::{
        Callsign,
        MessageId,
    },
    codec::{
        self,
        LossyText,
    },
};

/// Kind of a packet, determined by its prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Position,
    Auxiliary,
    Message,
    Picture,
}

impl PacketKind {
    pub const ALL: [Self; 4] = [Self::Position, Self::Auxiliary, Self::Message, Self::Picture];

    pub fn prefix(&self) -> &'static [u8] {
        match self {
            Self::Position => b"$GPGGA",
            Self::Auxiliary => b"$$CRC",
            Self::Message => b"$$Msg",
            Self::Picture => b"$$Pic",
        }
    }

    /// Returns `None` for empty packets and unknown prefixes.
    pub fn classify(packet: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| packet.starts_with(kind.prefix()))
    }
}

/// A decoded packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Position(Position),
    /// Trimmed D-PRS line, without the prefix.
    Auxiliary(String),
    Message(MessagePacket),
    Picture,
}

impl Packet {
    /// Decodes a single packet (without its delimiter).
    ///
    /// Returns `None` if the packet should be ignored: unknown prefix, or too
    /// few fields for a position report or message.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        let kind = PacketKind::classify(packet)?;
        match kind {
            PacketKind::Position => decode_position(packet).map(Self::Position),
            PacketKind::Auxiliary => Some(Self::Auxiliary(decode_auxiliary(packet))),
            PacketKind::Message => MessagePacket::decode(packet).map(Self::Message),
            PacketKind::Picture => Some(Self::Picture),
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Position(_) => PacketKind::Position,
            Self::Auxiliary(_) => PacketKind::Auxiliary,
            Self::Message(_) => PacketKind::Message,
            Self::Picture => PacketKind::Picture,
        }
    }
}

const GGA_MIN_FIELDS: usize = 10;
const GGA_LATITUDE: usize = 2;
const GGA_NORTH_SOUTH: usize = 3;
const GGA_LONGITUDE: usize = 4;
const GGA_EAST_WEST: usize = 5;
const GGA_ALTITUDE: usize = 9;

/// Decodes the fields of a GGA sentence we care about.
///
/// Each field degrades to `None` on its own if it can't be parsed. Only a
/// sentence with too few fields is rejected as a whole.
pub fn decode_position(packet: &[u8]) -> Option<Position> {
    let sentence = packet
        .iter()
        .copied()
        .filter(u8::is_ascii)
        .map(char::from)
        .collect::<String>();

    let fields = sentence.split(',').collect::<Vec<_>>();
    if fields.len() < GGA_MIN_FIELDS {
        return None;
    }

    let latitude = match fields[GGA_NORTH_SOUTH] {
        "N" => parse_coordinate(fields[GGA_LATITUDE], 2),
        "S" => parse_coordinate(fields[GGA_LATITUDE], 2).map(|latitude| -latitude),
        _ => None,
    };

    let longitude = match fields[GGA_EAST_WEST] {
        "E" => parse_coordinate(fields[GGA_LONGITUDE], 3),
        "W" => parse_coordinate(fields[GGA_LONGITUDE], 3).map(|longitude| -longitude),
        _ => None,
    };

    let altitude = fields[GGA_ALTITUDE].trim().parse::<f64>().ok();

    Some(Position {
        latitude,
        longitude,
        altitude,
    })
}

/// Converts NMEA `dddmm.mmmm` to decimal degrees.
fn parse_coordinate(value: &str, degree_digits: usize) -> Option<f64> {
    let (degrees, minutes) = value.split_at_checked(degree_digits)?;
    let degrees = degrees.trim().parse::<i32>().ok()?;
    let minutes = minutes.trim().parse::<f64>().ok()?;
    Some(f64::from(degrees) + minutes / 60.0)
}

/// Decodes the text following the `$$CRC` prefix.
pub fn decode_auxiliary(packet: &[u8]) -> String {
    let line = packet
        .strip_prefix(PacketKind::Auxiliary.prefix())
        .unwrap_or(packet);
    codec::decode_lossy(line).text.trim().to_owned()
}

/// Fields of a `$$Msg` packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePacket {
    /// Trimmed sender, as sent by the radio.
    pub sender: String,

    /// Trimmed recipient, as sent by the radio.
    pub recipient: String,

    /// The 6 leading bytes of the body, if the body was long enough.
    pub id: Option<[u8; MessageId::LENGTH]>,

    /// Payload with the obfuscation removed.
    pub payload: Vec<u8>,

    pub text: LossyText,

    /// Checksum from the trailer.
    pub checksum: Option<u8>,
}

impl MessagePacket {
    /// Splits `$$Msg,<from>,<to>,<body>`.
    ///
    /// The body may itself contain commas, so we split into at most 4 parts.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        let mut parts = packet.splitn(4, |byte| *byte == b',');
        let _tag = parts.next()?;
        let sender = parts.next()?;
        let recipient = parts.next()?;
        let body = parts.next()?;

        let (id, payload, checksum) = match body.split_first_chunk::<{ MessageId::LENGTH }>() {
            Some((id, rest)) if !rest.is_empty() => {
                let (payload, trailer) = codec::split_trailer(rest);
                (
                    Some(*id),
                    codec::decode_obfuscated(payload),
                    codec::decode_checksum(trailer),
                )
            }
            _ => (None, vec![], None),
        };

        Some(Self {
            sender: codec::decode_lossy(sender).text.trim().to_owned(),
            recipient: codec::decode_lossy(recipient).text.trim().to_owned(),
            id,
            text: codec::decode_lossy(&payload),
            payload,
            checksum,
        })
    }

    pub fn sender_callsign(&self) -> Callsign {
        Callsign::normalize(&self.sender)
    }

    pub fn recipient_callsign(&self) -> Callsign {
        Callsign::normalize(&self.recipient)
    }

    /// Whether the received checksum matches the payload.
    ///
    /// This is informational only. Messages are never rejected because of a
    /// mismatch.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == Some(codec::checksum(&self.payload))
    }
}
