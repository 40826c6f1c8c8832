//! # DV text monitor
//!
//! Sends and receives short text messages through ICOM D-STAR radios that
//! speak the RS-MS1A serial protocol.
//!
//! The radio emits a byte stream of `\r`-terminated packets. Position
//! (`$GPGGA`) and D-PRS (`$$CRC`) packets are aggregated into a block that is
//! attached to the next `$$Msg` packet. Message text is UTF-8 with a simple
//! obfuscation applied (see [`codec`]).
//!
//! The protocol engine ([`codec`], [`callsign`], [`packet`], [`block`],
//! [`framer`], [`receiver`], [`transmit`]) does no I/O. [`monitor`] drives it
//! from a serial port.

pub mod block;
pub mod callsign;
pub mod codec;
pub mod config;
pub mod console;
pub mod framer;
pub mod monitor;
pub mod packet;
pub mod receiver;
pub mod transmit;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
