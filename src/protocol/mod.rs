//! # Niimbot Protocol Implementation
//!
//! This module provides the low-level wire format of Niimbot label printers.
//!
//! ## Module Structure
//!
//! - [`packet`]: Packet framing and XOR checksum
//! - [`commands`]: Request codes, info keys, payload builders and response parsers
//!
//! ## Usage Example
//!
//! ```
//! use niimbot::protocol::{commands::{self, RequestCode}, packet::Packet};
//!
//! // Ask for print density 3
//! let bytes = Packet::new(RequestCode::SetLabelDensity.code(), vec![3]).encode();
//!
//! // First raster line: 8 dots, alternating
//! let line = commands::line_packet(0, &[true, false, true, false, true, false, true, false]);
//! assert_eq!(line.payload[6], 0xAA);
//! # let _ = bytes;
//! ```

pub mod commands;
pub mod packet;

pub use commands::{HeartbeatStatus, InfoKey, PrintStatus, RequestCode};
pub use packet::Packet;
