//! # Packet Framing
//!
//! Every command and response exchanged with the printer is a framed packet:
//!
//! ```text
//! ┌──────┬──────┬──────┬────────┬───────────────┬──────────┬──────┬──────┐
//! │ 0x55 │ 0x55 │ type │ length │ payload[len]  │ checksum │ 0xAA │ 0xAA │
//! └──────┴──────┴──────┴────────┴───────────────┴──────────┴──────┴──────┘
//! ```
//!
//! `checksum = type ^ length ^ payload[0] ^ ... ^ payload[len-1]`
//!
//! ## Example
//!
//! ```
//! use niimbot::protocol::packet::Packet;
//!
//! let bytes = Packet::new(0xDC, vec![0x01]).encode();
//! assert_eq!(bytes, vec![0x55, 0x55, 0xDC, 0x01, 0x01, 0xDC, 0xAA, 0xAA]);
//!
//! let packet = Packet::decode(&bytes)?;
//! assert_eq!(packet.kind, 0xDC);
//! assert_eq!(packet.payload, vec![0x01]);
//! # Ok::<(), niimbot::error::NiimbotError>(())
//! ```

use crate::error::{NiimbotError, Result};

/// Start-of-packet marker (sent twice)
pub const START_MARKER: u8 = 0x55;

/// End-of-packet marker (sent twice)
pub const END_MARKER: u8 = 0xAA;

/// Bytes of framing around the payload: 2 start, type, length, checksum, 2 end
pub const FRAME_OVERHEAD: usize = 7;

/// Largest payload a single length byte can describe
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// A decoded protocol packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command or response type code
    pub kind: u8,
    /// Payload bytes (at most 255)
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Serialize to the wire format.
    ///
    /// The payload length is the caller's responsibility; anything past 255
    /// bytes cannot be described by the length byte.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);

        let len = self.payload.len() as u8;
        let mut out = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        out.extend([START_MARKER, START_MARKER, self.kind, len]);
        out.extend(&self.payload);
        out.push(checksum(self.kind, &self.payload));
        out.extend([END_MARKER, END_MARKER]);
        out
    }

    /// Parse a packet from raw bytes.
    ///
    /// ## Errors
    ///
    /// - [`NiimbotError::MalformedPacket`] if the buffer is too short, either
    ///   marker pair is missing, or the length byte doesn't match the buffer
    /// - [`NiimbotError::ChecksumMismatch`] if the trailing checksum is wrong
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(NiimbotError::MalformedPacket(format!(
                "{} bytes is shorter than the {}-byte frame",
                bytes.len(),
                FRAME_OVERHEAD
            )));
        }

        let n = bytes.len();
        if bytes[0] != START_MARKER
            || bytes[1] != START_MARKER
            || bytes[n - 2] != END_MARKER
            || bytes[n - 1] != END_MARKER
        {
            return Err(NiimbotError::MalformedPacket(
                "invalid packet markers".to_string(),
            ));
        }

        let kind = bytes[2];
        let len = bytes[3] as usize;
        if len + FRAME_OVERHEAD != n {
            return Err(NiimbotError::MalformedPacket(format!(
                "length byte says {} payload bytes, frame holds {}",
                len,
                n - FRAME_OVERHEAD
            )));
        }

        let payload = &bytes[4..4 + len];
        let expected = checksum(kind, payload);
        let actual = bytes[n - 3];
        if expected != actual {
            return Err(NiimbotError::ChecksumMismatch { expected, actual });
        }

        Ok(Self::new(kind, payload))
    }
}

/// Encode a packet without building a [`Packet`] first.
pub fn encode(kind: u8, payload: &[u8]) -> Vec<u8> {
    Packet::new(kind, payload).encode()
}

/// XOR checksum over type, length and payload.
#[inline]
pub fn checksum(kind: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(kind ^ payload.len() as u8, |acc, b| acc ^ b)
}

// ============================================================================
// TESTS
// ============================================================================
