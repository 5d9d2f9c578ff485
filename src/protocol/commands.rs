//! # Niimbot Command Set
//!
//! This module names every request code the printer understands, the keys of
//! the `GET_INFO` query, and the payload/response shapes of each command.
//! It builds bytes and parses bytes; it performs no I/O. The typed client in
//! [`crate::printer::client`] sends these through a session.
//!
//! ## Byte Order
//!
//! Multi-byte integers are **big-endian**:
//! - `u16` value 0x1234 is sent as bytes `[0x12, 0x34]`
//!
//! ## Acknowledgements
//!
//! Setters and lifecycle commands answer with a one-byte payload where any
//! non-zero value means the printer accepted the command.

use crate::error::{NiimbotError, Result};
use crate::protocol::packet::Packet;
use crate::render::bitmap::pack_row;

// ============================================================================
// REQUEST CODES
// ============================================================================

/// Command type codes sent in the packet `type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    GetInfo,
    GetRfid,
    Heartbeat,
    SetLabelType,
    SetLabelDensity,
    StartPrint,
    EndPrint,
    StartPagePrint,
    EndPagePrint,
    AllowPrintClear,
    SetDimension,
    SetQuantity,
    GetPrintStatus,
    /// One raster line of image data (written without awaiting a response)
    PrintLine,
}

impl RequestCode {
    pub const ALL: [RequestCode; 14] = [
        RequestCode::GetInfo,
        RequestCode::GetRfid,
        RequestCode::Heartbeat,
        RequestCode::SetLabelType,
        RequestCode::SetLabelDensity,
        RequestCode::StartPrint,
        RequestCode::EndPrint,
        RequestCode::StartPagePrint,
        RequestCode::EndPagePrint,
        RequestCode::AllowPrintClear,
        RequestCode::SetDimension,
        RequestCode::SetQuantity,
        RequestCode::GetPrintStatus,
        RequestCode::PrintLine,
    ];

    /// Wire value of this code.
    pub const fn code(self) -> u8 {
        match self {
            RequestCode::GetInfo => 64,
            RequestCode::GetRfid => 26,
            RequestCode::Heartbeat => 220,
            RequestCode::SetLabelType => 35,
            RequestCode::SetLabelDensity => 33,
            RequestCode::StartPrint => 1,
            RequestCode::EndPrint => 243,
            RequestCode::StartPagePrint => 3,
            RequestCode::EndPagePrint => 227,
            RequestCode::AllowPrintClear => 32,
            RequestCode::SetDimension => 19,
            RequestCode::SetQuantity => 21,
            RequestCode::GetPrintStatus => 163,
            RequestCode::PrintLine => 0x85,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RequestCode::GetInfo => "GET_INFO",
            RequestCode::GetRfid => "GET_RFID",
            RequestCode::Heartbeat => "HEARTBEAT",
            RequestCode::SetLabelType => "SET_LABEL_TYPE",
            RequestCode::SetLabelDensity => "SET_LABEL_DENSITY",
            RequestCode::StartPrint => "START_PRINT",
            RequestCode::EndPrint => "END_PRINT",
            RequestCode::StartPagePrint => "START_PAGE_PRINT",
            RequestCode::EndPagePrint => "END_PAGE_PRINT",
            RequestCode::AllowPrintClear => "ALLOW_PRINT_CLEAR",
            RequestCode::SetDimension => "SET_DIMENSION",
            RequestCode::SetQuantity => "SET_QUANTITY",
            RequestCode::GetPrintStatus => "GET_PRINT_STATUS",
            RequestCode::PrintLine => "PRINT_LINE",
        }
    }
}

impl TryFrom<u8> for RequestCode {
    type Error = NiimbotError;

    fn try_from(value: u8) -> Result<Self> {
        RequestCode::ALL
            .into_iter()
            .find(|c| c.code() == value)
            .ok_or_else(|| {
                NiimbotError::InvalidParameter(format!("unknown request code {}", value))
            })
    }
}

impl std::fmt::Display for RequestCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

// ============================================================================
// INFO KEYS
// ============================================================================

/// Keys accepted by `GET_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKey {
    Density,
    PrintSpeed,
    LabelType,
    LanguageType,
    AutoShutdownTime,
    DeviceType,
    SoftVersion,
    Battery,
    DeviceSerial,
    HardVersion,
}

impl InfoKey {
    pub const ALL: [InfoKey; 10] = [
        InfoKey::Density,
        InfoKey::PrintSpeed,
        InfoKey::LabelType,
        InfoKey::LanguageType,
        InfoKey::AutoShutdownTime,
        InfoKey::DeviceType,
        InfoKey::SoftVersion,
        InfoKey::Battery,
        InfoKey::DeviceSerial,
        InfoKey::HardVersion,
    ];

    pub const fn code(self) -> u8 {
        match self {
            InfoKey::Density => 1,
            InfoKey::PrintSpeed => 2,
            InfoKey::LabelType => 3,
            InfoKey::LanguageType => 6,
            InfoKey::AutoShutdownTime => 7,
            InfoKey::DeviceType => 8,
            InfoKey::SoftVersion => 9,
            InfoKey::Battery => 10,
            InfoKey::DeviceSerial => 11,
            InfoKey::HardVersion => 12,
        }
    }

    /// Lowercase name used in CLI output.
    pub const fn name(self) -> &'static str {
        match self {
            InfoKey::Density => "density",
            InfoKey::PrintSpeed => "print_speed",
            InfoKey::LabelType => "label_type",
            InfoKey::LanguageType => "language_type",
            InfoKey::AutoShutdownTime => "auto_shutdown_time",
            InfoKey::DeviceType => "device_type",
            InfoKey::SoftVersion => "soft_version",
            InfoKey::Battery => "battery",
            InfoKey::DeviceSerial => "device_serial",
            InfoKey::HardVersion => "hard_version",
        }
    }
}

// ============================================================================
// PARAMETER RANGES
// ============================================================================

/// Valid label type values
pub const LABEL_TYPE_RANGE: std::ops::RangeInclusive<u8> = 1..=3;

/// Valid print density values
pub const DENSITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Reject a value outside `range` before anything reaches the wire.
pub fn check_range(what: &str, value: u8, range: std::ops::RangeInclusive<u8>) -> Result<u8> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(NiimbotError::InvalidParameter(format!(
            "{} must be between {} and {}, got {}",
            what,
            range.start(),
            range.end(),
            value
        )))
    }
}

// ============================================================================
// PAYLOAD BUILDERS
// ============================================================================

/// Payload carried by commands that take no argument.
pub const UNIT_PAYLOAD: [u8; 1] = [1];

/// `SET_DIMENSION` payload: two big-endian u16 values.
pub fn dimension_payload(first: u16, second: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.extend(first.to_be_bytes());
    data.extend(second.to_be_bytes());
    data
}

/// `SET_QUANTITY` payload: one big-endian u16.
pub fn quantity_payload(n: u16) -> Vec<u8> {
    n.to_be_bytes().to_vec()
}

/// Size of the per-line header preceding the packed pixels
pub const LINE_HEADER_LEN: usize = 6;

/// # Raster Line Packet
///
/// Builds the `PRINT_LINE` packet for one row of the bit matrix.
///
/// ## Layout
///
/// ```text
/// ┌──────────────┬────┬────┬────┬────┬──────────────────────┐
/// │ row (u16 BE) │ 00 │ 00 │ 00 │ 01 │ bits, MSB first, pad │
/// └──────────────┴────┴────┴────┴────┴──────────────────────┘
/// ```
pub fn line_packet(row: u16, bits: &[bool]) -> Packet {
    let packed = pack_row(bits);
    let mut payload = Vec::with_capacity(LINE_HEADER_LEN + packed.len());
    payload.extend(row.to_be_bytes());
    payload.extend([0, 0, 0, 1]);
    payload.extend(packed);
    Packet::new(RequestCode::PrintLine.code(), payload)
}

// ============================================================================
// RESPONSE PARSERS
// ============================================================================

/// Interpret a one-byte acknowledgement. An empty payload is a refusal.
pub fn parse_ack(payload: &[u8]) -> bool {
    payload.first().is_some_and(|&b| b != 0)
}

/// Progress reported by `GET_PRINT_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrintStatus {
    /// Number of pages printed so far
    pub page: u16,
    pub progress1: u8,
    pub progress2: u8,
}

impl PrintStatus {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(NiimbotError::MalformedPacket(format!(
                "print status needs 4 bytes, got {}",
                payload.len()
            )));
        }
        Ok(Self {
            page: u16::from_be_bytes([payload[0], payload[1]]),
            progress1: payload[2],
            progress2: payload[3],
        })
    }
}

/// # Heartbeat Status
///
/// Sensor readings reported by `HEARTBEAT`. Which fields are present, and at
/// which offsets, depends on the payload length the firmware sends:
///
/// | Length | closing | power | paper | rfid |
/// |--------|---------|-------|-------|------|
/// | 20     | -       | -     | 18    | 19   |
/// | 13     | 9       | 10    | 11    | 12   |
/// | 19     | 15      | 16    | 17    | 18   |
/// | 10     | 8       | 9     | -     | 8    |
/// | 9      | 8       | -     | -     | -    |
///
/// Any other length decodes with every field absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct HeartbeatStatus {
    pub closing_state: Option<u8>,
    pub power_level: Option<u8>,
    pub paper_state: Option<u8>,
    pub rfid_read_state: Option<u8>,
}

impl HeartbeatStatus {
    pub fn decode(payload: &[u8]) -> Self {
        let at = |i: usize| Some(payload[i]);
        match payload.len() {
            20 => Self {
                paper_state: at(18),
                rfid_read_state: at(19),
                ..Self::default()
            },
            13 => Self {
                closing_state: at(9),
                power_level: at(10),
                paper_state: at(11),
                rfid_read_state: at(12),
            },
            19 => Self {
                closing_state: at(15),
                power_level: at(16),
                paper_state: at(17),
                rfid_read_state: at(18),
            },
            // The 10-byte firmware reports lid and RFID state in the same byte
            10 => Self {
                closing_state: at(8),
                power_level: at(9),
                rfid_read_state: at(8),
                ..Self::default()
            },
            9 => Self {
                closing_state: at(8),
                ..Self::default()
            },
            _ => Self::default(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_code_values() {
        assert_eq!(RequestCode::GetInfo.code(), 64);
        assert_eq!(RequestCode::GetRfid.code(), 26);
        assert_eq!(RequestCode::Heartbeat.code(), 220);
        assert_eq!(RequestCode::SetLabelType.code(), 35);
        assert_eq!(RequestCode::SetLabelDensity.code(), 33);
        assert_eq!(RequestCode::StartPrint.code(), 1);
        assert_eq!(RequestCode::EndPrint.code(), 243);
        assert_eq!(RequestCode::StartPagePrint.code(), 3);
        assert_eq!(RequestCode::EndPagePrint.code(), 227);
        assert_eq!(RequestCode::AllowPrintClear.code(), 32);
        assert_eq!(RequestCode::SetDimension.code(), 19);
        assert_eq!(RequestCode::SetQuantity.code(), 21);
        assert_eq!(RequestCode::GetPrintStatus.code(), 163);
    }

    #[test]
    fn test_request_code_from_byte() {
        for code in RequestCode::ALL {
            assert_eq!(RequestCode::try_from(code.code()).unwrap(), code);
        }
        assert!(RequestCode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_info_key_values() {
        let codes: Vec<u8> = InfoKey::ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range("density", 1, DENSITY_RANGE).unwrap(), 1);
        assert_eq!(check_range("density", 5, DENSITY_RANGE).unwrap(), 5);
        assert!(check_range("density", 0, DENSITY_RANGE).is_err());
        assert!(check_range("density", 6, DENSITY_RANGE).is_err());
        assert!(check_range("label type", 4, LABEL_TYPE_RANGE).is_err());
    }

    #[test]
    fn test_dimension_payload_big_endian() {
        assert_eq!(dimension_payload(0x0102, 313), vec![0x01, 0x02, 0x01, 0x39]);
        assert_eq!(quantity_payload(2), vec![0x00, 0x02]);
    }

    #[test]
    fn test_line_packet_layout() {
        let bits = [true, false, true, false, false, false, false, false, true];
        let packet = line_packet(0x0203, &bits);
        assert_eq!(packet.kind, 0x85);
        assert_eq!(
            packet.payload,
            vec![0x02, 0x03, 0x00, 0x00, 0x00, 0x01, 0b1010_0000, 0b1000_0000]
        );
    }

    #[test]
    fn test_parse_ack() {
        assert!(parse_ack(&[1]));
        assert!(parse_ack(&[7, 0]));
        assert!(!parse_ack(&[0]));
        assert!(!parse_ack(&[]));
    }

    #[test]
    fn test_print_status_decode() {
        let status = PrintStatus::decode(&[0x00, 0x01, 0x64, 0x32]).unwrap();
        assert_eq!(
            status,
            PrintStatus {
                page: 1,
                progress1: 100,
                progress2: 50
            }
        );
        assert!(PrintStatus::decode(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_heartbeat_13_bytes() {
        let mut payload = vec![0u8; 13];
        payload[9] = 1;
        payload[10] = 4;
        payload[11] = 0;
        payload[12] = 1;
        assert_eq!(
            HeartbeatStatus::decode(&payload),
            HeartbeatStatus {
                closing_state: Some(1),
                power_level: Some(4),
                paper_state: Some(0),
                rfid_read_state: Some(1),
            }
        );
    }

    #[test]
    fn test_heartbeat_other_shapes() {
        let payload: Vec<u8> = (0..20).collect();
        let hb = HeartbeatStatus::decode(&payload);
        assert_eq!(hb.closing_state, None);
        assert_eq!(hb.power_level, None);
        assert_eq!(hb.paper_state, Some(18));
        assert_eq!(hb.rfid_read_state, Some(19));

        let hb = HeartbeatStatus::decode(&payload[..19]);
        assert_eq!(hb.closing_state, Some(15));
        assert_eq!(hb.rfid_read_state, Some(18));

        let hb = HeartbeatStatus::decode(&payload[..10]);
        assert_eq!(hb.closing_state, Some(8));
        assert_eq!(hb.power_level, Some(9));
        assert_eq!(hb.paper_state, None);
        assert_eq!(hb.rfid_read_state, Some(8));

        let hb = HeartbeatStatus::decode(&payload[..9]);
        assert_eq!(hb, HeartbeatStatus { closing_state: Some(8), ..Default::default() });
    }

    #[test]
    fn test_heartbeat_unknown_length() {
        assert_eq!(HeartbeatStatus::decode(&[1u8; 7]), HeartbeatStatus::default());
        assert_eq!(HeartbeatStatus::decode(&[]), HeartbeatStatus::default());
    }
}
