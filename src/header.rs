//! AMS addressing and the AMS/TCP header structures.
//!
//! Every ADS frame on TCP starts with a 6-byte AMS/TCP header followed by a
//! 32-byte AMS header and the command payload.
//!
//! # AMS/TCP Header
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | Reserved | Always 0 |
//! | 2-5 | Length | AMS header length (32) + payload length |
//!
//! # AMS Header
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-5 | Target net id | Dotted octets of the target |
//! | 6-7 | Target port | AMS port of the target runtime |
//! | 8-13 | Source net id | Dotted octets of this client |
//! | 14-15 | Source port | AMS port of this client |
//! | 16-17 | Command id | See [`CommandId`](crate::CommandId) |
//! | 18-19 | State flags | Request/response and transport flags |
//! | 20-23 | Data length | Payload length |
//! | 24-27 | Error code | ADS return code of the frame |
//! | 28-31 | Invoke id | Request/response correlation number |
//!
//! All integers are little-endian.
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::{AmsAddr, AmsHeader, AmsNetId};
//!
//! let target = AmsAddr::new("5.12.34.56.1.1".parse().unwrap(), 851);
//! let source = AmsAddr::new("192.168.1.20.1.1".parse().unwrap(), 32905);
//!
//! let header = AmsHeader::request(target, source, 2, 12, 1);
//! assert_eq!(header.to_bytes().len(), 32);
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};

use crate::error::{AdsError, Result};

/// AMS/TCP header size in bytes.
pub const TCP_HEADER_SIZE: usize = 6;

/// AMS header size in bytes.
pub const AMS_HEADER_SIZE: usize = 32;

/// State flag: ADS command over TCP.
pub const STATE_FLAG_REQUEST: u16 = 0x0004;

/// State flag bit marking a response.
pub const STATE_FLAG_RESPONSE: u16 = 0x0001;

/// AMS net id: six dotted octets, e.g. `5.12.34.56.1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AmsNetId(pub [u8; 6]);

impl AmsNetId {
    /// Creates a net id from its six octets.
    pub fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self([a, b, c, d, e, f])
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for AmsNetId {
    type Err = AdsError;

    /// Parses a dotted net id.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::InvalidAddress` if the string does not hold exactly
    /// six octets in the range 0-255.
    fn from_str(s: &str) -> Result<Self> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split('.') {
            if count >= 6 {
                return Err(AdsError::invalid_address(format!(
                    "net id {s:?} has more than 6 octets"
                )));
            }
            octets[count] = part.parse::<u8>().map_err(|_| {
                AdsError::invalid_address(format!("invalid octet {part:?} in net id {s:?}"))
            })?;
            count += 1;
        }
        if count != 6 {
            return Err(AdsError::invalid_address(format!(
                "net id {s:?} has {count} octets, expected 6"
            )));
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for AmsNetId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for AmsNetId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Full AMS address: net id plus AMS port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AmsAddr {
    /// Net id of the node.
    pub net_id: AmsNetId,
    /// AMS port of the runtime or client.
    pub port: u16,
}

impl AmsAddr {
    /// Creates a new AMS address.
    pub fn new(net_id: AmsNetId, port: u16) -> Self {
        Self { net_id, port }
    }

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.net_id.0);
        buf.put_u16_le(self.port);
    }

    fn get(buf: &mut impl Buf) -> Self {
        let mut octets = [0u8; 6];
        buf.copy_to_slice(&mut octets);
        let port = buf.get_u16_le();
        Self::new(AmsNetId(octets), port)
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

/// AMS header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmsHeader {
    /// Address the frame is sent to.
    pub target: AmsAddr,
    /// Address the frame comes from.
    pub source: AmsAddr,
    /// ADS command id.
    pub command_id: u16,
    /// State flags (0x0004 for requests; responses also set bit 0).
    pub state_flags: u16,
    /// Length of the payload following the header.
    pub data_length: u32,
    /// ADS return code of the frame.
    pub error_code: u32,
    /// Correlation number chosen by the client.
    pub invoke_id: u32,
}

impl AmsHeader {
    /// Creates a request header.
    ///
    /// # Arguments
    ///
    /// * `target` - Address of the PLC runtime
    /// * `source` - Address of this client
    /// * `command_id` - ADS command id
    /// * `data_length` - Payload length in bytes
    /// * `invoke_id` - Correlation number
    pub fn request(
        target: AmsAddr,
        source: AmsAddr,
        command_id: u16,
        data_length: u32,
        invoke_id: u32,
    ) -> Self {
        Self {
            target,
            source,
            command_id,
            state_flags: STATE_FLAG_REQUEST,
            data_length,
            error_code: 0,
            invoke_id,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; AMS_HEADER_SIZE] {
        let mut out = [0u8; AMS_HEADER_SIZE];
        let mut buf = &mut out[..];
        self.put(&mut buf);
        out
    }

    pub(crate) fn put(&self, buf: &mut impl BufMut) {
        self.target.put(buf);
        self.source.put(buf);
        buf.put_u16_le(self.command_id);
        buf.put_u16_le(self.state_flags);
        buf.put_u32_le(self.data_length);
        buf.put_u32_le(self.error_code);
        buf.put_u32_le(self.invoke_id);
    }

    /// Parses a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::Decode` if the slice is shorter than 32 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < AMS_HEADER_SIZE {
            return Err(AdsError::decode(format!(
                "AMS header too short: expected {} bytes, got {}",
                AMS_HEADER_SIZE,
                data.len()
            )));
        }
        let mut buf = &data[..AMS_HEADER_SIZE];
        Ok(Self {
            target: AmsAddr::get(&mut buf),
            source: AmsAddr::get(&mut buf),
            command_id: buf.get_u16_le(),
            state_flags: buf.get_u16_le(),
            data_length: buf.get_u32_le(),
            error_code: buf.get_u32_le(),
            invoke_id: buf.get_u32_le(),
        })
    }

    /// Returns whether the response flag is set.
    pub fn is_response(&self) -> bool {
        self.state_flags & STATE_FLAG_RESPONSE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (AmsAddr, AmsAddr) {
        (
            AmsAddr::new(AmsNetId::new(5, 12, 34, 56, 1, 1), 851),
            AmsAddr::new(AmsNetId::new(192, 168, 1, 20, 1, 1), 32905),
        )
    }

    #[test]
    fn test_net_id_parse() {
        let id: AmsNetId = "5.12.34.56.1.1".parse().unwrap();
        assert_eq!(id.octets(), [5, 12, 34, 56, 1, 1]);
        assert_eq!(id.to_string(), "5.12.34.56.1.1");
    }

    #[test]
    fn test_net_id_wrong_octet_count() {
        assert!("5.12.34.56.1".parse::<AmsNetId>().is_err());
        assert!("5.12.34.56.1.1.1".parse::<AmsNetId>().is_err());
        assert!("".parse::<AmsNetId>().is_err());
    }

    #[test]
    fn test_net_id_bad_octet() {
        assert!("5.12.34.56.1.256".parse::<AmsNetId>().is_err());
        assert!("5.12.x.56.1.1".parse::<AmsNetId>().is_err());
    }

    #[test]
    fn test_header_to_bytes() {
        let (target, source) = addrs();
        let header = AmsHeader::request(target, source, 2, 12, 0x0102_0304);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..6], &[5, 12, 34, 56, 1, 1]);
        assert_eq!(&bytes[6..8], &851u16.to_le_bytes());
        assert_eq!(&bytes[8..14], &[192, 168, 1, 20, 1, 1]);
        assert_eq!(&bytes[14..16], &32905u16.to_le_bytes());
        assert_eq!(&bytes[16..18], &[2, 0]);
        assert_eq!(&bytes[18..20], &[4, 0]);
        assert_eq!(&bytes[20..24], &[12, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
        assert_eq!(&bytes[28..32], &[4, 3, 2, 1]);
    }

    #[test]
    fn test_header_from_bytes_too_short() {
        assert!(AmsHeader::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_header_roundtrip() {
        let (target, source) = addrs();
        let mut header = AmsHeader::request(target, source, 9, 100, 42);
        header.state_flags = STATE_FLAG_REQUEST | STATE_FLAG_RESPONSE;
        header.error_code = 1808;
        let parsed = AmsHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_response());
    }
}
