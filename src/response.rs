//! ADS response payload parsing.
//!
//! Every response payload starts with a 4-byte ADS result code. A nonzero
//! result becomes [`AdsError::Device`] and the rest of the payload is ignored.
//!
//! # Response Structure
//!
//! | Command | Layout after the result code |
//! |---------|------------------------------|
//! | Read device info | major u8, minor u8, build u16, 16-byte NUL-padded name |
//! | Read | length u32, data |
//! | Write | nothing |
//! | Read state | ADS state u16, device state u16 |
//! | Write control | nothing |
//! | Add notification | notification handle u32 |
//! | Delete notification | nothing |
//! | Read/write | length u32, data |
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::response::parse_read_data;
//!
//! let payload = [0, 0, 0, 0, 2, 0, 0, 0, 0x34, 0x12];
//! let data = parse_read_data(&payload).unwrap();
//! assert_eq!(&data[..], &[0x34, 0x12]);
//! ```

use bytes::Bytes;

use crate::command::AdsState;
use crate::error::{check_code, AdsError, Result};

/// Name and version of an ADS device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Major version.
    pub major_version: u8,
    /// Minor version.
    pub minor_version: u8,
    /// Build number.
    pub version_build: u16,
    /// Device name.
    pub device_name: String,
}

/// ADS state and device state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceState {
    /// Raw ADS state.
    pub ads_state: u16,
    /// Device specific state.
    pub device_state: u16,
}

impl DeviceState {
    /// Returns the typed ADS state, if the raw value is known.
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::{AdsState, DeviceState};
    ///
    /// let state = DeviceState { ads_state: 5, device_state: 0 };
    /// assert_eq!(state.state(), Some(AdsState::Run));
    /// ```
    pub fn state(&self) -> Option<AdsState> {
        AdsState::from_id(self.ads_state)
    }
}

/// Bounds-checked little-endian cursor over a payload.
#[derive(Debug, Clone)]
pub(crate) struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                AdsError::decode(format!(
                    "need {} bytes at offset {}, payload has {}",
                    len,
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_le_bytes)
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }
}

/// Decodes latin-1 bytes up to the first NUL.
pub(crate) fn latin1_until_nul(data: &[u8]) -> String {
    data.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Checks the leading result code of a payload.
///
/// # Errors
///
/// Returns `AdsError::Device` for a nonzero result and `AdsError::Decode`
/// if the payload is shorter than 4 bytes.
pub fn parse_result(payload: &[u8]) -> Result<()> {
    let code = PayloadReader::new(payload).u32()?;
    check_code(code)
}

/// Parses a read device info response.
///
/// # Example
///
/// ```
/// use beckhoff_ads::response::parse_device_info;
///
/// let mut payload = vec![0, 0, 0, 0, 3, 1, 0xD0, 0x0F];
/// payload.extend_from_slice(b"Plc30 App\0\0\0\0\0\0\0");
/// let info = parse_device_info(&payload).unwrap();
/// assert_eq!(info.device_name, "Plc30 App");
/// assert_eq!(info.version_build, 4048);
/// ```
pub fn parse_device_info(payload: &[u8]) -> Result<DeviceInfo> {
    let mut reader = PayloadReader::new(payload);
    check_code(reader.u32()?)?;
    let major_version = reader.u8()?;
    let minor_version = reader.u8()?;
    let version_build = reader.u16()?;
    let rest = reader.take(reader.remaining())?;
    Ok(DeviceInfo {
        major_version,
        minor_version,
        version_build,
        device_name: latin1_until_nul(rest),
    })
}

/// Parses a read state response.
pub fn parse_device_state(payload: &[u8]) -> Result<DeviceState> {
    let mut reader = PayloadReader::new(payload);
    check_code(reader.u32()?)?;
    Ok(DeviceState {
        ads_state: reader.u16()?,
        device_state: reader.u16()?,
    })
}

/// Parses a read or read/write response and returns its data.
///
/// # Errors
///
/// Returns `AdsError::Decode` if the declared length exceeds the payload.
pub fn parse_read_data(payload: &[u8]) -> Result<Bytes> {
    let mut reader = PayloadReader::new(payload);
    check_code(reader.u32()?)?;
    let length = reader.u32()? as usize;
    let data = reader.take(length)?;
    Ok(Bytes::copy_from_slice(data))
}

/// Parses an add notification response and returns the notification handle.
pub fn parse_notification_handle(payload: &[u8]) -> Result<u32> {
    let mut reader = PayloadReader::new(payload);
    check_code(reader.u32()?)?;
    reader.u32()
}
