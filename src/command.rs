//! ADS command ids and request payloads.
//!
//! Each request type serializes only its payload. The session wraps it in
//! an [`AmsFrame`](crate::AmsFrame) with the configured addresses and a fresh
//! invoke id.
//!
//! # Commands
//!
//! | Id | Command | Request payload |
//! |----|---------|-----------------|
//! | 1 | Read device info | empty |
//! | 2 | Read | group, offset, length |
//! | 3 | Write | group, offset, length, data |
//! | 4 | Read state | empty |
//! | 5 | Write control | ADS state, device state, length, data |
//! | 6 | Add notification | group, offset, length, mode, max delay, cycle time, 16 reserved bytes |
//! | 7 | Delete notification | notification handle |
//! | 8 | Notification | sent by the device only |
//! | 9 | Read/write | group, offset, read length, write length, data |
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::{index_group, ReadRequest, Request};
//!
//! let req = ReadRequest::new(index_group::RW_SYMVAL_BYHANDLE, 0x1234, 4);
//! assert_eq!(req.to_bytes().len(), 12);
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

/// ADS command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    /// Read name and version of the device.
    ReadDeviceInfo = 1,
    /// Read data by index group and offset.
    Read = 2,
    /// Write data by index group and offset.
    Write = 3,
    /// Read ADS and device state.
    ReadState = 4,
    /// Change ADS and device state.
    WriteControl = 5,
    /// Register a device notification.
    AddNotification = 6,
    /// Remove a device notification.
    DeleteNotification = 7,
    /// Device notification samples.
    Notification = 8,
    /// Write data and read the result in one round trip.
    ReadWrite = 9,
}

impl CommandId {
    /// Looks up a command by its wire id.
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            1 => Self::ReadDeviceInfo,
            2 => Self::Read,
            3 => Self::Write,
            4 => Self::ReadState,
            5 => Self::WriteControl,
            6 => Self::AddNotification,
            7 => Self::DeleteNotification,
            8 => Self::Notification,
            9 => Self::ReadWrite,
            _ => return None,
        })
    }

    /// Returns a human readable name, used in trace output.
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadDeviceInfo => "read device info",
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadState => "read state",
            Self::WriteControl => "write control",
            Self::AddNotification => "add notification",
            Self::DeleteNotification => "delete notification",
            Self::Notification => "notification",
            Self::ReadWrite => "read/write",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Returns the name of a raw command id, or `"unknown"`.
pub(crate) fn describe_command(id: u16) -> &'static str {
    CommandId::from_id(id).map_or("unknown", CommandId::description)
}

/// Reserved ADS index groups.
pub mod index_group {
    /// Symbol table.
    pub const SYMTAB: u32 = 0xF000;
    /// Symbol name.
    pub const SYMNAME: u32 = 0xF001;
    /// Symbol value.
    pub const SYMVAL: u32 = 0xF002;
    /// Get a symbol handle by name.
    pub const GET_SYMHANDLE_BYNAME: u32 = 0xF003;
    /// Read a symbol value by name.
    pub const READ_SYMVAL_BYNAME: u32 = 0xF004;
    /// Read or write a symbol value by handle.
    pub const RW_SYMVAL_BYHANDLE: u32 = 0xF005;
    /// Release a symbol handle.
    pub const RELEASE_SYMHANDLE: u32 = 0xF006;
    /// Symbol info by name.
    pub const SYM_INFOBYNAME: u32 = 0xF007;
    /// Symbol table version.
    pub const SYM_VERSION: u32 = 0xF008;
    /// Extended symbol info by name.
    pub const SYM_INFOBYNAMEEX: u32 = 0xF009;
    /// Symbol download.
    pub const SYM_DOWNLOAD: u32 = 0xF00A;
    /// Symbol table upload.
    pub const SYM_UPLOAD: u32 = 0xF00B;
    /// Symbol upload info.
    pub const SYM_UPLOADINFO: u32 = 0xF00C;
    /// Symbol download, version 2.
    pub const SYM_DOWNLOAD2: u32 = 0xF00D;
    /// Datatype table upload.
    pub const SYM_DT_UPLOAD: u32 = 0xF00E;
    /// Symbol and datatype upload info, version 2.
    pub const SYM_UPLOADINFO2: u32 = 0xF00F;
    /// Notification of named handle.
    pub const SYMNOTE: u32 = 0xF010;
    /// Input image bytes.
    pub const IOIMAGE_RWIB: u32 = 0xF020;
    /// Input image bit.
    pub const IOIMAGE_RWIX: u32 = 0xF021;
    /// Input image size in bytes.
    pub const IOIMAGE_RISIZE: u32 = 0xF025;
    /// Output image bytes.
    pub const IOIMAGE_RWOB: u32 = 0xF030;
    /// Output image bit.
    pub const IOIMAGE_RWOX: u32 = 0xF031;
    /// Clear inputs.
    pub const IOIMAGE_CLEARI: u32 = 0xF040;
    /// Clear outputs.
    pub const IOIMAGE_CLEARO: u32 = 0xF050;
    /// Read inputs and write outputs.
    pub const IOIMAGE_RWIOB: u32 = 0xF060;
    /// Sum read; the offset carries the entry count.
    pub const SUMUP_READ: u32 = 0xF080;
    /// Sum write; the offset carries the entry count.
    pub const SUMUP_WRITE: u32 = 0xF081;
    /// Sum read/write; the offset carries the entry count.
    pub const SUMUP_READWRITE: u32 = 0xF082;
    /// Sum read returning lengths.
    pub const SUMUP_READEX: u32 = 0xF083;
    /// Sum read returning lengths and error codes.
    pub const SUMUP_READEX2: u32 = 0xF084;
    /// Sum add notification.
    pub const SUMUP_ADDDEVNOTE: u32 = 0xF085;
    /// Sum delete notification.
    pub const SUMUP_DELDEVNOTE: u32 = 0xF086;
    /// Device data (state, name).
    pub const DEVICE_DATA: u32 = 0xF100;
}

/// Notification transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum TransmissionMode {
    /// Sample every cycle.
    Cyclic = 3,
    /// Sample when the value changes.
    #[default]
    OnChange = 4,
}

/// ADS state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
#[allow(missing_docs)]
pub enum AdsState {
    Invalid = 0,
    Idle = 1,
    Reset = 2,
    Init = 3,
    Start = 4,
    Run = 5,
    Stop = 6,
    SaveCfg = 7,
    LoadCfg = 8,
    PowerFailure = 9,
    PowerGood = 10,
    Error = 11,
    Shutdown = 12,
    Suspend = 13,
    Resume = 14,
    Config = 15,
    Reconfig = 16,
    Stopping = 17,
}

impl AdsState {
    /// Looks up a state by its wire id.
    ///
    /// # Example
    ///
    /// ```
    /// use beckhoff_ads::AdsState;
    ///
    /// assert_eq!(AdsState::from_id(5), Some(AdsState::Run));
    /// assert_eq!(AdsState::from_id(18), None);
    /// ```
    pub fn from_id(id: u16) -> Option<Self> {
        const STATES: [AdsState; 18] = [
            AdsState::Invalid,
            AdsState::Idle,
            AdsState::Reset,
            AdsState::Init,
            AdsState::Start,
            AdsState::Run,
            AdsState::Stop,
            AdsState::SaveCfg,
            AdsState::LoadCfg,
            AdsState::PowerFailure,
            AdsState::PowerGood,
            AdsState::Error,
            AdsState::Shutdown,
            AdsState::Suspend,
            AdsState::Resume,
            AdsState::Config,
            AdsState::Reconfig,
            AdsState::Stopping,
        ];
        STATES.get(usize::from(id)).copied()
    }
}

/// Converts a duration to the 100 ns units used by notification timing.
pub(crate) fn to_ads_ticks(duration: Duration) -> u32 {
    u32::try_from(duration.as_nanos() / 100).unwrap_or(u32::MAX)
}

/// Serializable ADS request payload.
pub trait Request {
    /// Command this payload belongs to.
    const COMMAND: CommandId;

    /// Serializes the payload.
    fn to_bytes(&self) -> Bytes;
}

/// Empty payload for read device info.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadDeviceInfoRequest;

impl Request for ReadDeviceInfoRequest {
    const COMMAND: CommandId = CommandId::ReadDeviceInfo;

    fn to_bytes(&self) -> Bytes {
        Bytes::new()
    }
}

/// Empty payload for read state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadStateRequest;

impl Request for ReadStateRequest {
    const COMMAND: CommandId = CommandId::ReadState;

    fn to_bytes(&self) -> Bytes {
        Bytes::new()
    }
}

/// Read `length` bytes at an index group and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// Index group.
    pub index_group: u32,
    /// Index offset.
    pub index_offset: u32,
    /// Number of bytes to read.
    pub length: u32,
}

impl ReadRequest {
    /// Creates a read request.
    pub fn new(index_group: u32, index_offset: u32, length: u32) -> Self {
        Self {
            index_group,
            index_offset,
            length,
        }
    }
}

impl Request for ReadRequest {
    const COMMAND: CommandId = CommandId::Read;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u32_le(self.index_group);
        buf.put_u32_le(self.index_offset);
        buf.put_u32_le(self.length);
        buf.freeze()
    }
}

/// Write bytes at an index group and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    /// Index group.
    pub index_group: u32,
    /// Index offset.
    pub index_offset: u32,
    /// Data to write.
    pub data: Bytes,
}

impl WriteRequest {
    /// Creates a write request.
    pub fn new(index_group: u32, index_offset: u32, data: impl Into<Bytes>) -> Self {
        Self {
            index_group,
            index_offset,
            data: data.into(),
        }
    }
}

impl Request for WriteRequest {
    const COMMAND: CommandId = CommandId::Write;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.data.len());
        buf.put_u32_le(self.index_group);
        buf.put_u32_le(self.index_offset);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// Write bytes and read `read_length` bytes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteRequest {
    /// Index group.
    pub index_group: u32,
    /// Index offset.
    pub index_offset: u32,
    /// Number of bytes expected back.
    pub read_length: u32,
    /// Data to write.
    pub data: Bytes,
}

impl ReadWriteRequest {
    /// Creates a read/write request.
    pub fn new(index_group: u32, index_offset: u32, read_length: u32, data: impl Into<Bytes>) -> Self {
        Self {
            index_group,
            index_offset,
            read_length,
            data: data.into(),
        }
    }
}

impl Request for ReadWriteRequest {
    const COMMAND: CommandId = CommandId::ReadWrite;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16 + self.data.len());
        buf.put_u32_le(self.index_group);
        buf.put_u32_le(self.index_offset);
        buf.put_u32_le(self.read_length);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// Change the ADS state and device state of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteControlRequest {
    /// Requested ADS state.
    pub ads_state: u16,
    /// Requested device state.
    pub device_state: u16,
    /// Additional data.
    pub data: Bytes,
}

impl Request for WriteControlRequest {
    const COMMAND: CommandId = CommandId::WriteControl;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.data.len());
        buf.put_u16_le(self.ads_state);
        buf.put_u16_le(self.device_state);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// Register a notification on an index group and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddNotificationRequest {
    /// Index group.
    pub index_group: u32,
    /// Index offset.
    pub index_offset: u32,
    /// Number of bytes per sample.
    pub length: u32,
    /// Cyclic or on change.
    pub mode: TransmissionMode,
    /// Longest time the device may hold a sample back.
    pub max_delay: Duration,
    /// Sampling period.
    pub cycle_time: Duration,
}

impl Request for AddNotificationRequest {
    const COMMAND: CommandId = CommandId::AddNotification;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_u32_le(self.index_group);
        buf.put_u32_le(self.index_offset);
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.mode as u32);
        buf.put_u32_le(to_ads_ticks(self.max_delay));
        buf.put_u32_le(to_ads_ticks(self.cycle_time));
        buf.put_bytes(0, 16);
        buf.freeze()
    }
}

/// Remove a notification by its device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteNotificationRequest {
    /// Notification handle assigned by the device.
    pub notification_handle: u32,
}

impl Request for DeleteNotificationRequest {
    const COMMAND: CommandId = CommandId::DeleteNotification;

    fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.notification_handle.to_le_bytes())
    }
}
