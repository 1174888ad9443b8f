//! Simulated ADS device for session tests.
//!
//! [`Plc`] answers requests the way a TwinCAT runtime does for the handful
//! of index groups the client uses. Tests that need full control over
//! ordering and timing drive the raw [`Device`] end instead.

#![allow(dead_code)]

use beckhoff_ads::{index_group, AmsAddr, AmsFrame, AmsNetId, Client, ClientConfig, CommandId, FrameCodec};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Device end of an in-memory connection.
pub type Device = Framed<DuplexStream, FrameCodec>;

pub const INVALID_GROUP: u32 = 0x702;
pub const SERVICE_NOT_SUPPORTED: u32 = 0x701;
pub const SYMBOL_NOT_FOUND: u32 = 0x710;
pub const INVALID_HANDLE: u32 = 0x712;

const SYMBOL_HANDLE_BASE: u32 = 0x100;
const RESPONSE_FLAGS: u16 = 0x0005;

pub fn target_net_id() -> AmsNetId {
    AmsNetId::new(5, 12, 34, 56, 1, 1)
}

pub fn source_net_id() -> AmsNetId {
    AmsNetId::new(10, 0, 0, 2, 1, 1)
}

pub fn config() -> ClientConfig {
    ClientConfig::new("plc.local")
        .with_target_net_id(target_net_id())
        .with_source_net_id(source_net_id())
        .with_target_port(851)
}

/// Client wired to a raw device end.
pub fn pair(config: ClientConfig) -> (Client, Device) {
    let (local, remote) = duplex(64 * 1024);
    let client = Client::with_stream(config, local).unwrap();
    (client, Framed::new(remote, FrameCodec::new()))
}

pub async fn next_request(device: &mut Device) -> AmsFrame {
    device.next().await.unwrap().unwrap()
}

/// Response to `request` carrying `payload`.
pub fn reply(request: &AmsFrame, payload: impl Into<Bytes>) -> AmsFrame {
    let mut frame = AmsFrame::request(
        request.header.source,
        request.header.target,
        request.command_id(),
        request.invoke_id(),
        payload,
    );
    frame.header.state_flags = RESPONSE_FLAGS;
    frame
}

/// Result code only.
pub fn result(code: u32) -> Vec<u8> {
    code.to_le_bytes().to_vec()
}

/// Successful read or read/write payload.
pub fn read_ok(data: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(8 + data.len());
    out.put_u32_le(0);
    out.put_u32_le(data.len() as u32);
    out.put_slice(data);
    out.to_vec()
}

/// Notification payload for `(timestamp, [(notification handle, data)])` stamps.
pub fn notification_payload(stamps: Vec<(u64, Vec<(u32, Vec<u8>)>)>) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u32_le(stamps.len() as u32);
    for (timestamp, samples) in stamps {
        body.put_u64_le(timestamp);
        body.put_u32_le(samples.len() as u32);
        for (handle, data) in samples {
            body.put_u32_le(handle);
            body.put_u32_le(data.len() as u32);
            body.put_slice(&data);
        }
    }
    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32_le(body.len() as u32);
    out.put_slice(&body);
    out.to_vec()
}

/// Device notification frame addressed to the test client.
pub fn notification_frame(payload: Vec<u8>) -> AmsFrame {
    AmsFrame::request(
        AmsAddr::new(source_net_id(), 32905),
        AmsAddr::new(target_net_id(), 851),
        CommandId::Notification as u16,
        0,
        payload,
    )
}

/// One entry of a symbol upload blob.
pub fn symbol_entry(group: u32, offset: u32, size: u32, name: &str, ty: &str, comment: &str) -> Vec<u8> {
    let mut e = BytesMut::new();
    e.put_u32_le(0);
    e.put_u32_le(group);
    e.put_u32_le(offset);
    e.put_u32_le(size);
    e.put_u32_le(2);
    e.put_u32_le(8);
    for s in [name, ty, comment] {
        e.put_u16_le(s.len() as u16);
    }
    for s in [name, ty, comment] {
        e.put_slice(s.as_bytes());
        e.put_u8(0);
    }
    let len = e.len() as u32;
    e[0..4].copy_from_slice(&len.to_le_bytes());
    e.to_vec()
}

/// One entry of a datatype upload blob, children appended in order.
pub fn datatype_entry(name: &str, ty: &str, size: u32, offset: Option<u32>, children: Vec<Vec<u8>>) -> Vec<u8> {
    let mut e = BytesMut::new();
    e.put_u32_le(0);
    e.put_u32_le(1);
    e.put_u32_le(0);
    e.put_u32_le(0);
    e.put_u32_le(size);
    e.put_u32_le(offset.unwrap_or(0));
    e.put_u32_le(65);
    e.put_u32_le(if offset.is_some() { 2 } else { 0 });
    e.put_u16_le(name.len() as u16);
    e.put_u16_le(ty.len() as u16);
    e.put_u16_le(0);
    e.put_u16_le(0);
    e.put_u16_le(children.len() as u16);
    for s in [name, ty, ""] {
        e.put_slice(s.as_bytes());
        e.put_u8(0);
    }
    for child in children {
        e.put_slice(&child);
    }
    let len = e.len() as u32;
    e[0..4].copy_from_slice(&len.to_le_bytes());
    e.to_vec()
}

/// Simulated runtime with a symbol table and a request log.
#[derive(Debug, Default)]
pub struct Plc {
    symbols: Vec<(String, Vec<u8>)>,
    symbol_blob: Vec<u8>,
    datatype_blob: Vec<u8>,
    next_notification: u32,
    /// Names looked up through `GET_SYMHANDLE_BYNAME`, single or batched.
    pub lookups: Vec<String>,
    /// Symbol handles released, in order.
    pub released: Vec<u32>,
    /// Notifications added as (notification handle, group, offset, length).
    pub added: Vec<(u32, u32, u32, u32)>,
    /// Notification handles deleted, in order.
    pub deleted: Vec<u32>,
}

impl Plc {
    pub fn new() -> Self {
        Self {
            next_notification: 1,
            ..Self::default()
        }
    }

    pub fn with_symbol(mut self, name: &str, data: Vec<u8>) -> Self {
        self.symbols.push((name.to_owned(), data));
        self
    }

    pub fn with_upload(mut self, symbols: Vec<u8>, datatypes: Vec<u8>) -> Self {
        self.symbol_blob = symbols;
        self.datatype_blob = datatypes;
        self
    }

    pub fn symbol_handle(&self, name: &str) -> Option<u32> {
        self.symbols
            .iter()
            .position(|(n, _)| n == name)
            .map(|i| SYMBOL_HANDLE_BASE + i as u32)
    }

    pub fn memory(&self, name: &str) -> Option<&[u8]> {
        self.symbols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    fn memory_by_handle(&mut self, handle: u32) -> Option<&mut Vec<u8>> {
        let index = handle.checked_sub(SYMBOL_HANDLE_BASE)? as usize;
        self.symbols.get_mut(index).map(|(_, data)| data)
    }

    fn lookup(&mut self, name: &[u8]) -> Option<u32> {
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = String::from_utf8_lossy(&name[..end]).into_owned();
        let handle = self.symbol_handle(&name);
        self.lookups.push(name);
        handle
    }

    /// Answers one request.
    pub fn respond(&mut self, request: &AmsFrame) -> AmsFrame {
        let mut p = request.payload.clone();
        let payload = match CommandId::from_id(request.command_id()) {
            Some(CommandId::ReadDeviceInfo) => {
                let mut out = result(0);
                out.extend_from_slice(&[3, 1]);
                out.extend_from_slice(&4024u16.to_le_bytes());
                let mut name = b"Plc30 App".to_vec();
                name.resize(16, 0);
                out.extend_from_slice(&name);
                out
            }
            Some(CommandId::ReadState) => {
                let mut out = result(0);
                out.extend_from_slice(&[5, 0, 0, 0]);
                out
            }
            Some(CommandId::Read) => {
                let group = p.get_u32_le();
                let offset = p.get_u32_le();
                let length = p.get_u32_le() as usize;
                self.read(group, offset, length)
            }
            Some(CommandId::Write) => {
                let group = p.get_u32_le();
                let offset = p.get_u32_le();
                let length = p.get_u32_le() as usize;
                let data = p.copy_to_bytes(length);
                result(self.write(group, offset, &data))
            }
            Some(CommandId::ReadWrite) => {
                let group = p.get_u32_le();
                let offset = p.get_u32_le();
                let _read_length = p.get_u32_le();
                let length = p.get_u32_le() as usize;
                let data = p.copy_to_bytes(length);
                self.read_write(group, offset, &data)
            }
            Some(CommandId::AddNotification) => {
                let group = p.get_u32_le();
                let offset = p.get_u32_le();
                let length = p.get_u32_le();
                let handle = self.next_notification;
                self.next_notification += 1;
                self.added.push((handle, group, offset, length));
                let mut out = result(0);
                out.extend_from_slice(&handle.to_le_bytes());
                out
            }
            Some(CommandId::DeleteNotification) => {
                self.deleted.push(p.get_u32_le());
                result(0)
            }
            Some(CommandId::WriteControl) => result(0),
            _ => result(SERVICE_NOT_SUPPORTED),
        };
        reply(request, payload)
    }

    fn read(&mut self, group: u32, offset: u32, length: usize) -> Vec<u8> {
        match group {
            index_group::RW_SYMVAL_BYHANDLE => match self.memory_by_handle(offset) {
                Some(data) => {
                    let mut data = data.clone();
                    data.resize(length, 0);
                    read_ok(&data)
                }
                None => result(INVALID_HANDLE),
            },
            index_group::SYM_UPLOADINFO2 => {
                let mut info = BytesMut::new();
                info.put_u32_le(self.symbols.len() as u32);
                info.put_u32_le(self.symbol_blob.len() as u32);
                info.put_u32_le(0);
                info.put_u32_le(self.datatype_blob.len() as u32);
                info.put_u32_le(0);
                info.put_u32_le(0);
                read_ok(&info)
            }
            index_group::SYM_UPLOAD => read_ok(&self.symbol_blob[..length.min(self.symbol_blob.len())]),
            index_group::SYM_DT_UPLOAD => {
                read_ok(&self.datatype_blob[..length.min(self.datatype_blob.len())])
            }
            _ => result(INVALID_GROUP),
        }
    }

    fn write(&mut self, group: u32, offset: u32, data: &[u8]) -> u32 {
        match group {
            index_group::RELEASE_SYMHANDLE => {
                let handle = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                self.released.push(handle);
                0
            }
            index_group::RW_SYMVAL_BYHANDLE => match self.memory_by_handle(offset) {
                Some(memory) => {
                    let n = memory.len().min(data.len());
                    memory[..n].copy_from_slice(&data[..n]);
                    0
                }
                None => INVALID_HANDLE,
            },
            _ => INVALID_GROUP,
        }
    }

    fn read_write(&mut self, group: u32, offset: u32, data: &[u8]) -> Vec<u8> {
        match group {
            index_group::GET_SYMHANDLE_BYNAME => match self.lookup(data) {
                Some(handle) => read_ok(&handle.to_le_bytes()),
                None => result(SYMBOL_NOT_FOUND),
            },
            index_group::SUMUP_READWRITE => {
                let count = offset as usize;
                let mut headers = &data[..count * 16];
                let mut names = &data[count * 16..];
                let mut out_headers = BytesMut::new();
                let mut out_data = BytesMut::new();
                for _ in 0..count {
                    let _group = headers.get_u32_le();
                    let _offset = headers.get_u32_le();
                    let _read_length = headers.get_u32_le();
                    let write_length = headers.get_u32_le() as usize;
                    let name = names.copy_to_bytes(write_length);
                    match self.lookup(&name) {
                        Some(handle) => {
                            out_headers.put_u32_le(0);
                            out_headers.put_u32_le(4);
                            out_data.put_u32_le(handle);
                        }
                        None => {
                            out_headers.put_u32_le(SYMBOL_NOT_FOUND);
                            out_headers.put_u32_le(0);
                        }
                    }
                }
                out_headers.put_slice(&out_data);
                read_ok(&out_headers)
            }
            index_group::SUMUP_READ => {
                let count = offset as usize;
                let mut entries = &data[..count * 12];
                let mut codes = BytesMut::new();
                let mut values = BytesMut::new();
                for _ in 0..count {
                    let group = entries.get_u32_le();
                    let offset = entries.get_u32_le();
                    let length = entries.get_u32_le() as usize;
                    let answer = self.read(group, offset, length);
                    let mut response = &answer[..];
                    let code = response.get_u32_le();
                    codes.put_u32_le(code);
                    if code == 0 {
                        let _len = response.get_u32_le();
                        values.put_slice(&response[..length]);
                    } else {
                        values.put_bytes(0, length);
                    }
                }
                codes.put_slice(&values);
                read_ok(&codes)
            }
            index_group::SUMUP_WRITE => {
                let count = offset as usize;
                let mut entries = &data[..count * 12];
                let mut values = &data[count * 12..];
                let mut codes = BytesMut::new();
                for _ in 0..count {
                    let group = entries.get_u32_le();
                    let offset = entries.get_u32_le();
                    let length = entries.get_u32_le() as usize;
                    let value = values.copy_to_bytes(length);
                    codes.put_u32_le(self.write(group, offset, &value));
                }
                read_ok(&codes)
            }
            _ => result(INVALID_GROUP),
        }
    }
}

/// Runs `plc` on the device end until the client goes away.
///
/// Frames sent on the returned channel are written to the client as they
/// are, between responses.
pub fn spawn_plc(device: Device, plc: Plc) -> (JoinHandle<Plc>, mpsc::UnboundedSender<AmsFrame>) {
    let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<AmsFrame>();
    let task = tokio::spawn(async move {
        let mut device = device;
        let mut plc = plc;
        loop {
            tokio::select! {
                request = device.next() => {
                    let Some(Ok(request)) = request else { break };
                    let response = plc.respond(&request);
                    if device.send(response).await.is_err() {
                        break;
                    }
                }
                Some(frame) = inject_rx.recv() => {
                    if device.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        plc
    });
    (task, inject_tx)
}

/// Client connected to a running [`Plc`].
pub fn connect_plc(plc: Plc) -> (Client, JoinHandle<Plc>, mpsc::UnboundedSender<AmsFrame>) {
    let (client, device) = pair(config());
    let (task, inject) = spawn_plc(device, plc);
    (client, task, inject)
}
