//! AMS/TCP frame encoding and stream reassembly.
//!
//! A frame on the wire is the 6-byte AMS/TCP header, the 32-byte
//! [`AmsHeader`] and a payload of `data_length` bytes. TCP may split one
//! frame across many reads or coalesce several frames into one, so
//! [`FrameCodec`] buffers input until a whole frame is present.
//!
//! The codec is used two ways:
//!
//! - as a [`tokio_util::codec::Decoder`]/[`Encoder`] inside `Framed`, which is
//!   how the session drives the socket;
//! - through [`FrameCodec::feed`], which accepts arbitrary chunks and returns
//!   every frame completed by them.
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::{AmsAddr, AmsFrame, FrameCodec};
//!
//! let target = AmsAddr::new("5.12.34.56.1.1".parse().unwrap(), 851);
//! let source = AmsAddr::new("10.0.0.2.1.1".parse().unwrap(), 32905);
//! let frame = AmsFrame::request(target, source, 4, 1, Vec::new());
//! let bytes = frame.to_bytes();
//!
//! let mut codec = FrameCodec::new();
//! assert!(codec.feed(&bytes[..20]).unwrap().is_empty());
//! let frames = codec.feed(&bytes[20..]).unwrap();
//! assert_eq!(frames, vec![frame]);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::CommandId;
use crate::error::{AdsError, Result};
use crate::header::{AmsAddr, AmsHeader, AMS_HEADER_SIZE, TCP_HEADER_SIZE};

/// Bytes before the payload: AMS/TCP header plus AMS header.
pub const FRAME_HEADER_SIZE: usize = TCP_HEADER_SIZE + AMS_HEADER_SIZE;

/// Largest payload accepted from the wire.
pub const MAX_DATA_LENGTH: usize = 16 * 1024 * 1024;

/// Absolute offset of the payload length inside a frame.
const DATA_LENGTH_OFFSET: usize = TCP_HEADER_SIZE + 20;

/// One decoded AMS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmsFrame {
    /// AMS header.
    pub header: AmsHeader,
    /// Command payload.
    pub payload: Bytes,
}

impl AmsFrame {
    /// Builds a request frame.
    pub fn request(
        target: AmsAddr,
        source: AmsAddr,
        command_id: u16,
        invoke_id: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        let header = AmsHeader::request(target, source, command_id, payload.len() as u32, invoke_id);
        Self { header, payload }
    }

    /// Returns the command id.
    pub fn command_id(&self) -> u16 {
        self.header.command_id
    }

    /// Returns the invoke id.
    pub fn invoke_id(&self) -> u32 {
        self.header.invoke_id
    }

    /// Returns whether this is a device notification.
    pub fn is_notification(&self) -> bool {
        self.header.command_id == CommandId::Notification as u16
    }

    /// Returns the encoded length of the frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Serializes the whole frame, transport header included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.put(&mut out);
        out
    }

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(0);
        buf.put_u32_le((AMS_HEADER_SIZE + self.payload.len()) as u32);
        let mut header = self.header;
        header.data_length = self.payload.len() as u32;
        header.put(buf);
        buf.put_slice(&self.payload);
    }
}

/// Incremental AMS/TCP frame decoder and encoder.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    /// Creates a codec with an empty reassembly buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every frame it completes, in order.
    ///
    /// A partial tail stays buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::Decode` if a frame carries a malformed header or
    /// announces a payload larger than [`MAX_DATA_LENGTH`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<AmsFrame>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut buffer = std::mem::take(&mut self.buffer);
        while let Some(frame) = self.decode(&mut buffer)? {
            frames.push(frame);
        }
        self.buffer = buffer;
        Ok(frames)
    }

    /// Returns the number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Decoder for FrameCodec {
    type Item = AmsFrame;
    type Error = AdsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<AmsFrame>> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut len_bytes = &src[DATA_LENGTH_OFFSET..DATA_LENGTH_OFFSET + 4];
        let data_length = len_bytes.get_u32_le() as usize;
        if data_length > MAX_DATA_LENGTH {
            return Err(AdsError::decode(format!(
                "frame announces {data_length} payload bytes, limit is {MAX_DATA_LENGTH}"
            )));
        }
        let total = FRAME_HEADER_SIZE + data_length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(TCP_HEADER_SIZE);
        let header = AmsHeader::from_bytes(&frame[..AMS_HEADER_SIZE])?;
        frame.advance(AMS_HEADER_SIZE);
        Ok(Some(AmsFrame {
            header,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<AmsFrame> for FrameCodec {
    type Error = AdsError;

    fn encode(&mut self, item: AmsFrame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.encoded_len());
        item.put(dst);
        Ok(())
    }
}
