//! Sum commands: many sub-requests in one read/write round trip.
//!
//! All three batches are read/write requests whose index offset carries the
//! number of entries.
//!
//! | Batch | Index group | Write data | Read data |
//! |-------|-------------|------------|-----------|
//! | get handles | `SUMUP_READWRITE` | n × (group, offset, read len, write len), names | n × (error, len), handles |
//! | multi read | `SUMUP_READ` | n × (group, offset, len) | n × error, data |
//! | multi write | `SUMUP_WRITE` | n × (group, offset, len), data | n × error |
//!
//! Handles without a data address (a symbol whose name did not resolve) are
//! left out of the request and keep their own error.

use bytes::{BufMut, BytesMut};

use crate::command::{index_group, ReadWriteRequest};
use crate::error::{AdsError, Result};
use crate::handle::Handle;
use crate::response::PayloadReader;

/// A sum request plus the positions of the handles it covers.
#[derive(Debug, Clone)]
pub(crate) struct Batch {
    pub(crate) indices: Vec<usize>,
    pub(crate) request: ReadWriteRequest,
}

/// Latin-1 bytes of a symbol name with a trailing NUL.
pub(crate) fn nul_terminated(name: &str) -> Vec<u8> {
    let mut out: Vec<u8> = name
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    out.push(0);
    out
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AdsError::invalid_parameter(what, "exceeds 32 bits"))
}

/// Builds one symbol handle lookup for every handle that still needs one.
pub(crate) fn get_handles_request(handles: &[Handle]) -> Result<Option<Batch>> {
    let indices: Vec<usize> = handles
        .iter()
        .enumerate()
        .filter(|(_, h)| h.needs_symbol_handle())
        .map(|(i, _)| i)
        .collect();
    if indices.is_empty() {
        return Ok(None);
    }

    let names: Vec<Vec<u8>> = indices
        .iter()
        .filter_map(|&i| handles[i].symbol_name().map(nul_terminated))
        .collect();
    let name_bytes: usize = names.iter().map(Vec::len).sum();
    let mut data = BytesMut::with_capacity(16 * names.len() + name_bytes);
    for name in &names {
        data.put_u32_le(index_group::GET_SYMHANDLE_BYNAME);
        data.put_u32_le(0);
        data.put_u32_le(4);
        data.put_u32_le(to_u32(name.len(), "symbol name")?);
    }
    for name in &names {
        data.put_slice(name);
    }

    let count = to_u32(indices.len(), "handles")?;
    Ok(Some(Batch {
        indices,
        request: ReadWriteRequest::new(index_group::SUMUP_READWRITE, count, count * 12, data.freeze()),
    }))
}

/// Stores the looked up symbol handles and per-entry errors.
///
/// Each stored symbol handle is also pushed onto `resolved`. A malformed
/// entry leaves its handle unresolved; the first one is returned as the
/// error once every entry has been applied.
pub(crate) fn apply_get_handles(
    handles: &mut [Handle],
    indices: &[usize],
    data: &[u8],
    resolved: &mut Vec<u32>,
) -> Result<()> {
    let mut header = PayloadReader::new(data);
    let mut values = PayloadReader::at(data, indices.len() * 8);
    let mut malformed = None;
    for &i in indices {
        let code = header.u32()?;
        let len = header.u32()? as usize;
        let bytes = values.take(len)?;
        let handle = &mut handles[i];
        if code != 0 {
            handle.set_error(Some(code));
            continue;
        }
        match <[u8; 4]>::try_from(bytes) {
            Ok(raw) => {
                let symbol_handle = u32::from_le_bytes(raw);
                handle.set_symbol_handle(Some(symbol_handle));
                handle.set_error(None);
                resolved.push(symbol_handle);
            }
            Err(_) => {
                malformed.get_or_insert_with(|| {
                    AdsError::decode(format!("symbol handle of {len} bytes, expected 4"))
                });
            }
        }
    }
    malformed.map_or(Ok(()), Err)
}

fn addressed(handles: &[Handle]) -> Vec<(usize, u32, u32)> {
    handles
        .iter()
        .enumerate()
        .filter_map(|(i, h)| h.data_address().map(|(g, o)| (i, g, o)))
        .collect()
}

/// Builds one sum read over every addressable handle.
pub(crate) fn multi_read_request(handles: &[Handle]) -> Result<Option<Batch>> {
    let entries = addressed(handles);
    if entries.is_empty() {
        return Ok(None);
    }
    let mut data = BytesMut::with_capacity(12 * entries.len());
    let mut read_length = 0usize;
    for &(i, group, offset) in &entries {
        let len = handles[i].byte_length();
        data.put_u32_le(group);
        data.put_u32_le(offset);
        data.put_u32_le(to_u32(len, "byte length")?);
        read_length += len + 4;
    }
    let count = to_u32(entries.len(), "handles")?;
    Ok(Some(Batch {
        indices: entries.into_iter().map(|(i, _, _)| i).collect(),
        request: ReadWriteRequest::new(
            index_group::SUMUP_READ,
            count,
            to_u32(read_length, "read length")?,
            data.freeze(),
        ),
    }))
}

/// Decodes a sum read result into the handles.
///
/// Handles whose entry reports an error keep their previous values.
pub(crate) fn apply_multi_read(handles: &mut [Handle], indices: &[usize], data: &[u8]) -> Result<()> {
    let mut codes = PayloadReader::new(data);
    let mut values = PayloadReader::at(data, indices.len() * 4);
    for &i in indices {
        let code = codes.u32()?;
        let handle = &mut handles[i];
        let bytes = values.take(handle.byte_length())?;
        handle.set_error(Some(code));
        if code == 0 {
            handle.decode_into(bytes);
        }
    }
    Ok(())
}

/// Builds one sum write of every addressable handle's bound values.
///
/// # Errors
///
/// Fails if any included handle cannot encode its values.
pub(crate) fn multi_write_request(handles: &[Handle]) -> Result<Option<Batch>> {
    let entries = addressed(handles);
    if entries.is_empty() {
        return Ok(None);
    }
    let mut payloads = Vec::with_capacity(entries.len());
    for &(i, _, _) in &entries {
        payloads.push(handles[i].encode()?);
    }
    let value_bytes: usize = payloads.iter().map(Vec::len).sum();
    let mut data = BytesMut::with_capacity(12 * entries.len() + value_bytes);
    for (&(_, group, offset), payload) in entries.iter().zip(&payloads) {
        data.put_u32_le(group);
        data.put_u32_le(offset);
        data.put_u32_le(to_u32(payload.len(), "byte length")?);
    }
    for payload in &payloads {
        data.put_slice(payload);
    }
    let count = to_u32(entries.len(), "handles")?;
    Ok(Some(Batch {
        indices: entries.into_iter().map(|(i, _, _)| i).collect(),
        request: ReadWriteRequest::new(index_group::SUMUP_WRITE, count, count * 4, data.freeze()),
    }))
}

/// Stores the per-entry results of a sum write.
pub(crate) fn apply_multi_write(handles: &mut [Handle], indices: &[usize], data: &[u8]) -> Result<()> {
    let mut codes = PayloadReader::new(data);
    for &i in indices {
        handles[i].set_error(Some(codes.u32()?));
    }
    Ok(())
}
