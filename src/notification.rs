//! Device notification registry and sample decoding.
//!
//! After an add-notification succeeds, the device pushes samples tagged with
//! the notification handle it assigned. The registry maps those handles back
//! to client [`Handle`]s and keeps the list of subscriptions that still have
//! to be deleted on teardown.
//!
//! # Notification Payload
//!
//! | Field | Size |
//! |-------|------|
//! | length | 4 |
//! | stamp count | 4 |
//! | per stamp: timestamp | 8 |
//! | per stamp: sample count | 4 |
//! | per sample: notification handle | 4 |
//! | per sample: data length | 4 |
//! | per sample: data | n |

use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::handle::Handle;
use crate::response::PayloadReader;

/// One value pushed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSample {
    /// Raw 64-bit timestamp of the stamp the sample belongs to.
    pub timestamp: u64,
    /// Device notification handle.
    pub notification_handle: u32,
    /// Sample data.
    pub data: Bytes,
}

/// Splits a notification payload into its samples.
///
/// # Errors
///
/// Returns `AdsError::Decode` if the payload is shorter than its stamp and
/// sample headers claim.
pub fn parse_notification_samples(payload: &[u8]) -> Result<Vec<NotificationSample>> {
    let mut reader = PayloadReader::new(payload);
    let _length = reader.u32()?;
    let stamps = reader.u32()?;
    let mut samples = Vec::new();
    for _ in 0..stamps {
        let timestamp = reader.u64()?;
        let count = reader.u32()?;
        for _ in 0..count {
            let notification_handle = reader.u32()?;
            let size = reader.u32()? as usize;
            let data = Bytes::copy_from_slice(reader.take(size)?);
            samples.push(NotificationSample {
                timestamp,
                notification_handle,
                data,
            });
        }
    }
    Ok(samples)
}

/// Active subscriptions of one session.
#[derive(Debug, Default)]
pub(crate) struct NotificationManager {
    handles: HashMap<u32, Handle>,
    release_list: Vec<u32>,
}

impl NotificationManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a subscription confirmed by the device.
    pub(crate) fn register(&mut self, notification_handle: u32, handle: Handle) {
        if self.handles.insert(notification_handle, handle).is_none() {
            self.release_list.push(notification_handle);
        }
    }

    /// Forgets a subscription and returns its handle.
    pub(crate) fn remove(&mut self, notification_handle: u32) -> Option<Handle> {
        self.release_list.retain(|&h| h != notification_handle);
        self.handles.remove(&notification_handle)
    }

    /// Notification handles not yet deleted, in registration order.
    pub(crate) fn pending_release(&self) -> Vec<u32> {
        self.release_list.clone()
    }

    pub(crate) fn contains(&self, notification_handle: u32) -> bool {
        self.handles.contains_key(&notification_handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Decodes `payload` into the registered handles and returns a snapshot
    /// of every updated handle with the sample timestamp.
    ///
    /// Samples for unknown notification handles are dropped; they can arrive
    /// before the add-notification response has been processed.
    pub(crate) fn dispatch(&mut self, payload: &[u8]) -> Result<Vec<(Handle, u64)>> {
        let samples = parse_notification_samples(payload)?;
        let mut updated = Vec::with_capacity(samples.len());
        for sample in samples {
            match self.handles.get_mut(&sample.notification_handle) {
                Some(handle) => {
                    handle.decode_into(&sample.data);
                    updated.push((handle.clone(), sample.timestamp));
                }
                None => {
                    debug!(
                        notification_handle = sample.notification_handle,
                        "skipping notification for unknown handle"
                    );
                }
            }
        }
        Ok(updated)
    }
}
