//! Invoke id correlation of requests and responses.
//!
//! Every outbound request is registered under its invoke id with a deadline.
//! The first of two things completes it: a response frame with the same
//! invoke id, or the deadline passing. Responses may arrive in any order.
//!
//! Ids that expired are remembered for a while so that a response arriving
//! after its timeout is ignored. Any other response without a pending entry
//! is a protocol violation and is reported as [`AdsError::UnknownInvokeId`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{AdsError, Result};
use crate::frame::AmsFrame;

/// How many expired invoke ids are remembered.
const EXPIRED_MEMORY: usize = 1024;

pub(crate) type Responder = oneshot::Sender<Result<AmsFrame>>;

#[derive(Debug)]
struct Pending {
    tx: Responder,
    deadline: Instant,
}

/// Outcome of routing an inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Handed to the waiting caller.
    Delivered,
    /// The request had already timed out; the frame was dropped.
    Late,
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<u32, Pending>,
    deadlines: BTreeMap<Instant, Vec<u32>>,
    expired: VecDeque<u32>,
    expired_set: HashSet<u32>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a request. Returns `false` and fails `tx` if the id is
    /// already pending.
    pub(crate) fn register(&mut self, invoke_id: u32, tx: Responder, deadline: Instant) -> bool {
        if self.pending.contains_key(&invoke_id) {
            let _ = tx.send(Err(AdsError::invalid_parameter(
                "invoke_id",
                format!("{invoke_id} is already pending"),
            )));
            return false;
        }
        self.forget_expired(invoke_id);
        self.deadlines.entry(deadline).or_default().push(invoke_id);
        self.pending.insert(invoke_id, Pending { tx, deadline });
        true
    }

    /// Completes the request matching the frame's invoke id.
    ///
    /// # Errors
    ///
    /// Returns `AdsError::UnknownInvokeId` if the id was never registered or
    /// was already resolved.
    pub(crate) fn resolve(&mut self, frame: AmsFrame) -> Result<Resolution> {
        let invoke_id = frame.invoke_id();
        match self.pending.remove(&invoke_id) {
            Some(entry) => {
                self.remove_deadline(entry.deadline, invoke_id);
                // The caller may have given up waiting.
                let _ = entry.tx.send(Ok(frame));
                Ok(Resolution::Delivered)
            }
            None if self.expired_set.contains(&invoke_id) => Ok(Resolution::Late),
            None => Err(AdsError::UnknownInvokeId { invoke_id }),
        }
    }

    /// Fails a request without waiting for its deadline, e.g. after a send error.
    pub(crate) fn fail(&mut self, invoke_id: u32, err: AdsError) {
        if let Some(entry) = self.pending.remove(&invoke_id) {
            self.remove_deadline(entry.deadline, invoke_id);
            let _ = entry.tx.send(Err(err));
        }
    }

    /// Times out every request whose deadline is at or before `now` and
    /// returns their invoke ids.
    pub(crate) fn expire_due(&mut self, now: Instant) -> Vec<u32> {
        let due: Vec<Instant> = self.deadlines.range(..=now).map(|(d, _)| *d).collect();
        let mut expired = Vec::new();
        for deadline in due {
            let Some(ids) = self.deadlines.remove(&deadline) else {
                continue;
            };
            for invoke_id in ids {
                if let Some(entry) = self.pending.remove(&invoke_id) {
                    let _ = entry.tx.send(Err(AdsError::Timeout { invoke_id }));
                    self.remember_expired(invoke_id);
                    expired.push(invoke_id);
                }
            }
        }
        expired
    }

    /// Earliest pending deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().copied()
    }

    /// Fails every pending request with the error built by `err`.
    pub(crate) fn fail_all(&mut self, err: impl Fn() -> AdsError) {
        self.deadlines.clear();
        for (_, entry) in self.pending.drain() {
            let _ = entry.tx.send(Err(err()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn remove_deadline(&mut self, deadline: Instant, invoke_id: u32) {
        if let Some(ids) = self.deadlines.get_mut(&deadline) {
            ids.retain(|&id| id != invoke_id);
            if ids.is_empty() {
                self.deadlines.remove(&deadline);
            }
        }
    }

    fn remember_expired(&mut self, invoke_id: u32) {
        if self.expired_set.insert(invoke_id) {
            self.expired.push_back(invoke_id);
        }
        while self.expired.len() > EXPIRED_MEMORY {
            if let Some(old) = self.expired.pop_front() {
                self.expired_set.remove(&old);
            }
        }
    }

    fn forget_expired(&mut self, invoke_id: u32) {
        if self.expired_set.remove(&invoke_id) {
            self.expired.retain(|&id| id != invoke_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{AmsAddr, AmsNetId};
    use std::time::Duration;

    fn response(invoke_id: u32, payload: &[u8]) -> AmsFrame {
        let a = AmsAddr::new(AmsNetId::new(1, 2, 3, 4, 1, 1), 851);
        let b = AmsAddr::new(AmsNetId::new(5, 6, 7, 8, 1, 1), 32905);
        let mut frame = AmsFrame::request(b, a, 2, invoke_id, payload.to_vec());
        frame.header.state_flags = 5;
        frame
    }

    #[test]
    fn test_resolve_matching_id_once() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        assert!(table.register(7, tx, now + Duration::from_millis(500)));

        let err = table.resolve(response(8, &[9])).unwrap_err();
        assert!(matches!(err, AdsError::UnknownInvokeId { invoke_id: 8 }));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 1);

        assert_eq!(table.resolve(response(7, &[1, 2])).unwrap(), Resolution::Delivered);
        let frame = rx.try_recv().unwrap().unwrap();
        assert_eq!(&frame.payload[..], &[1, 2]);
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);

        assert!(matches!(
            table.resolve(response(7, &[])),
            Err(AdsError::UnknownInvokeId { invoke_id: 7 })
        ));
    }

    #[test]
    fn test_out_of_order_resolution() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(1, tx1, now + Duration::from_millis(100));
        table.register(2, tx2, now + Duration::from_millis(100));

        table.resolve(response(2, &[2])).unwrap();
        table.resolve(response(1, &[1])).unwrap();
        assert_eq!(&rx1.try_recv().unwrap().unwrap().payload[..], &[1]);
        assert_eq!(&rx2.try_recv().unwrap().unwrap().payload[..], &[2]);
    }

    #[test]
    fn test_expire_then_late_response_ignored() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        let (tx_later, _rx_later) = oneshot::channel();
        table.register(3, tx, now + Duration::from_millis(200));
        table.register(4, tx_later, now + Duration::from_millis(900));
        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(200)));

        assert!(table.expire_due(now + Duration::from_millis(199)).is_empty());
        assert_eq!(table.expire_due(now + Duration::from_millis(200)), vec![3]);
        assert!(rx.try_recv().unwrap().unwrap_err().is_timeout());
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_deadline(), Some(now + Duration::from_millis(900)));

        assert_eq!(table.resolve(response(3, &[])).unwrap(), Resolution::Late);
    }

    #[test]
    fn test_resolved_entry_never_expires() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        table.register(5, tx, now + Duration::from_millis(10));
        table.resolve(response(5, &[])).unwrap();
        assert!(table.expire_due(now + Duration::from_secs(1)).is_empty());
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        assert!(table.register(9, tx1, now));
        assert!(!table.register(9, tx2, now));
        assert!(rx2.try_recv().unwrap().is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_fail_all() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(1, tx1, now);
        table.register(2, tx2, now);
        table.fail_all(|| AdsError::ConnectionClosed);
        assert!(matches!(rx1.try_recv().unwrap(), Err(AdsError::ConnectionClosed)));
        assert!(matches!(rx2.try_recv().unwrap(), Err(AdsError::ConnectionClosed)));
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);
    }

    #[test]
    fn test_expired_memory_is_bounded() {
        let now = Instant::now();
        let mut table = CorrelationTable::new();
        for id in 0..(EXPIRED_MEMORY as u32 + 10) {
            let (tx, _rx) = oneshot::channel();
            table.register(id, tx, now);
        }
        table.expire_due(now);
        assert_eq!(table.expired.len(), EXPIRED_MEMORY);
        assert!(table.resolve(response(0, &[])).is_err());
        assert_eq!(
            table.resolve(response(EXPIRED_MEMORY as u32 + 9, &[])).unwrap(),
            Resolution::Late
        );
    }
}
