//! Pending-request correlation
//!
//! Matches inbound frames against in-flight request/response exchanges.
//! Registrations are checked in FIFO order and at most one may consume a
//! given frame. Entries whose exchange has ended are purged on every
//! exchange exit, so abandoned registrations never accumulate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Identifier of one registration, used to purge it on exchange exit
pub type RequestId = u64;

/// Predicate deciding whether a frame answers a given request
pub type Matcher = Box<dyn Fn(&[u8]) -> bool + Send>;

struct Pending {
    id: RequestId,
    matcher: Matcher,
    slot: oneshot::Sender<Vec<u8>>,
}

/// FIFO registry of in-flight exchanges for one channel
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<Vec<Pending>>,
    next_id: AtomicU64,
}

impl Correlator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a matcher and obtain the receiver its response will be
    /// delivered on. The caller must `purge` the returned id when its
    /// exchange ends, matched or not.
    pub fn register<F>(&self, matcher: F) -> (RequestId, oneshot::Receiver<Vec<u8>>)
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push(Pending {
            id,
            matcher: Box::new(matcher),
            slot: tx,
        });
        (id, rx)
    }

    /// Offer a frame to the pending registrations.
    ///
    /// The first registration (in registration order) whose matcher
    /// accepts the frame is removed and fulfilled; returns whether the
    /// frame was consumed. Fulfillment happens after the internal lock is
    /// released so downstream wakeups cannot re-enter it.
    pub fn dispatch(&self, frame: &[u8]) -> bool {
        let matched = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|p| (p.matcher)(frame)) {
                Some(idx) => Some(pending.remove(idx)),
                None => None,
            }
        };

        match matched {
            Some(entry) => {
                // receiver may be gone if the exchange timed out between
                // matching and delivery; the frame is then dropped, which
                // matches the no-claimant case downstream
                let _ = entry.slot.send(frame.to_vec());
                true
            }
            None => false,
        }
    }

    /// Remove the given registration and any whose exchange has already
    /// ended (receiver dropped).
    pub fn purge(&self, id: RequestId) {
        self.pending
            .lock()
            .retain(|p| p.id != id && !p.slot.is_closed());
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no registrations are pending
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let correlator = Correlator::new();
        let (_id1, mut rx1) = correlator.register(|f: &[u8]| f.starts_with(b"OK"));
        let (_id2, mut rx2) = correlator.register(|f: &[u8]| f.starts_with(b"OK"));

        assert!(correlator.dispatch(b"OK 42"));

        assert_eq!(rx1.try_recv().unwrap(), b"OK 42".to_vec());
        assert!(rx2.try_recv().is_err());
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_unmatched_frame_not_consumed() {
        let correlator = Correlator::new();
        let (_id, _rx) = correlator.register(|f: &[u8]| f == b"PONG");

        assert!(!correlator.dispatch(b"HELLO"));
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_dispatch_without_registrations() {
        let correlator = Correlator::new();
        assert!(!correlator.dispatch(b"anything"));
    }

    #[test]
    fn test_purge_removes_own_and_dead_entries() {
        let correlator = Correlator::new();
        let (id1, rx1) = correlator.register(|_: &[u8]| false);
        let (_id2, rx2) = correlator.register(|_: &[u8]| false);
        let (_id3, _rx3) = correlator.register(|_: &[u8]| false);

        drop(rx2); // exchange 2 timed out and dropped its receiver
        drop(rx1);
        correlator.purge(id1);

        // only the live third registration survives
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_fifo_order_among_matchers() {
        let correlator = Correlator::new();
        let (_ida, mut rxa) = correlator.register(|_: &[u8]| true);
        let (_idb, mut rxb) = correlator.register(|_: &[u8]| true);

        correlator.dispatch(b"x");
        assert!(rxa.try_recv().is_ok());
        assert!(rxb.try_recv().is_err());

        correlator.dispatch(b"y");
        assert!(rxb.try_recv().is_ok());
    }
}
