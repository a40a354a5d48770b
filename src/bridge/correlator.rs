//! Request correlator.
//!
//! Maps outbound call ids to the callers awaiting them. Each entry owns a
//! spawned timeout timer that reports the id on an internal channel when it
//! fires; the event loop then calls [`Correlator::expire`].
//!
//! # Settle-once
//!
//! An entry leaves the table exactly once, through [`Correlator::settle`]
//! (response or send failure), [`Correlator::expire`] (timeout) or
//! [`Correlator::fail_all`] (shutdown). Whichever runs first wins; the
//! others find no entry.
//!
//! # Late responses
//!
//! A settled id stays retired for its own timeout again (at least
//! [`MIN_RETIRED_RETENTION`]), so a response arriving after the caller gave
//! up is recognized and dropped instead of being routed as an event. The
//! retired table is capped at [`RETIRED_LIMIT`] ids; only above that rate are
//! the oldest forgotten early.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a call (30s).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on outstanding calls.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Shortest time a settled id is remembered for late-response detection.
pub const MIN_RETIRED_RETENTION: Duration = DEFAULT_CALL_TIMEOUT;

/// Hard cap on remembered settled ids.
pub const RETIRED_LIMIT: usize = 16_384;

// ============================================================================
// Types
// ============================================================================

/// Channel end the caller awaits.
pub type Responder = oneshot::Sender<Result<Value>>;

/// Settlement status of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Awaiting a response or timeout.
    Pending,
    /// Resolved with a payload.
    Resolved,
    /// Rejected with an error.
    Rejected,
}

/// An outstanding call.
#[derive(Debug)]
pub struct PendingRequest {
    name: String,
    timeout: Duration,
    sent_at: Instant,
    status: Settlement,
    responder: Option<Responder>,
    timer: JoinHandle<()>,
}

impl PendingRequest {
    /// Operation name of the call.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current settlement status.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> Settlement {
        self.status
    }

    /// Delivers the outcome if still pending and stops the timer.
    fn settle(&mut self, outcome: Result<Value>) -> Settlement {
        if self.status != Settlement::Pending {
            return self.status;
        }

        self.timer.abort();
        self.status = if outcome.is_ok() {
            Settlement::Resolved
        } else {
            Settlement::Rejected
        };

        if let Some(responder) = self.responder.take() {
            // The caller may have given up; nothing to do then.
            let _ = responder.send(outcome);
        }

        self.status
    }
}

/// Summary of a settled entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    /// Request id.
    pub request_id: RequestId,
    /// Operation name.
    pub name: String,
    /// Final status.
    pub status: Settlement,
    /// Time between send and settlement.
    pub elapsed: Duration,
    /// Configured timeout of the call.
    pub timeout: Duration,
}

// ============================================================================
// Correlator
// ============================================================================

/// Pending request table.
#[derive(Debug)]
pub struct Correlator {
    pending: FxHashMap<RequestId, PendingRequest>,
    /// Settled ids in retirement order.
    retired_order: VecDeque<RequestId>,
    /// Settled id to the instant it stops being recognized.
    retired: FxHashMap<RequestId, Instant>,
    retired_limit: usize,
    limit: usize,
    expired_tx: mpsc::UnboundedSender<RequestId>,
    expired_rx: mpsc::UnboundedReceiver<RequestId>,
}

impl Correlator {
    /// Creates an empty table accepting up to `limit` outstanding calls.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Self {
            pending: FxHashMap::default(),
            retired_order: VecDeque::new(),
            retired: FxHashMap::default(),
            retired_limit: RETIRED_LIMIT,
            limit,
            expired_tx,
            expired_rx,
        }
    }

    /// Number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no call is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns `true` if `id` awaits a response.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    /// Returns `true` if `id` was settled and is still within its retention window.
    #[inline]
    #[must_use]
    pub fn is_retired(&self, id: &RequestId) -> bool {
        self.retired
            .get(id)
            .is_some_and(|until| *until > Instant::now())
    }

    /// Fails with [`Error::TooManyPending`] when the table is full.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.pending.len() >= self.limit {
            warn!(
                pending = self.pending.len(),
                max = self.limit,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: self.pending.len(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Generates an id not currently in use.
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        loop {
            let id = RequestId::generate();
            if !self.pending.contains_key(&id) && !self.retired.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers a call and arms its timeout.
    ///
    /// Callers must obtain `id` from [`Correlator::next_id`].
    pub fn insert(&mut self, id: RequestId, name: String, timeout: Duration, responder: Responder) {
        let expired_tx = self.expired_tx.clone();
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            let _ = expired_tx.send(id);
        });

        let previous = self.pending.insert(
            id,
            PendingRequest {
                name,
                timeout,
                sent_at: Instant::now(),
                status: Settlement::Pending,
                responder: Some(responder),
                timer,
            },
        );
        debug_assert!(previous.is_none(), "request id reused while pending");
        trace!(%id, pending = self.pending.len(), "Request registered");
    }

    /// Settles `id` with a response or failure.
    ///
    /// Returns `None` if `id` is not pending (already settled or unknown).
    pub fn settle(&mut self, id: RequestId, outcome: Result<Value>) -> Option<Settled> {
        let mut request = self.pending.remove(&id)?;
        let status = request.settle(outcome);
        self.retire(id, request.timeout);
        Some(Self::summary(id, &request, status))
    }

    /// Handles a fired timer, rejecting `id` with [`Error::Timeout`].
    ///
    /// Returns `None` if the response won the race.
    pub fn expire(&mut self, id: RequestId) -> Option<Settled> {
        let Some(mut request) = self.pending.remove(&id) else {
            trace!(%id, "Timer fired for settled request");
            return None;
        };

        let error = Error::timeout(id, request.name.clone(), request.timeout.as_millis() as u64);
        let status = request.settle(Err(error));
        self.retire(id, request.timeout);
        debug!(%id, name = %request.name, "Request timed out");
        Some(Self::summary(id, &request, status))
    }

    /// Rejects every outstanding call.
    pub fn fail_all(&mut self, mut error: impl FnMut() -> Error) -> usize {
        let pending: Vec<_> = self.pending.drain().collect();
        let count = pending.len();

        for (id, mut request) in pending {
            request.settle(Err(error()));
            self.retire(id, request.timeout);
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    /// Next id whose timer fired; never completes while no timer fires.
    pub async fn next_expired(&mut self) -> Option<RequestId> {
        self.expired_rx.recv().await
    }

    fn retire(&mut self, id: RequestId, timeout: Duration) {
        let now = Instant::now();
        self.prune_retired(now);

        if self.retired.len() >= self.retired_limit
            && let Some(oldest) = self.retired_order.pop_front()
        {
            self.retired.remove(&oldest);
            warn!(%oldest, "Retired request table full, forgetting oldest id");
        }

        self.retired
            .insert(id, now + timeout.max(MIN_RETIRED_RETENTION));
        self.retired_order.push_back(id);
    }

    /// Forgets retired ids from the front of the queue whose window has passed.
    fn prune_retired(&mut self, now: Instant) {
        while let Some(&oldest) = self.retired_order.front() {
            if self.retired.get(&oldest).is_some_and(|until| *until > now) {
                break;
            }
            self.retired.remove(&oldest);
            self.retired_order.pop_front();
        }
    }

    fn summary(id: RequestId, request: &PendingRequest, status: Settlement) -> Settled {
        Settled {
            request_id: id,
            name: request.name.clone(),
            status,
            elapsed: request.sent_at.elapsed(),
            timeout: request.timeout,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::error::ErrorKind;

    fn register(
        correlator: &mut Correlator,
        timeout: Duration,
    ) -> (RequestId, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let id = correlator.next_id();
        correlator.insert(id, "get_users".to_string(), timeout, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let mut correlator = Correlator::new(10);
        let (id, rx) = register(&mut correlator, Duration::from_secs(5));
        assert!(correlator.is_pending(&id));

        let settled = correlator.settle(id, Ok(json!({"success": true}))).expect("pending");
        assert_eq!(settled.status, Settlement::Resolved);
        assert_eq!(settled.name, "get_users");
        assert!(correlator.is_empty());
        assert!(correlator.is_retired(&id));

        assert_eq!(rx.await.expect("sent").expect("ok"), json!({"success": true}));

        // Second settlement and late timer are no-ops
        assert!(correlator.settle(id, Ok(json!(null))).is_none());
        assert!(correlator.expire(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_removes_entry() {
        let mut correlator = Correlator::new(10);
        let (id, rx) = register(&mut correlator, Duration::from_millis(100));

        let expired = correlator.next_expired().await.expect("timer");
        assert_eq!(expired, id);

        let settled = correlator.expire(id).expect("still pending");
        assert_eq!(settled.status, Settlement::Rejected);
        assert!(!correlator.is_pending(&id));

        let err = rx.await.expect("sent").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        // Late response cannot settle it
        assert!(correlator.settle(id, Ok(json!({}))).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_request_timer_is_cancelled() {
        let mut correlator = Correlator::new(10);
        let (id, _rx) = register(&mut correlator, Duration::from_millis(50));
        correlator.settle(id, Ok(json!({})));

        let waited = tokio::time::timeout(Duration::from_secs(1), correlator.next_expired()).await;
        assert!(waited.is_err(), "aborted timer must not report");
    }

    #[tokio::test]
    async fn test_capacity() {
        let mut correlator = Correlator::new(2);
        let _a = register(&mut correlator, Duration::from_secs(5));
        assert!(correlator.ensure_capacity().is_ok());
        let _b = register(&mut correlator, Duration::from_secs(5));

        let err = correlator.ensure_capacity().unwrap_err();
        assert!(matches!(err, Error::TooManyPending { pending: 2, limit: 2 }));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mut correlator = Correlator::new(10);
        let (_, rx1) = register(&mut correlator, Duration::from_secs(5));
        let (_, rx2) = register(&mut correlator, Duration::from_secs(5));

        assert_eq!(correlator.fail_all(|| Error::BridgeClosed), 2);
        assert!(correlator.is_empty());
        assert!(matches!(rx1.await.expect("sent"), Err(Error::BridgeClosed)));
        assert!(matches!(rx2.await.expect("sent"), Err(Error::BridgeClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_id_survives_many_later_settlements() {
        let mut correlator = Correlator::new(10);
        let (slow, _rx) = register(&mut correlator, Duration::from_millis(100));
        correlator.next_expired().await.expect("timer");
        correlator.expire(slow).expect("pending");

        for _ in 0..1000 {
            let (id, _rx) = register(&mut correlator, Duration::from_secs(5));
            correlator.settle(id, Ok(json!({})));
        }

        assert!(correlator.is_retired(&slow));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_id_is_forgotten_after_its_window() {
        let mut correlator = Correlator::new(10);
        let (id, _rx) = register(&mut correlator, Duration::from_secs(60));
        correlator.settle(id, Ok(json!({})));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(correlator.is_retired(&id));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!correlator.is_retired(&id));

        // Next retirement prunes the lapsed entry
        let (next, _rx) = register(&mut correlator, Duration::from_secs(1));
        correlator.settle(next, Ok(json!({})));
        assert_eq!(correlator.retired.len(), 1);
        assert!(correlator.is_retired(&next));
    }

    #[tokio::test]
    async fn test_short_timeouts_keep_minimum_retention() {
        let mut correlator = Correlator::new(10);
        let (id, _rx) = register(&mut correlator, Duration::from_millis(1));
        correlator.settle(id, Ok(json!({})));

        let until = correlator.retired[&id];
        assert!(until >= Instant::now() + MIN_RETIRED_RETENTION - Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retired_table_is_capped() {
        let mut correlator = Correlator::new(10);
        correlator.retired_limit = 4;
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (id, _rx) = register(&mut correlator, Duration::from_secs(5));
            correlator.settle(id, Ok(json!({})));
            ids.push(id);
        }

        assert!(!correlator.is_retired(&ids[0]));
        assert!(ids[1..].iter().all(|id| correlator.is_retired(id)));
        assert_eq!(correlator.retired.len(), 4);
    }

    #[test]
    fn test_rejected_status() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        rt.block_on(async {
            let mut correlator = Correlator::new(1);
            let (id, rx) = register(&mut correlator, Duration::from_secs(5));
            let settled = correlator
                .settle(id, Err(Error::transport("send failed")))
                .expect("pending");
            assert_eq!(settled.status, Settlement::Rejected);
            assert!(rx.await.expect("sent").is_err());
        });
    }
}
