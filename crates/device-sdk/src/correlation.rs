//! Correlation registry: turns the fire-and-receive transport into a
//! request/reply call keyed by `messageId`.
//!
//! An entry is inserted *before* the request frame leaves the process and is
//! removed on the first of: reply delivered, deadline reached, or the waiting
//! handle dropped.  `deliver` for an id with no entry returns `false`, which
//! sends the reply down the unmatched path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::{Reply, SdkError};

pub struct CorrelationRegistry {
    /// message_id → waiter.
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
    /// Upper bound on concurrently pending requests (0 = unlimited).
    max_in_flight: usize,
}

impl CorrelationRegistry {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_in_flight,
        }
    }

    /// Insert an entry for `message_id` and return the handle to wait on.
    pub fn register(self: &Arc<Self>, message_id: u32) -> Result<PendingReply, SdkError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if self.max_in_flight > 0 && pending.len() >= self.max_in_flight {
                return Err(SdkError::AllocationFailure(format!(
                    "{} requests already awaiting replies",
                    pending.len()
                )));
            }
            if pending.contains_key(&message_id) {
                return Err(SdkError::InvalidParameter(format!(
                    "message {message_id} is already awaiting a reply"
                )));
            }
            pending.insert(message_id, tx);
        }

        Ok(PendingReply {
            registry: Arc::clone(self),
            message_id,
            rx,
        })
    }

    /// Hand a reply to the waiter for `message_id`.
    ///
    /// Returns `false` when nobody is waiting (never registered, already
    /// timed out, or already delivered).
    pub fn deliver(&self, message_id: u32, code: i32, payload: Value) -> bool {
        let Some(tx) = self.pending.lock().remove(&message_id) else {
            return false;
        };
        tx.send(Reply {
            message_id,
            code,
            payload,
        })
        .is_ok()
    }

    /// Drop the entry for `message_id`, if any.
    pub fn remove(&self, message_id: u32) -> bool {
        self.pending.lock().remove(&message_id).is_some()
    }

    /// Drop every entry; their waiters resolve with [`SdkError::Closed`].
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn contains(&self, message_id: u32) -> bool {
        self.pending.lock().contains_key(&message_id)
    }

    /// Number of requests currently awaiting a reply.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one registered request.  Dropping it removes the entry.
pub struct PendingReply {
    registry: Arc<CorrelationRegistry>,
    message_id: u32,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    /// Wait up to `timeout` for the reply.
    pub async fn wait(self, timeout: Duration) -> Result<Reply, SdkError> {
        self.wait_until(Instant::now() + timeout, timeout).await
    }

    /// Wait until the absolute `deadline`.  `budget` is only reported back in
    /// the timeout error.
    pub async fn wait_until(mut self, deadline: Instant, budget: Duration) -> Result<Reply, SdkError> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(SdkError::Closed),
            Err(_) => {
                tracing::debug!(message_id = self.message_id, "reply wait timed out");
                Err(SdkError::Timeout {
                    message_id: self.message_id,
                    after: budget,
                })
            }
        }
        // `self` drops here and removes the entry if it is still present.
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.registry.remove(self.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Arc<CorrelationRegistry> {
        Arc::new(CorrelationRegistry::new(16))
    }

    #[tokio::test]
    async fn deliver_then_wait_returns_reply_unchanged() {
        let reg = registry();
        let pending = reg.register(7).unwrap();
        assert!(reg.deliver(7, 0, json!({"ok": true})));

        let reply = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.message_id, 7);
        assert_eq!(reply.code, 0);
        assert_eq!(reply.payload, json!({"ok": true}));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn deliver_from_another_task_wakes_waiter() {
        let reg = registry();
        let pending = reg.register(1).unwrap();
        let reg2 = reg.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reg2.deliver(1, 100_007, json!({}));
        });
        let reply = pending.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply.code, 100_007);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_after_deadline_and_removes_entry() {
        let reg = registry();
        let pending = reg.register(5).unwrap();
        let started = Instant::now();

        let err = pending.wait(Duration::from_millis(5000)).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, SdkError::Timeout { message_id: 5, .. }));
        assert!(elapsed >= Duration::from_millis(5000));
        assert!(elapsed < Duration::from_millis(5050));
        assert!(!reg.contains(5));
        // A late reply finds nobody waiting.
        assert!(!reg.deliver(5, 0, json!({})));
    }

    #[test]
    fn deliver_without_entry_is_false() {
        let reg = registry();
        assert!(!reg.deliver(42, 0, json!({})));
    }

    #[test]
    fn second_delivery_is_refused() {
        let reg = registry();
        let _pending = reg.register(3).unwrap();
        assert!(reg.deliver(3, 0, json!({})));
        assert!(!reg.deliver(3, 0, json!({})));
    }

    #[test]
    fn duplicate_live_id_rejected() {
        let reg = registry();
        let _pending = reg.register(9).unwrap();
        assert!(matches!(
            reg.register(9),
            Err(SdkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn dropping_handle_removes_entry() {
        let reg = registry();
        let pending = reg.register(11).unwrap();
        assert!(reg.contains(11));
        drop(pending);
        assert!(!reg.contains(11));
    }

    #[test]
    fn capacity_limit_is_allocation_failure() {
        let reg = Arc::new(CorrelationRegistry::new(2));
        let _a = reg.register(1).unwrap();
        let _b = reg.register(2).unwrap();
        assert!(matches!(
            reg.register(3),
            Err(SdkError::AllocationFailure(_))
        ));
    }

    #[tokio::test]
    async fn clear_resolves_waiters_as_closed() {
        let reg = registry();
        let pending = reg.register(1).unwrap();
        assert_eq!(reg.clear(), 1);
        let err = pending.wait(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SdkError::Closed));
    }
}
