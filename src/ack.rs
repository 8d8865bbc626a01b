//! Pending-acknowledgment tracking.
//!
//! A send to a surface is fire-and-forget; the surface confirms receipt by
//! replying with the sent type plus the `Ack` suffix. `AckTracker` keeps
//! the ordered list of outstanding sends and lets callers suspend until
//! their confirmation arrives or a deadline passes.
//!
//! Correlation on the wire is by bare type string, not by per-message
//! sequence number. Two in-flight sends of the same type cannot be told
//! apart by the surface: an arriving acknowledgment removes the oldest
//! pending entry of that type, resolving whichever waiter pushed first.
//! The UI side only ever echoes the type string back, which is what fixes
//! this contract.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channel::MessageChannel;
use crate::envelope::Envelope;

/// One outstanding message awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub msg_type: String,
    pub sent_at: Instant,
    /// Host-internal waiter correlation; never crosses the wire.
    seq: u64,
}

/// Tracks outstanding acknowledged sends for one session.
///
/// Clonable; all clones share the pending list. The inbound dispatch task
/// calls [`AckTracker::acknowledge`], which wakes every suspended waiter
/// so each can re-check whether its own entry is gone.
#[derive(Clone, Default)]
pub struct AckTracker {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    pending: Vec<PendingAck>,
    next_seq: u64,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending entry without sending anything.
    ///
    /// Used to seed the boot wait: the `Started` entry is pushed before
    /// the surface exists, so the surface's boot signal can never arrive
    /// ahead of the entry it is supposed to remove.
    pub fn seed(&self, msg_type: &str) {
        self.push(msg_type);
    }

    fn push(&self, msg_type: &str) -> u64 {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.push(PendingAck {
            msg_type: msg_type.to_string(),
            sent_at: Instant::now(),
            seq,
        });
        seq
    }

    /// Remove the oldest pending entry of the given type and wake waiters.
    ///
    /// Returns `false` when no entry of that type is outstanding (a late
    /// acknowledgment after its waiter timed out and something else
    /// already cleaned up, or a surface confirming something never sent).
    pub fn acknowledge(&self, msg_type: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            inner
                .pending
                .iter()
                .position(|p| p.msg_type == msg_type)
                .map(|idx| inner.pending.remove(idx))
        };
        match removed {
            Some(entry) => {
                tracing::debug!(
                    msg_type,
                    elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                    "acknowledged"
                );
                self.notify.notify_waiters();
                true
            }
            None => {
                tracing::debug!(msg_type, "acknowledgment with no pending entry");
                false
            }
        }
    }

    /// Send an envelope and suspend until it is acknowledged or the window
    /// elapses.
    ///
    /// `false` means failed-but-possibly-still-delivered: the envelope may
    /// have reached the surface even though no confirmation arrived in
    /// time, and the stale entry stays on the pending list.
    pub async fn send_with_ack(
        &self,
        channel: &MessageChannel,
        msg_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> bool {
        let seq = self.push(msg_type);
        channel.send(Envelope::new(msg_type, payload));
        self.wait_seq(msg_type, seq, timeout).await
    }

    /// Suspend until no pending entry of `msg_type` remains.
    ///
    /// This is the wait half of [`AckTracker::send_with_ack`] on its own,
    /// used against the seeded `Started` entry during boot, where exactly
    /// one entry of the type can exist.
    pub async fn wait_for(&self, msg_type: &str, timeout: Duration) -> bool {
        self.wait_until(msg_type, timeout, |inner| {
            !inner.pending.iter().any(|p| p.msg_type == msg_type)
        })
        .await
    }

    /// Suspend until the specific entry `seq` is gone from the list.
    async fn wait_seq(&self, msg_type: &str, seq: u64, timeout: Duration) -> bool {
        self.wait_until(msg_type, timeout, |inner| {
            !inner.pending.iter().any(|p| p.seq == seq)
        })
        .await
    }

    /// Woken directly by the inbound handler, so waits resolve as soon as
    /// an acknowledgment lands rather than on a polling tick.
    async fn wait_until<F>(&self, msg_type: &str, timeout: Duration, resolved: F) -> bool
    where
        F: Fn(&Inner) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before re-checking, so an acknowledgment
            // landing between the check and the await is not lost.
            notified.as_mut().enable();
            if resolved(&self.inner.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Window elapsed. The entry, if still present, stays behind
                // for diagnosis; a last check catches an acknowledgment that
                // raced the deadline.
                let done = resolved(&self.inner.lock());
                if !done {
                    tracing::warn!(
                        msg_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "no acknowledgment within window"
                    );
                }
                return done;
            }
        }
    }

    /// Whether any entry of the given type is outstanding.
    pub fn contains(&self, msg_type: &str) -> bool {
        self.inner
            .lock()
            .pending
            .iter()
            .any(|p| p.msg_type == msg_type)
    }

    /// Snapshot of outstanding types, oldest first.
    pub fn outstanding(&self) -> Vec<String> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|p| p.msg_type.clone())
            .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelGonePolicy;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn test_channel() -> (MessageChannel, mpsc::Receiver<Envelope>) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let (_in_tx, in_rx) = mpsc::channel(8);
        let channel = MessageChannel::new(
            out_tx,
            in_rx,
            CancellationToken::new(),
            ChannelGonePolicy::Ignore,
        );
        (channel, out_rx)
    }

    #[test]
    fn seed_registers_without_sending() {
        let acks = AckTracker::new();
        acks.seed("Started");
        assert!(acks.contains("Started"));
        assert_eq!(acks.outstanding(), vec!["Started"]);
    }

    #[test]
    fn acknowledge_removes_oldest_matching_entry_only() {
        let acks = AckTracker::new();
        acks.seed("OpenFile");
        acks.seed("OpenFile");

        assert!(acks.acknowledge("OpenFile"));
        assert_eq!(acks.outstanding(), vec!["OpenFile"]);
        assert!(acks.acknowledge("OpenFile"));
        assert!(acks.is_idle());
    }

    #[test]
    fn acknowledge_unknown_type_is_reported() {
        let acks = AckTracker::new();
        assert!(!acks.acknowledge("OpenFile"));
    }

    #[tokio::test]
    async fn wait_for_resolves_immediately_when_nothing_pending() {
        let acks = AckTracker::new();
        assert!(acks.wait_for("OpenFile", Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn send_with_ack_resolves_true_on_acknowledgment() {
        let (channel, mut out_rx) = test_channel();
        let acks = AckTracker::new();

        let waiter = {
            let acks = acks.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                acks.send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_secs(2))
                    .await
            })
        };

        // The envelope went out on the wire before the wait began.
        let sent = out_rx.recv().await.unwrap();
        assert_eq!(sent.msg_type, "OpenFile");

        acks.acknowledge("OpenFile");
        assert!(waiter.await.unwrap());
        assert!(acks.is_idle());
    }

    #[tokio::test]
    async fn send_with_ack_resolves_promptly_not_at_deadline() {
        let (channel, _out_rx) = test_channel();
        let acks = AckTracker::new();

        let waiter = {
            let acks = acks.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                acks.send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = Instant::now();
        acks.acknowledge("OpenFile");
        assert!(waiter.await.unwrap());
        // The waiter was woken by the acknowledgment, not by the 5s window.
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn send_with_ack_times_out_and_leaves_stale_entry() {
        let (channel, _out_rx) = test_channel();
        let acks = AckTracker::new();

        let resolved = acks
            .send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_millis(100))
            .await;

        assert!(!resolved);
        // The timed-out entry is left on the list.
        assert!(acks.contains("OpenFile"));
    }

    #[tokio::test]
    async fn same_type_waiters_resolve_fifo() {
        let (channel, _out_rx) = test_channel();
        let acks = AckTracker::new();

        let first = {
            let acks = acks.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                acks.send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_millis(500))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let acks = acks.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                acks.send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_millis(200))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // One acknowledgment for two in-flight sends of the same type:
        // the oldest entry is removed, so the first waiter resolves true
        // and the second still times out.
        acks.acknowledge("OpenFile");
        assert!(first.await.unwrap());
        assert!(!second.await.unwrap());
        assert_eq!(acks.outstanding(), vec!["OpenFile"]);
    }

    #[tokio::test]
    async fn late_acknowledgment_races_deadline_in_waiters_favor() {
        let (channel, _out_rx) = test_channel();
        let acks = AckTracker::new();

        let waiter = {
            let acks = acks.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                acks.send_with_ack(&channel, "OpenFile", Value::Null, Duration::from_millis(120))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        acks.acknowledge("OpenFile");

        // Arrived near the deadline; either way the list must agree with
        // the boolean the waiter saw.
        let resolved = waiter.await.unwrap();
        assert_eq!(resolved, acks.is_idle());
    }
}
