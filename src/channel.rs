//! Best-effort envelope transport between the host and one surface.
//!
//! `send` hands an envelope to the surface with no return value and no
//! delivery guarantee once the surface is gone; the single inbound handler
//! is registered once and driven by a dispatch task until the transport
//! dies. Payloads are plain JSON values, so nothing with live handles or
//! cycles ever crosses the boundary.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;

/// What [`MessageChannel::send`] does with an envelope when the surface
/// has already been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelGonePolicy {
    /// Drop the envelope silently. A send races inherently with a
    /// user-initiated close, so the caller is never penalized.
    #[default]
    Ignore,
    /// Drop the envelope and log a warning per drop.
    Warn,
}

/// Host side of the bidirectional transport to one surface.
///
/// Clonable; all clones share the same outbound channel and teardown
/// token. The inbound receiver is singular and is consumed by the first
/// [`MessageChannel::on_receive`] call.
#[derive(Clone)]
pub struct MessageChannel {
    tx: mpsc::Sender<Envelope>,
    inbound: Arc<Mutex<Option<mpsc::Receiver<Envelope>>>>,
    closed: CancellationToken,
    policy: ChannelGonePolicy,
}

impl MessageChannel {
    pub fn new(
        tx: mpsc::Sender<Envelope>,
        inbound: mpsc::Receiver<Envelope>,
        closed: CancellationToken,
        policy: ChannelGonePolicy,
    ) -> Self {
        Self {
            tx,
            inbound: Arc::new(Mutex::new(Some(inbound))),
            closed,
            policy,
        }
    }

    /// Hand an envelope to the surface.
    ///
    /// Best effort only: if the surface has been torn down the envelope is
    /// dropped per the configured [`ChannelGonePolicy`], and a full
    /// outbound channel sheds the envelope with a warning rather than
    /// blocking the (non-yielding) caller.
    pub fn send(&self, envelope: Envelope) {
        if self.closed.is_cancelled() {
            self.dropped(&envelope, "surface closed");
            return;
        }
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(env)) => {
                tracing::warn!(
                    msg_type = %env.msg_type,
                    "outbound channel full, dropping envelope"
                );
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                self.dropped(&env, "channel closed");
            }
        }
    }

    fn dropped(&self, envelope: &Envelope, reason: &str) {
        match self.policy {
            ChannelGonePolicy::Ignore => {
                tracing::debug!(msg_type = %envelope.msg_type, reason, "dropped envelope");
            }
            ChannelGonePolicy::Warn => {
                tracing::warn!(msg_type = %envelope.msg_type, reason, "dropped envelope");
            }
        }
    }

    /// Register the inbound handler and start dispatching.
    ///
    /// The handler is invoked for every envelope the surface sends back,
    /// on a dedicated task that exits when the surface's channel closes or
    /// the transport is torn down. The inbound side is singular -- this
    /// method panics if called more than once.
    pub fn on_receive<F>(&self, mut handler: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(Envelope) + Send + 'static,
    {
        let mut rx = self
            .inbound
            .lock()
            .take()
            .expect("on_receive() called more than once");
        let closed = self.closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    env = rx.recv() => match env {
                        Some(env) => handler(env),
                        None => break,
                    },
                    _ = closed.cancelled() => break,
                }
            }
        })
    }

    /// Tear the transport down. Subsequent sends are dropped and the
    /// dispatch task exits promptly.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token shared with the surface side; fires on user close or
    /// programmatic disposal, whichever comes first.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
