//! One visualization surface's lifecycle and messaging state.
//!
//! A `PanelSession` owns a single UI surface: its display title, its
//! (lazily assigned) group membership, the envelope transport to the
//! surface content, and the pending-acknowledgment list. The lifecycle is
//! a three-state machine: `Opening` until the surface confirms startup,
//! `Active` while usable, `Disposed` once torn down. `Disposed` is
//! terminal; nothing transitions out of it.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::ack::AckTracker;
use crate::channel::MessageChannel;
use crate::config::HostConfig;
use crate::envelope::{Envelope, OpenFilePayload, ViewPath, OPEN_FILE, STARTED};
use crate::registry::{RegistryInner, SessionEvent};
use crate::surface::{Surface, SurfaceEndpoints, SurfaceError, SurfaceFactory};

/// Assigned from a monotonic counter at construction; never reused, even
/// after disposal.
pub type SessionId = u64;

/// Shared by every session duplicated from the same anchor.
pub type GroupId = u64;

/// Lifecycle of a panel session. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Surface created, boot acknowledgment not yet received.
    Opening,
    /// Usable: the surface confirmed startup.
    Active,
    /// Torn down; the transport is released and the session is gone from
    /// the registry.
    Disposed,
}

/// One open visualization surface and its associated channel and state.
///
/// Clonable; all clones share the same underlying session. Constructed by
/// the registry's create/duplicate flows, never directly.
#[derive(Clone)]
pub struct PanelSession {
    pub id: SessionId,
    title: Arc<RwLock<String>>,
    group: Arc<OnceLock<GroupId>>,
    state: Arc<RwLock<Lifecycle>>,
    surface: Arc<dyn Surface>,
    channel: MessageChannel,
    acks: AckTracker,
    ack_timeout: Duration,
    boot_timeout: Duration,
    registry: Weak<RwLock<RegistryInner>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for PanelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSession")
            .field("id", &self.id)
            .field("title", &*self.title.read())
            .field("group", &self.group())
            .field("state", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl PanelSession {
    /// Create the surface and wire up the session around it.
    ///
    /// The `Started` pending entry is seeded *before* the surface exists,
    /// so the surface's boot signal can never outrun the wait that
    /// watches for it. Construction failure is the one hard error in the
    /// protocol and propagates to the caller.
    pub(crate) fn open(
        id: SessionId,
        title: String,
        group: Option<GroupId>,
        factory: &dyn SurfaceFactory,
        config: &HostConfig,
        registry: Weak<RwLock<RegistryInner>>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self, SurfaceError> {
        let acks = AckTracker::new();
        acks.seed(STARTED);

        let (out_tx, out_rx) = mpsc::channel(config.channel_capacity);
        let (in_tx, in_rx) = mpsc::channel(config.channel_capacity);
        let closed = CancellationToken::new();

        let surface = factory.create(
            &title,
            SurfaceEndpoints {
                incoming: out_rx,
                replies: in_tx,
                closed: closed.clone(),
            },
        )?;

        let channel = MessageChannel::new(out_tx, in_rx, closed, config.on_channel_gone);

        let group_cell = Arc::new(OnceLock::new());
        if let Some(group) = group {
            let _ = group_cell.set(group);
        }

        let session = Self {
            id,
            title: Arc::new(RwLock::new(title)),
            group: group_cell,
            state: Arc::new(RwLock::new(Lifecycle::Opening)),
            surface,
            channel,
            acks,
            ack_timeout: config.ack_timeout(),
            boot_timeout: config.boot_timeout(),
            registry,
            events_tx,
        };
        session.spawn_dispatch();
        Ok(session)
    }

    /// Register the single inbound handler: acknowledgments shrink the
    /// pending list, and the first `Started` flips the session to
    /// `Active`.
    fn spawn_dispatch(&self) {
        let acks = self.acks.clone();
        let state = self.state.clone();
        let id = self.id;
        let _dispatch = self.channel.on_receive(move |env| {
            if env.msg_type == STARTED {
                let became_active = {
                    let mut state = state.write();
                    if *state == Lifecycle::Opening {
                        *state = Lifecycle::Active;
                        true
                    } else {
                        false
                    }
                };
                if became_active {
                    tracing::info!(session = id, "surface started");
                }
                acks.acknowledge(STARTED);
            } else if let Some(base) = env.ack_base() {
                acks.acknowledge(base);
            } else {
                tracing::debug!(session = id, msg_type = %env.msg_type, "unhandled inbound envelope");
            }
        });
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.read()
    }

    pub fn title(&self) -> String {
        self.title.read().clone()
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group.get().copied()
    }

    /// Outstanding acknowledged sends, oldest first.
    pub fn pending_acks(&self) -> Vec<String> {
        self.acks.outstanding()
    }

    /// Token that fires when the transport dies (user close or disposal).
    pub fn closed_token(&self) -> CancellationToken {
        self.channel.closed_token()
    }

    /// Assign the group id. Called exactly once, by the registry's
    /// duplicate flow; a group never changes after assignment.
    pub(crate) fn assign_group(&self, group: GroupId) {
        if self.group.set(group).is_err() {
            tracing::warn!(session = self.id, group, "ignored re-assignment of group");
        }
    }

    /// Suspend until the surface has confirmed startup, up to the boot
    /// window. `false` leaves the session in `Opening`; data sends to it
    /// will time out individually.
    pub async fn wait_ready(&self) -> bool {
        self.acks.wait_for(STARTED, self.boot_timeout).await
    }

    /// Fire-and-forget send. No delivery guarantee once the surface is
    /// gone.
    pub fn send(&self, msg_type: &str, payload: Value) {
        self.channel.send(Envelope::new(msg_type, payload));
    }

    /// Send and suspend until the surface confirms receipt or the
    /// configured window elapses. `false` is
    /// failed-but-possibly-still-delivered, never an error.
    pub async fn send_with_ack(&self, msg_type: &str, payload: Value) -> bool {
        self.send_with_ack_within(msg_type, payload, self.ack_timeout)
            .await
    }

    /// [`PanelSession::send_with_ack`] with an explicit window.
    pub async fn send_with_ack_within(
        &self,
        msg_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> bool {
        self.acks
            .send_with_ack(&self.channel, msg_type, payload, timeout)
            .await
    }

    /// Load analysis output into the surface and navigate it to `view`,
    /// waiting for confirmation.
    pub async fn open_file(&self, name: &str, content: &str, view: ViewPath) -> bool {
        let payload = OpenFilePayload {
            name: name.to_string(),
            content: content.to_string(),
            tree: view.as_str().to_string(),
        };
        self.send_with_ack(OPEN_FILE, payload.to_value()).await
    }

    /// Deliver an envelope to every member of this session's group, this
    /// session included. An ungrouped session has no broadcast targets.
    pub fn broadcast(&self, msg_type: &str, payload: Value) -> usize {
        let Some(group) = self.group() else {
            return 0;
        };
        match self.registry.upgrade() {
            Some(inner) => crate::registry::broadcast_to_group(&inner, group, msg_type, payload),
            None => 0,
        }
    }

    /// Retitle this session and, when it belongs to a group, every other
    /// member of that group. Sessions outside the group are untouched.
    /// An empty title is ignored.
    pub fn change_title(&self, new_title: &str) {
        if new_title.is_empty() {
            return;
        }
        for peer in self.title_peers() {
            peer.apply_title(new_title);
        }
    }

    /// The sessions a title change from here lands on: the whole group
    /// when one is assigned, otherwise just this session.
    fn title_peers(&self) -> Vec<PanelSession> {
        let Some(group) = self.group() else {
            return vec![self.clone()];
        };
        match self.registry.upgrade() {
            Some(inner) => {
                let inner = inner.read();
                inner
                    .sessions
                    .values()
                    .filter(|s| s.group() == Some(group))
                    .cloned()
                    .collect()
            }
            None => vec![self.clone()],
        }
    }

    pub(crate) fn apply_title(&self, new_title: &str) {
        *self.title.write() = new_title.to_string();
        self.surface.set_title(new_title);
        let _ = self.events_tx.send(SessionEvent::TitleChanged {
            id: self.id,
            title: new_title.to_string(),
        });
    }

    /// Bring the surface to the front and make this session the
    /// foreground target for bare reveal operations.
    pub fn reveal(&self) {
        self.surface.reveal();
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner.write();
            // A disposed session is gone from the table and must not
            // become the foreground target again.
            if inner.sessions.contains_key(&self.id) {
                inner.foreground = Some(self.id);
            }
        }
    }

    /// Tear the session down: release the transport, drop the registry
    /// entry, and clear the foreground back-reference if it pointed here.
    ///
    /// Idempotent -- subsequent calls observe the terminal state and
    /// return immediately. Runs unconditionally on every exit path,
    /// whether the user closed the surface or the host disposed it.
    pub fn dispose(&self) {
        {
            let mut state = self.state.write();
            if *state == Lifecycle::Disposed {
                return;
            }
            *state = Lifecycle::Disposed;
        }
        self.channel.close();
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner.write();
            inner.sessions.remove(&self.id);
            if inner.foreground == Some(self.id) {
                // Emptied, not reassigned; the next create starts fresh.
                inner.foreground = None;
            }
        }
        let _ = self.events_tx.send(SessionEvent::Disposed { id: self.id });
        tracing::info!(session = self.id, "session disposed");
    }
}
