//! Process-wide table of live panel sessions.
//!
//! The registry is an injectable object with a defined lifecycle --
//! constructed once at host start, torn down at host exit -- never
//! ambient module state, so tests can build as many independent
//! registries as they need. It owns the session table, the foreground
//! back-reference, and the monotonic session/group counters; sessions
//! remove themselves from it on disposal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::HostConfig;
use crate::envelope::{SetGroupPayload, SET_GROUP};
use crate::session::{GroupId, PanelSession, SessionId};
use crate::surface::{SurfaceError, SurfaceFactory};

/// Session lifecycle events, for editor-side collaborators that keep
/// lists in sync (tree views, status bars).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { id: SessionId, title: String },
    TitleChanged { id: SessionId, title: String },
    GroupAssigned { id: SessionId, group: GroupId },
    Disposed { id: SessionId },
}

pub(crate) struct RegistryInner {
    pub(crate) sessions: HashMap<SessionId, PanelSession>,
    /// The session a bare reveal targets. A plain id looked up in the
    /// table, never an owning handle, so disposing the referenced session
    /// cannot leave anything dangling.
    pub(crate) foreground: Option<SessionId>,
    next_session_id: SessionId,
    next_group_id: GroupId,
}

/// Manages every live panel session in the process.
///
/// Clonable handle; all clones share the same table and counters.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    events_tx: broadcast::Sender<SessionEvent>,
    factory: Arc<dyn SurfaceFactory>,
    config: HostConfig,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SurfaceFactory>) -> Self {
        Self::with_config(factory, HostConfig::default())
    }

    pub fn with_config(factory: Arc<dyn SurfaceFactory>, config: HostConfig) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                foreground: None,
                next_session_id: 1,
                next_group_id: 1,
            })),
            events_tx,
            factory,
            config,
        }
    }

    /// The session a bare reveal targets, if any.
    pub fn foreground_session(&self) -> Option<PanelSession> {
        let inner = self.inner.read();
        inner
            .foreground
            .and_then(|id| inner.sessions.get(&id))
            .cloned()
    }

    pub fn foreground_id(&self) -> Option<SessionId> {
        self.inner.read().foreground
    }

    /// Reveal the existing foreground session, or create a new one.
    ///
    /// When a foreground session exists it is brought to front and
    /// returned unchanged -- no new resources, no lifecycle transition.
    /// Otherwise a new session is constructed (the boot wait seeded before
    /// its surface exists), registered as the foreground target, and
    /// returned once its surface confirms startup. A surface that never
    /// confirms is still returned, left `Opening`, with a warning logged;
    /// data sends to it will time out individually.
    pub async fn create_or_show(&self, title: Option<&str>) -> Result<PanelSession, SurfaceError> {
        if let Some(existing) = self.foreground_session() {
            existing.reveal();
            return Ok(existing);
        }
        self.open_session(title, None, true).await
    }

    /// Duplicate the foreground session into its group.
    ///
    /// Returns `Ok(None)` when there is no foreground session to
    /// duplicate -- a normal, reportable condition, not an error. The
    /// first duplication lazily assigns the anchor its group id (exactly
    /// once, never changed afterwards) and tells the anchor's surface it
    /// is the group anchor; the duplicate is told it joined the group
    /// once it has booted. The duplicate never becomes the foreground
    /// target unless explicitly revealed.
    pub async fn duplicate_active(
        &self,
        title: Option<&str>,
    ) -> Result<Option<PanelSession>, SurfaceError> {
        let Some(anchor) = self.foreground_session() else {
            tracing::debug!("duplicate requested with no foreground session");
            return Ok(None);
        };
        let group = match anchor.group() {
            Some(group) => group,
            None => {
                let group = {
                    let mut inner = self.inner.write();
                    let group = inner.next_group_id;
                    inner.next_group_id += 1;
                    group
                };
                anchor.assign_group(group);
                let _ = self.events_tx.send(SessionEvent::GroupAssigned {
                    id: anchor.id,
                    group,
                });
                let payload = SetGroupPayload { group, join: false }.to_value();
                if !anchor.send_with_ack(SET_GROUP, payload).await {
                    tracing::warn!(
                        session = anchor.id,
                        group,
                        "group anchor did not confirm SetGroup"
                    );
                }
                group
            }
        };

        let session = self.open_session(title, Some(group), false).await?;
        let payload = SetGroupPayload { group, join: true }.to_value();
        if !session.send_with_ack(SET_GROUP, payload).await {
            tracing::warn!(
                session = session.id,
                group,
                "duplicate did not confirm SetGroup"
            );
        }
        Ok(Some(session))
    }

    async fn open_session(
        &self,
        title: Option<&str>,
        group: Option<GroupId>,
        make_foreground: bool,
    ) -> Result<PanelSession, SurfaceError> {
        let id = {
            let mut inner = self.inner.write();
            let id = inner.next_session_id;
            inner.next_session_id += 1;
            id
        };
        let title = match title {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Visualizer {id}"),
        };

        let session = PanelSession::open(
            id,
            title,
            group,
            self.factory.as_ref(),
            &self.config,
            Arc::downgrade(&self.inner),
            self.events_tx.clone(),
        )?;

        {
            let mut inner = self.inner.write();
            inner.sessions.insert(id, session.clone());
            if make_foreground {
                inner.foreground = Some(id);
            }
        }
        let _ = self.events_tx.send(SessionEvent::Created {
            id,
            title: session.title(),
        });
        self.watch_teardown(&session);
        tracing::info!(session = id, group = ?group, "panel session created");

        // No data message goes out before the surface signals readiness.
        if !session.wait_ready().await {
            tracing::warn!(session = id, "surface never confirmed startup");
        }
        Ok(session)
    }

    /// Drop the session from the table when its transport dies, whether
    /// the user closed the surface or the host disposed it.
    fn watch_teardown(&self, session: &PanelSession) {
        let session = session.clone();
        let token = session.closed_token();
        tokio::spawn(async move {
            token.cancelled().await;
            session.dispose();
        });
    }

    /// Deliver an envelope to every session in `group`, the sender
    /// included. Sessions with no group are never broadcast targets.
    /// Returns the number of sessions delivered to.
    pub fn broadcast(&self, group: GroupId, msg_type: &str, payload: Value) -> usize {
        broadcast_to_group(&self.inner, group, msg_type, payload)
    }

    pub fn get(&self, id: SessionId) -> Option<PanelSession> {
        self.inner.read().sessions.get(&id).cloned()
    }

    /// Snapshot of all live sessions, in no particular order.
    pub fn sessions(&self) -> Vec<PanelSession> {
        self.inner.read().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Tear down every live session. Called at host shutdown; safe to
    /// call with sessions already mid-disposal.
    pub fn dispose_all(&self) {
        let sessions = self.sessions();
        for session in sessions {
            session.dispose();
        }
    }
}

/// Shared by [`SessionRegistry::broadcast`] and the session-side
/// convenience so both observe the same targeting rule.
pub(crate) fn broadcast_to_group(
    inner: &RwLock<RegistryInner>,
    group: GroupId,
    msg_type: &str,
    payload: Value,
) -> usize {
    let targets: Vec<PanelSession> = {
        let inner = inner.read();
        inner
            .sessions
            .values()
            .filter(|s| s.group() == Some(group))
            .cloned()
            .collect()
    };
    for target in &targets {
        target.send(msg_type, payload.clone());
    }
    tracing::debug!(group, msg_type, targets = targets.len(), "group broadcast");
    targets.len()
}
