//! Message envelopes exchanged between the host and a visualization surface.
//!
//! Both directions carry `{ type, payload }` where `payload` is an opaque
//! JSON value, structurally typed by `type`. A few control types are
//! reserved for the session protocol itself; everything else passes through
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Suffix a surface appends to a type to acknowledge receipt of a
/// previously sent envelope of that type.
pub const ACK_SUFFIX: &str = "Ack";

/// Sent by a surface once its content has finished booting. Every new
/// session seeds a pending entry for this type before the surface exists,
/// so the boot signal can never race the wait.
pub const STARTED: &str = "Started";

/// Group membership notification, host to surface.
pub const SET_GROUP: &str = "SetGroup";

/// Analysis-output load request, host to surface.
pub const OPEN_FILE: &str = "OpenFile";

/// A single message in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Structural type tag. Acknowledgments use the sent type plus
    /// [`ACK_SUFFIX`].
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Opaque JSON payload; control envelopes may carry `null`.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
        }
    }

    /// Control envelope with no payload.
    pub fn control(msg_type: impl Into<String>) -> Self {
        Self::new(msg_type, Value::Null)
    }

    /// If this envelope is an acknowledgment, return the base type it
    /// confirms. A bare `"Ack"` carries no base type and is not a valid
    /// acknowledgment.
    pub fn ack_base(&self) -> Option<&str> {
        match self.msg_type.strip_suffix(ACK_SUFFIX) {
            Some("") | None => None,
            Some(base) => Some(base),
        }
    }
}

/// Payload of a [`SET_GROUP`] envelope.
///
/// `join: false` tells the receiving surface it is the group anchor;
/// `join: true` means it has joined an existing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetGroupPayload {
    pub group: u64,
    pub join: bool,
}

impl SetGroupPayload {
    pub fn to_value(self) -> Value {
        json!({ "group": self.group, "join": self.join })
    }
}

/// Payload of an [`OPEN_FILE`] envelope: load `content` under the logical
/// name `name` and navigate to the sub-view `tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFilePayload {
    pub name: String,
    pub content: String,
    pub tree: String,
}

impl OpenFilePayload {
    pub fn to_value(&self) -> Value {
        json!({ "name": self.name, "content": self.content, "tree": self.tree })
    }
}

/// Sub-views a surface can navigate to when loading analysis output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewPath {
    /// The default chain view.
    #[default]
    Root,
    /// Abstract-syntax-tree view.
    AstView,
    /// Pattern-match view.
    PatternView,
}

impl ViewPath {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewPath::Root => "/",
            ViewPath::AstView => "/ASTView",
            ViewPath::PatternView => "/patternView",
        }
    }

    /// Coerce an arbitrary view string to a member of the fixed set.
    /// Surfaces never see a path outside it; anything unrecognized
    /// collapses to the root view.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "/ASTView" => ViewPath::AstView,
            "/patternView" => ViewPath::PatternView,
            _ => ViewPath::Root,
        }
    }
}

impl std::fmt::Display for ViewPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
