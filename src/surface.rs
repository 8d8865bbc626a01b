//! The seam between the session core and the editor-side UI plumbing.
//!
//! The host never touches the editor API directly: it asks a
//! [`SurfaceFactory`] to put a surface on screen, hands it the surface
//! side of the envelope channels, and keeps a [`Surface`] control handle
//! for the two operations the protocol needs (reveal, retitle). Everything
//! else the surface does is its own business.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;

/// Surface construction failed: required assets missing, content could not
/// be produced. This is the one condition in the protocol that aborts
/// session construction instead of degrading to a boolean or an empty
/// result, so it propagates as an error.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface content could not be produced: {0}")]
    ContentUnavailable(String),
    #[error("surface host rejected creation: {0}")]
    Rejected(String),
}

/// Control handle for one live UI surface.
pub trait Surface: Send + Sync {
    /// Bring the surface to the front.
    fn reveal(&self);

    /// Update the surface's display label.
    fn set_title(&self, title: &str);
}

/// The surface side of a new session's wiring, handed to the factory.
pub struct SurfaceEndpoints {
    /// Envelopes from the host, in send order.
    pub incoming: mpsc::Receiver<Envelope>,
    /// Replies back to the host (`Started`, `<T>Ack`, anything else).
    pub replies: mpsc::Sender<Envelope>,
    /// Cancelled by the surface when the user closes it; cancelled by the
    /// host on programmatic disposal. Either way the transport is dead.
    pub closed: CancellationToken,
}

/// Creates UI surfaces. Implemented by the editor-side collaborator.
pub trait SurfaceFactory: Send + Sync {
    /// Put a new surface on screen under `title` and wire it to
    /// `endpoints`, returning the control handle the host keeps.
    fn create(&self, title: &str, endpoints: SurfaceEndpoints)
        -> Result<Arc<dyn Surface>, SurfaceError>;
}
