#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vizhost::config::HostConfig;
use vizhost::envelope::{Envelope, STARTED};
use vizhost::surface::{Surface, SurfaceEndpoints, SurfaceError, SurfaceFactory};

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config with short windows so failure paths don't stall the suite.
pub fn fast_config() -> HostConfig {
    HostConfig {
        ack_timeout_ms: 300,
        boot_timeout_ms: 300,
        ..HostConfig::default()
    }
}

/// One fake visualizer surface, with handles for playing the UI side.
#[derive(Clone)]
pub struct VisualizerProbe {
    pub title: Arc<Mutex<String>>,
    pub reveals: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<Envelope>>>,
    pub replies: mpsc::Sender<Envelope>,
    pub closed: CancellationToken,
}

impl VisualizerProbe {
    /// Signal that the surface content finished booting.
    pub async fn send_started(&self) {
        let _ = self.replies.send(Envelope::control(STARTED)).await;
    }

    /// Confirm receipt of a previously sent envelope of `base` type.
    pub async fn ack(&self, base: &str) {
        let _ = self
            .replies
            .send(Envelope::control(format!("{base}Ack")))
            .await;
    }

    /// Simulate the user closing the surface.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|e| e.msg_type.clone())
            .collect()
    }

    /// Wait until an envelope of the given type has arrived, returning it.
    pub async fn wait_for_envelope(&self, msg_type: &str) -> Envelope {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(env) = self
                .received
                .lock()
                .iter()
                .find(|e| e.msg_type == msg_type)
                .cloned()
            {
                return env;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no {msg_type} envelope within 2s; saw {:?}",
                self.received_types()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Fake editor-side collaborator: builds probe surfaces, optionally
/// booting and confirming automatically.
pub struct FakeEditor {
    auto_start: AtomicBool,
    auto_ack: AtomicBool,
    fail_next: AtomicBool,
    probes: Mutex<Vec<VisualizerProbe>>,
}

impl FakeEditor {
    /// Surfaces boot instantly and confirm every envelope.
    pub fn cooperative() -> Arc<Self> {
        Arc::new(Self {
            auto_start: AtomicBool::new(true),
            auto_ack: AtomicBool::new(true),
            fail_next: AtomicBool::new(false),
            probes: Mutex::new(Vec::new()),
        })
    }

    /// Surfaces do nothing until the test drives them through the probe.
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            auto_start: AtomicBool::new(false),
            auto_ack: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
            probes: Mutex::new(Vec::new()),
        })
    }

    /// Make the next `create` call fail, as if the content bundle were
    /// missing.
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn surfaces(&self) -> usize {
        self.probes.lock().len()
    }

    pub fn probe(&self, index: usize) -> VisualizerProbe {
        self.probes.lock()[index].clone()
    }

    /// Wait until the surface at `index` has been created.
    pub async fn wait_probe(&self, index: usize) -> VisualizerProbe {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(probe) = self.probes.lock().get(index).cloned() {
                return probe;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "surface {index} not created within 2s"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct ProbeSurface {
    title: Arc<Mutex<String>>,
    reveals: Arc<AtomicUsize>,
}

impl Surface for ProbeSurface {
    fn reveal(&self) {
        self.reveals.fetch_add(1, Ordering::SeqCst);
    }
    fn set_title(&self, title: &str) {
        *self.title.lock() = title.to_string();
    }
}

impl SurfaceFactory for FakeEditor {
    fn create(
        &self,
        title: &str,
        mut endpoints: SurfaceEndpoints,
    ) -> Result<Arc<dyn Surface>, SurfaceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SurfaceError::ContentUnavailable(
                "visualizer dist bundle missing".into(),
            ));
        }

        let title_cell = Arc::new(Mutex::new(title.to_string()));
        let reveals = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        self.probes.lock().push(VisualizerProbe {
            title: title_cell.clone(),
            reveals: reveals.clone(),
            received: received.clone(),
            replies: endpoints.replies.clone(),
            closed: endpoints.closed.clone(),
        });

        if self.auto_start.load(Ordering::SeqCst) {
            let _ = endpoints.replies.try_send(Envelope::control(STARTED));
        }

        let auto_ack = self.auto_ack.load(Ordering::SeqCst);
        let replies = endpoints.replies.clone();
        let closed = endpoints.closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    env = endpoints.incoming.recv() => match env {
                        Some(env) => {
                            received.lock().push(env.clone());
                            if auto_ack {
                                let _ = replies
                                    .try_send(Envelope::control(format!("{}Ack", env.msg_type)));
                            }
                        }
                        None => break,
                    },
                    _ = closed.cancelled() => break,
                }
            }
        });

        Ok(Arc::new(ProbeSurface {
            title: title_cell,
            reveals,
        }))
    }
}
