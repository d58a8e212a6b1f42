use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::info;

use crate::config::PreviewSettings;
use crate::domain::{
    options::RenderOptions,
    session::{PreviewStatus, SessionId},
};
use crate::infra::surface::ViewSurface;

use super::loader::{LibraryLoader, LibrarySource};
use super::session::{self, SessionGate, SessionRegistry, SessionRuntime};

const DEFAULT_MAX_RETRIES: NonZeroU32 = NonZeroU32::new(3).unwrap();
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1500);
const DEFAULT_SNAPSHOT_DELAYS: [Duration; 2] =
    [Duration::from_millis(300), Duration::from_millis(1500)];
const DEFAULT_MIN_CONTENT_BYTES: usize = 512;

/// Behavioral tunables for the preview engine. Binaries derive this from
/// [`PreviewSettings`]; library hosts construct it directly.
#[derive(Debug, Clone)]
pub struct PreviewTuning {
    /// Attempt budget per session.
    pub max_retries: NonZeroU32,
    /// Hard deadline per attempt.
    pub attempt_timeout: Duration,
    /// Delay between a negative verdict and the next invocation.
    pub retry_backoff: Duration,
    /// Delays after which the surface is inspected outright.
    pub snapshot_delays: Vec<Duration>,
    /// Content-length cutoff for the completion heuristic.
    pub min_content_bytes: usize,
    /// Options forwarded to the routine; the wrapper class doubles as the
    /// heuristic's structural marker.
    pub options: RenderOptions,
}

impl Default for PreviewTuning {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            snapshot_delays: DEFAULT_SNAPSHOT_DELAYS.to_vec(),
            min_content_bytes: DEFAULT_MIN_CONTENT_BYTES,
            options: RenderOptions::default(),
        }
    }
}

impl From<&PreviewSettings> for PreviewTuning {
    fn from(settings: &PreviewSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            attempt_timeout: settings.attempt_timeout,
            retry_backoff: settings.retry_backoff,
            snapshot_delays: settings.snapshot_delays.clone(),
            min_content_bytes: settings.min_content_bytes,
            options: RenderOptions {
                wrapper_class_name: settings.wrapper_class_name.clone(),
                use_inline_encoding: settings.use_inline_encoding,
                paginate: settings.paginate,
                allow_multi_worker: settings.allow_multi_worker,
            },
        }
    }
}

/// Callbacks into the host. Default implementations ignore everything, so
/// hosts implement only what they need. Hooks fire outside the widget's
/// internal lock; re-entering the widget from a hook is allowed.
pub trait PreviewHooks: Send + Sync + 'static {
    /// Fired exactly once per successful session.
    fn on_rendered(&self) {}
    /// Fired at most once per session, on terminal failure only.
    fn on_error(&self, message: &str) {
        let _ = message;
    }
}

/// Hooks for hosts that only consume the status channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl PreviewHooks for NoHooks {}

/// Document-preview widget: owns the visible state machine and the view
/// surface, and runs at most one live render session at a time.
///
/// Methods that start sessions spawn onto the ambient tokio runtime and must
/// be called from within one.
pub struct PreviewWidget<S: LibrarySource> {
    loader: Arc<LibraryLoader<S>>,
    surface: ViewSurface,
    tuning: PreviewTuning,
    hooks: Arc<dyn PreviewHooks>,
    registry: Arc<SessionRegistry>,
}

impl<S: LibrarySource> PreviewWidget<S> {
    pub fn new(source: S, tuning: PreviewTuning, hooks: Arc<dyn PreviewHooks>) -> Self {
        Self {
            loader: Arc::new(LibraryLoader::new(source)),
            surface: ViewSurface::new(),
            tuning,
            hooks,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Hand the widget a document to preview, or `None` to clear it.
    ///
    /// A new non-empty input synchronously invalidates any in-flight session
    /// before its replacement starts: the superseded session can no longer
    /// mutate widget state or reach the host hooks, no matter when its
    /// pending timers fire. An empty payload counts as no input.
    pub fn set_input(&self, input: Option<Bytes>) -> Option<SessionId> {
        match input.filter(|payload| !payload.is_empty()) {
            Some(input) => Some(self.start_session(input)),
            None => {
                self.registry.clear();
                None
            }
        }
    }

    /// Re-render the current input with a fresh attempt budget, superseding
    /// any in-flight session. No-op without an input.
    pub fn retry(&self) -> Option<SessionId> {
        let input = self.registry.current_input()?;
        Some(self.start_session(input))
    }

    fn start_session(&self, input: Bytes) -> SessionId {
        let generation = self.registry.begin(input.clone());
        let id = SessionId::new();
        info!(
            target = "application::widget",
            session = %id,
            input_bytes = input.len(),
            "starting preview session"
        );
        let gate = SessionGate::new(Arc::clone(&self.registry), generation);
        let runtime = SessionRuntime {
            loader: Arc::clone(&self.loader),
            surface: self.surface.clone(),
            tuning: self.tuning.clone(),
            hooks: Arc::clone(&self.hooks),
        };
        let driver = tokio::spawn(session::drive(gate, id, input, runtime));
        self.registry.register(generation, driver);
        id
    }

    /// Current visible state.
    pub fn status(&self) -> PreviewStatus {
        self.registry.current_status()
    }

    /// Subscribe to visible-state changes.
    pub fn status_watch(&self) -> watch::Receiver<PreviewStatus> {
        self.registry.status_watch()
    }

    /// The surface the routine renders into.
    pub fn surface(&self) -> &ViewSurface {
        &self.surface
    }

    /// Tear down the live session: disconnect its observer, drop its timers,
    /// and return to idle. Safe to call any number of times.
    pub fn cancel(&self) {
        self.registry.clear();
    }
}

impl<S: LibrarySource> Drop for PreviewWidget<S> {
    fn drop(&mut self) {
        self.registry.clear();
    }
}
