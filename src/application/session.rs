//! Session lifecycle and retry control.
//!
//! At most one session per widget is ever live. Superseding the input
//! synchronously invalidates the previous session — its driver task is
//! aborted and the registry generation advances — before the replacement is
//! constructed, so stale timers and observers can never affect the new
//! session's state. Every callback site re-checks the generation under the
//! registry lock rather than trusting best-effort flags.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::domain::{
    error::PreviewError,
    session::{PreviewStatus, SessionId},
};
use crate::infra::surface::ViewSurface;

use super::detector::{self, ContentHeuristic};
use super::invoker;
use super::loader::{LibraryLoader, LibrarySource};
use super::widget::{PreviewHooks, PreviewTuning};

const METRIC_ATTEMPTS_TOTAL: &str = "vetrina_preview_attempts_total";
const METRIC_RETRIES_TOTAL: &str = "vetrina_preview_retries_total";
const METRIC_READY_TOTAL: &str = "vetrina_preview_ready_total";
const METRIC_FAILED_TOTAL: &str = "vetrina_preview_failed_total";
const METRIC_DETECTION_MS: &str = "vetrina_detection_ms";

/// Fallback surfaced to the host when no attempt produced a usable error.
pub(crate) const DEFAULT_FAILURE_MESSAGE: &str = "document rendering failed, please retry";

/// Book-keeping shared between a widget and its driver tasks. The generation
/// counter is the session-identity token; it only ever advances.
pub(crate) struct SessionRegistry {
    state: Mutex<RegistryState>,
    status: watch::Sender<PreviewStatus>,
}

struct RegistryState {
    generation: u64,
    live: Option<JoinHandle<()>>,
    input: Option<Bytes>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(PreviewStatus::Idle);
        Self {
            state: Mutex::new(RegistryState {
                generation: 0,
                live: None,
                input: None,
            }),
            status,
        }
    }

    pub(crate) fn status_watch(&self) -> watch::Receiver<PreviewStatus> {
        self.status.subscribe()
    }

    pub(crate) fn current_status(&self) -> PreviewStatus {
        *self.status.borrow()
    }

    pub(crate) fn current_input(&self) -> Option<Bytes> {
        self.lock().input.clone()
    }

    /// Invalidate the live session (if any), remember the new input, and
    /// hand out the next generation. Runs synchronously: by the time this
    /// returns, the superseded session can no longer observe itself as
    /// current.
    pub(crate) fn begin(&self, input: Bytes) -> u64 {
        let mut state = self.lock();
        if let Some(live) = state.live.take() {
            live.abort();
        }
        state.generation += 1;
        state.input = Some(input);
        state.generation
    }

    /// Record the driver task for the session at `generation`, unless it has
    /// already been superseded, in which case the task is aborted on the
    /// spot.
    pub(crate) fn register(&self, generation: u64, driver: JoinHandle<()>) {
        let mut state = self.lock();
        if state.generation == generation {
            state.live = Some(driver);
        } else {
            driver.abort();
        }
    }

    /// Cancel whatever is running, drop the remembered input, and return to
    /// idle. Safe to call any number of times.
    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        if let Some(live) = state.live.take() {
            live.abort();
        }
        state.generation += 1;
        state.input = None;
        self.status.send_replace(PreviewStatus::Idle);
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A session's capability to touch shared state: the registry plus the
/// generation it was minted at. All mutations are no-ops once superseded.
#[derive(Clone)]
pub(crate) struct SessionGate {
    registry: Arc<SessionRegistry>,
    generation: u64,
}

impl SessionGate {
    pub(crate) fn new(registry: Arc<SessionRegistry>, generation: u64) -> Self {
        Self {
            registry,
            generation,
        }
    }

    /// Publish a status change if this session is still the live one.
    /// Returns false when it has been superseded.
    fn transition(&self, status: PreviewStatus) -> bool {
        let state = self.registry.lock();
        if state.generation != self.generation {
            return false;
        }
        // Publish while holding the state lock so a supersede cannot
        // interleave between the check and the write.
        self.registry.status.send_replace(status);
        true
    }

    /// Mark the session terminal and detach it from the registry. The caller
    /// fires host hooks only when this returns true, which keeps callbacks
    /// at most-once per session.
    fn settle(&self, status: PreviewStatus) -> bool {
        let mut state = self.registry.lock();
        if state.generation != self.generation {
            return false;
        }
        state.live = None;
        self.registry.status.send_replace(status);
        true
    }
}

/// Everything a driver needs besides its identity and input.
pub(crate) struct SessionRuntime<S: LibrarySource> {
    pub(crate) loader: Arc<LibraryLoader<S>>,
    pub(crate) surface: ViewSurface,
    pub(crate) tuning: PreviewTuning,
    pub(crate) hooks: Arc<dyn PreviewHooks>,
}

/// Drive one session to a terminal state: load the library, invoke the
/// routine, race the completion checks, and re-invoke on negative verdicts
/// until a positive verdict lands or the attempt budget runs out.
pub(crate) async fn drive<S: LibrarySource>(
    gate: SessionGate,
    id: SessionId,
    input: Bytes,
    runtime: SessionRuntime<S>,
) {
    let heuristic = ContentHeuristic::new(
        runtime.tuning.min_content_bytes,
        runtime.tuning.options.wrapper_class_name.clone(),
    );
    let max_attempts = runtime.tuning.max_retries.get();
    let mut last_error: Option<PreviewError> = None;

    for attempt in 1..=max_attempts {
        if !gate.transition(PreviewStatus::Loading) {
            return;
        }
        if attempt > 1 {
            counter!(METRIC_RETRIES_TOTAL).increment(1);
            time::sleep(runtime.tuning.retry_backoff).await;
        }
        counter!(METRIC_ATTEMPTS_TOTAL).increment(1);
        let started_at = Instant::now();

        let library = match runtime.loader.load().await {
            Ok(library) => library,
            Err(err) => {
                warn!(
                    target = "application::session",
                    session = %id,
                    attempt,
                    error = %err,
                    "render library unavailable"
                );
                last_error = Some(err);
                continue;
            }
        };

        let revisions = runtime.surface.watch_revision();
        let invocation = match invoker::invoke(
            &library,
            input.clone(),
            &runtime.surface,
            &runtime.tuning.options,
        ) {
            Ok(invocation) => invocation,
            Err(err @ PreviewError::NoRenderEntryPoint) => {
                // The contract is structurally absent; retrying cannot help.
                if gate.settle(PreviewStatus::Failed) {
                    counter!(METRIC_FAILED_TOTAL).increment(1);
                    warn!(
                        target = "application::session",
                        session = %id,
                        error = %err,
                        "preview failed"
                    );
                    runtime.hooks.on_error(&err.to_string());
                }
                return;
            }
            Err(err) => {
                last_error = Some(err);
                continue;
            }
        };

        if !gate.transition(PreviewStatus::Detecting) {
            return;
        }

        let outcome = detector::observe(
            &runtime.surface,
            invocation,
            revisions,
            &heuristic,
            &runtime.tuning.snapshot_delays,
            runtime.tuning.attempt_timeout,
        )
        .await;

        histogram!(METRIC_DETECTION_MS).record(outcome.elapsed.as_secs_f64() * 1000.0);

        if outcome.verdict.has_content {
            if gate.settle(PreviewStatus::Ready) {
                counter!(METRIC_READY_TOTAL).increment(1);
                info!(
                    target = "application::session",
                    session = %id,
                    attempt,
                    evidence = ?outcome.verdict.evidence,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "preview ready"
                );
                runtime.hooks.on_rendered();
            }
            return;
        }

        let err = match outcome.fault {
            Some(fault) => PreviewError::invocation(fault.message()),
            None => PreviewError::DetectionTimeout {
                attempt,
                timeout_ms: runtime.tuning.attempt_timeout.as_millis() as u64,
            },
        };
        warn!(
            target = "application::session",
            session = %id,
            attempt,
            max_attempts,
            error = %err,
            "attempt failed"
        );
        last_error = Some(err);
    }

    let message = last_error
        .map(|err| err.to_string())
        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
    let error = PreviewError::RetriesExhausted {
        attempts: max_attempts,
        message,
    };
    if gate.settle(PreviewStatus::Failed) {
        counter!(METRIC_FAILED_TOTAL).increment(1);
        warn!(
            target = "application::session",
            session = %id,
            attempts = max_attempts,
            error = %error,
            "preview failed"
        );
        runtime.hooks.on_error(&error.to_string());
    }
}
