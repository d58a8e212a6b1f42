//! Completion detection for an untrusted rendering routine.
//!
//! The routine's own completion signal is not trustworthy: it has been
//! observed resolving before any content exists, rejecting despite partial
//! useful output, and never settling at all. Ground truth is therefore
//! "the surface now holds substantial rendered content", approximated by a
//! structural heuristic and established by racing three independent checks:
//! delayed snapshots, structural-change notifications, and a single re-check
//! when the routine's own signal arrives. The first check to confirm content
//! wins; returning from the race tears the other checks down, so verdicts
//! settle exactly once per attempt.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::domain::session::{DetectionVerdict, Evidence};
use crate::infra::surface::ViewSurface;

use super::invoker::{InvocationHandle, RoutineFault};

/// Structural check deciding whether the surface holds real rendered
/// content: serialized length crossing a cutoff, or the wrapper marker the
/// routine frames finished output in. The cutoff is an empirically tuned
/// constant, not a semantic contract.
#[derive(Debug, Clone)]
pub struct ContentHeuristic {
    min_content_bytes: usize,
    wrapper_marker: String,
}

impl ContentHeuristic {
    pub fn new(min_content_bytes: usize, wrapper_marker: impl Into<String>) -> Self {
        Self {
            min_content_bytes,
            wrapper_marker: wrapper_marker.into(),
        }
    }

    pub fn is_met(&self, surface: &ViewSurface) -> bool {
        if surface.content_len() >= self.min_content_bytes {
            return true;
        }
        !self.wrapper_marker.is_empty() && surface.contains(&self.wrapper_marker)
    }
}

/// Bounds one attempt. On expiry the surface gets one last structural check
/// before the attempt is declared timed out, covering content that appeared
/// without any snapshot or mutation catching it.
pub struct TimeoutGuard {
    deadline: Instant,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
        }
    }

    pub async fn expired(&self) {
        time::sleep_until(self.deadline).await;
    }

    pub fn final_check(&self, heuristic: &ContentHeuristic, surface: &ViewSurface) -> DetectionVerdict {
        DetectionVerdict {
            has_content: heuristic.is_met(surface),
            evidence: Evidence::StructuralSnapshot,
        }
    }
}

/// Result of one attempt's detection race.
#[derive(Debug)]
pub struct DetectionOutcome {
    pub verdict: DetectionVerdict,
    /// Fault the routine reported during the attempt, if any. Informative
    /// only; a fault never decides the verdict by itself.
    pub fault: Option<RoutineFault>,
    pub elapsed: Duration,
}

/// Race the three completion checks until one confirms content or the
/// attempt deadline passes.
///
/// `revisions` must have been subscribed before the routine was invoked so
/// that writes performed during invocation are observed. Settlement is
/// exactly-once: returning drops every pending timer, the revision watch,
/// and the invocation handle (which aborts the signal forwarder).
pub async fn observe(
    surface: &ViewSurface,
    mut invocation: InvocationHandle,
    mut revisions: watch::Receiver<u64>,
    heuristic: &ContentHeuristic,
    snapshot_delays: &[Duration],
    attempt_timeout: Duration,
) -> DetectionOutcome {
    let started_at = Instant::now();
    let guard = TimeoutGuard::new(attempt_timeout);

    let mut fault: Option<RoutineFault> = None;
    let mut signal_open = true;
    let mut watch_open = true;
    let mut delays = snapshot_delays.iter().copied();
    let mut next_snapshot = delays.next();

    let verdict = loop {
        tokio::select! {
            _ = snapshot_sleep(started_at, next_snapshot), if next_snapshot.is_some() => {
                if heuristic.is_met(surface) {
                    break DetectionVerdict::positive(Evidence::StructuralSnapshot);
                }
                next_snapshot = delays.next();
            }
            changed = revisions.changed(), if watch_open => {
                match changed {
                    Ok(()) => {
                        if heuristic.is_met(surface) {
                            break DetectionVerdict::positive(Evidence::MutationEvent);
                        }
                    }
                    // The surface is gone; nothing can mutate it any more,
                    // so only the remaining timed checks matter.
                    Err(_) => watch_open = false,
                }
            }
            settled = &mut invocation.signal, if signal_open => {
                signal_open = false;
                match settled {
                    Ok(Ok(())) => {
                        // Bare resolution is not success; the surface decides.
                        if heuristic.is_met(surface) {
                            break DetectionVerdict::positive(Evidence::LibrarySignal);
                        }
                        debug!(
                            target = "application::detector",
                            elapsed_ms = started_at.elapsed().as_millis() as u64,
                            "routine resolved before content materialized"
                        );
                    }
                    Ok(Err(routine_fault)) => {
                        // Partial success is preferred over reporting failure:
                        // content already on the surface wins, and content
                        // arriving later can still win through the other arms.
                        if heuristic.is_met(surface) {
                            break DetectionVerdict::positive(Evidence::LibrarySignal);
                        }
                        warn!(
                            target = "application::detector",
                            error = %routine_fault,
                            "routine rejected; structural checks continue"
                        );
                        fault = Some(routine_fault);
                    }
                    // Forwarder dropped without settling; indistinguishable
                    // from a deferred value that never settles.
                    Err(_) => {}
                }
            }
            _ = guard.expired() => {
                break guard.final_check(heuristic, surface);
            }
        }
    };

    DetectionOutcome {
        verdict,
        fault,
        elapsed: started_at.elapsed(),
    }
}

async fn snapshot_sleep(started_at: Instant, delay: Option<Duration>) {
    match delay {
        Some(delay) => time::sleep_until(started_at + delay).await,
        // Guarded out of the race by the caller; never polled.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{invoker, loader::RenderLibrary};
    use crate::domain::options::RenderOptions;
    use crate::infra::sim::{RoutineScript, ScriptedRoutine, ScriptedWrite, Settlement};
    use bytes::Bytes;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn delays() -> Vec<Duration> {
        vec![Duration::from_millis(300), Duration::from_millis(1500)]
    }

    fn heuristic() -> ContentHeuristic {
        ContentHeuristic::new(64, "doc-wrapper")
    }

    fn run_script(script: RoutineScript, surface: &ViewSurface) -> InvocationHandle {
        let library =
            RenderLibrary::new().with_primary(Arc::new(ScriptedRoutine::new(script)));
        invoker::invoke(
            &library,
            Bytes::from_static(b"doc"),
            surface,
            &RenderOptions::default(),
        )
        .expect("invocable")
    }

    #[test]
    fn heuristic_honors_length_and_marker() {
        let check = ContentHeuristic::new(16, "doc-wrapper");
        let surface = ViewSurface::new();
        assert!(!check.is_met(&surface));

        surface.append("tiny");
        assert!(!check.is_met(&surface));

        surface.append("<div class=\"doc-wrapper\">");
        assert!(check.is_met(&surface));

        let by_length = ContentHeuristic::new(4, "");
        assert!(by_length.is_met(&surface));
    }

    #[tokio::test(start_paused = true)]
    async fn final_check_rescues_content_present_at_expiry() {
        let surface = ViewSurface::new();
        surface.append("<div class=\"doc-wrapper\">late but real</div>");

        let guard = TimeoutGuard::new(TIMEOUT);
        let verdict = guard.final_check(&heuristic(), &surface);
        assert!(verdict.has_content);
        assert_eq!(verdict.evidence, Evidence::StructuralSnapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_confirms_content_as_soon_as_it_crosses_the_cutoff() {
        let surface = ViewSurface::new();
        let revisions = surface.watch_revision();
        let invocation = run_script(
            RoutineScript::write_never_settle(
                Duration::from_millis(120),
                "<div class=\"doc-wrapper\">page one</div>",
            ),
            &surface,
        );

        let started = Instant::now();
        let outcome = observe(
            &surface,
            invocation,
            revisions,
            &heuristic(),
            &delays(),
            TIMEOUT,
        )
        .await;

        assert!(outcome.verdict.has_content);
        assert_eq!(outcome.verdict.evidence, Evidence::MutationEvent);
        assert_eq!(started.elapsed(), Duration::from_millis(120));
        assert!(outcome.fault.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bare_resolution_is_not_trusted() {
        let surface = ViewSurface::new();
        let revisions = surface.watch_revision();
        let invocation = run_script(RoutineScript::resolve_without_content(), &surface);

        let outcome = observe(
            &surface,
            invocation,
            revisions,
            &heuristic(),
            &delays(),
            TIMEOUT,
        )
        .await;

        assert!(!outcome.verdict.has_content);
        assert_eq!(outcome.elapsed, TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn content_after_rejection_still_wins() {
        let surface = ViewSurface::new();
        let revisions = surface.watch_revision();
        let invocation = run_script(
            RoutineScript::new(
                vec![
                    ScriptedWrite::new(Duration::from_millis(50), "partial"),
                    ScriptedWrite::new(
                        Duration::from_millis(800),
                        "<div class=\"doc-wrapper\">full document</div>",
                    ),
                ],
                Settlement::Reject {
                    at: Duration::from_millis(100),
                    fault: "worker crashed".to_string(),
                },
            ),
            &surface,
        );

        let started = Instant::now();
        let outcome = observe(
            &surface,
            invocation,
            revisions,
            &heuristic(),
            &delays(),
            TIMEOUT,
        )
        .await;

        assert!(outcome.verdict.has_content);
        assert_eq!(outcome.verdict.evidence, Evidence::MutationEvent);
        assert_eq!(started.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_the_recorded_fault() {
        let surface = ViewSurface::new();
        let revisions = surface.watch_revision();
        let invocation = run_script(
            RoutineScript::new(
                Vec::new(),
                Settlement::Reject {
                    at: Duration::from_millis(100),
                    fault: "font pipeline failed".to_string(),
                },
            ),
            &surface,
        );

        let outcome = observe(
            &surface,
            invocation,
            revisions,
            &heuristic(),
            &delays(),
            TIMEOUT,
        )
        .await;

        assert!(!outcome.verdict.has_content);
        assert_eq!(
            outcome.fault.expect("fault recorded").message(),
            "font pipeline failed"
        );
        assert_eq!(outcome.elapsed, TIMEOUT);
    }
}
