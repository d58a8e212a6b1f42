//! Scripted render libraries for demos and tests.
//!
//! The real rendering routine's asynchronous contract is inconsistent: its
//! deferred value may resolve before content exists, resolve after, never
//! settle, or reject despite partial useful output. The scripts here
//! reproduce each observed misbehavior deterministically so the detection
//! engine can be exercised without the real library.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time;

use crate::application::{
    LibrarySource, RenderLibrary, RenderRoutine, RoutineFault, RoutineReturn, StyledRenderRoutine,
};
use crate::domain::{error::PreviewError, options::RenderOptions};
use crate::infra::surface::ViewSurface;

/// One timed write the scripted routine performs against the surface.
#[derive(Debug, Clone)]
pub struct ScriptedWrite {
    pub at: Duration,
    pub fragment: String,
}

impl ScriptedWrite {
    pub fn new(at: Duration, fragment: impl Into<String>) -> Self {
        Self {
            at,
            fragment: fragment.into(),
        }
    }
}

/// How the scripted routine settles its own completion signal.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Return synchronously with success.
    SyncOk,
    /// Fault synchronously.
    SyncFault { fault: String },
    /// Return a deferred value that resolves after `at`.
    Resolve { at: Duration },
    /// Return a deferred value that rejects after `at`.
    Reject { at: Duration, fault: String },
    /// Return a deferred value that never settles.
    Never,
}

/// Full behavior of one scripted invocation: a set of detached timed writes
/// plus a settlement. Writes run independently of the settlement, exactly
/// like the real library's internal scheduling.
#[derive(Debug, Clone)]
pub struct RoutineScript {
    pub writes: Vec<ScriptedWrite>,
    pub settlement: Settlement,
}

impl RoutineScript {
    pub fn new(writes: Vec<ScriptedWrite>, settlement: Settlement) -> Self {
        Self { writes, settlement }
    }

    /// Write `fragment` after `write_at`, resolve after `resolve_at`.
    pub fn write_then_resolve(
        write_at: Duration,
        fragment: impl Into<String>,
        resolve_at: Duration,
    ) -> Self {
        Self::new(
            vec![ScriptedWrite::new(write_at, fragment)],
            Settlement::Resolve { at: resolve_at },
        )
    }

    /// Resolve immediately while content only materializes later.
    pub fn resolve_before_content(write_at: Duration, fragment: impl Into<String>) -> Self {
        Self::new(
            vec![ScriptedWrite::new(write_at, fragment)],
            Settlement::Resolve { at: Duration::ZERO },
        )
    }

    /// Resolve without ever touching the surface.
    pub fn resolve_without_content() -> Self {
        Self::new(Vec::new(), Settlement::Resolve { at: Duration::ZERO })
    }

    /// Write content but never settle the deferred value.
    pub fn write_never_settle(write_at: Duration, fragment: impl Into<String>) -> Self {
        Self::new(
            vec![ScriptedWrite::new(write_at, fragment)],
            Settlement::Never,
        )
    }

    /// Neither write nor settle.
    pub fn silent() -> Self {
        Self::new(Vec::new(), Settlement::Never)
    }

    /// Fault synchronously without touching the surface.
    pub fn sync_fault(fault: impl Into<String>) -> Self {
        Self::new(
            Vec::new(),
            Settlement::SyncFault {
                fault: fault.into(),
            },
        )
    }
}

/// Wrap a rendered body in the wrapper marker the routine is configured to
/// emit, the way the real library frames finished pages.
pub fn wrapped_fragment(options: &RenderOptions, body: &str) -> String {
    format!(
        "<div class=\"{}\"><section class=\"page\">{}</section></div>",
        options.wrapper_class_name, body
    )
}

/// Routine that replays a fixed sequence of scripts, one per invocation. The
/// last script repeats once the sequence is exhausted, so retry tests can
/// express "fail twice, then succeed".
pub struct ScriptedRoutine {
    scripts: Vec<RoutineScript>,
    calls: AtomicUsize,
}

impl ScriptedRoutine {
    pub fn new(script: RoutineScript) -> Self {
        Self::sequence(vec![script])
    }

    pub fn sequence(scripts: Vec<RoutineScript>) -> Self {
        assert!(!scripts.is_empty(), "scripted routine needs a script");
        Self {
            scripts,
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times the routine has been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn play(&self, surface: ViewSurface) -> RoutineReturn {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[call.min(self.scripts.len() - 1)].clone();

        for write in script.writes {
            let surface = surface.clone();
            tokio::spawn(async move {
                time::sleep(write.at).await;
                surface.append(&write.fragment);
            });
        }

        match script.settlement {
            Settlement::SyncOk => RoutineReturn::Completed(Ok(())),
            Settlement::SyncFault { fault } => {
                RoutineReturn::Completed(Err(RoutineFault::new(fault)))
            }
            Settlement::Resolve { at } => RoutineReturn::Deferred(Box::pin(async move {
                time::sleep(at).await;
                Ok(())
            })),
            Settlement::Reject { at, fault } => RoutineReturn::Deferred(Box::pin(async move {
                time::sleep(at).await;
                Err(RoutineFault::new(fault))
            })),
            Settlement::Never => RoutineReturn::Deferred(Box::pin(std::future::pending())),
        }
    }
}

impl RenderRoutine for ScriptedRoutine {
    fn render(&self, _input: Bytes, surface: ViewSurface, _options: &RenderOptions) -> RoutineReturn {
        self.play(surface)
    }
}

/// Scripted secondary entry point: behaves like [`ScriptedRoutine`] but also
/// drops a stylesheet into the separate style surface, as the legacy call
/// shape of the real library does.
pub struct ScriptedStyledRoutine {
    inner: ScriptedRoutine,
}

impl ScriptedStyledRoutine {
    pub fn new(script: RoutineScript) -> Self {
        Self {
            inner: ScriptedRoutine::new(script),
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

impl StyledRenderRoutine for ScriptedStyledRoutine {
    fn render(
        &self,
        _input: Bytes,
        surface: ViewSurface,
        style_surface: ViewSurface,
        options: &RenderOptions,
    ) -> RoutineReturn {
        style_surface.append(&format!(
            "<style>.{} section.page {{ margin: 0 auto; }}</style>",
            options.wrapper_class_name
        ));
        self.inner.play(surface)
    }
}

/// Library source that fails a configured number of loads before handing out
/// its library, for exercising transient load failures.
pub struct ScriptedLibrarySource {
    library: RenderLibrary,
    failures_before_success: usize,
    loads: AtomicUsize,
}

impl ScriptedLibrarySource {
    pub fn new(library: RenderLibrary) -> Self {
        Self {
            library,
            failures_before_success: 0,
            loads: AtomicUsize::new(0),
        }
    }

    /// Fail the first `failures` load calls before succeeding.
    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures_before_success = failures;
        self
    }

    /// How many load calls have been made.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ScriptedLibrarySource {
    /// Source whose primary entry replays `script` on every attempt.
    pub fn with_primary_script(script: RoutineScript) -> Self {
        Self::new(RenderLibrary::new().with_primary(Arc::new(ScriptedRoutine::new(script))))
    }
}

#[async_trait]
impl LibrarySource for ScriptedLibrarySource {
    async fn load(&self) -> Result<RenderLibrary, PreviewError> {
        let load = self.loads.fetch_add(1, Ordering::SeqCst);
        if load < self.failures_before_success {
            return Err(PreviewError::library_unavailable(
                "scripted transient load failure",
            ));
        }
        Ok(self.library.clone())
    }
}
