use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::domain::{error::PreviewError, options::RenderOptions};
use crate::infra::surface::ViewSurface;

use super::loader::RenderLibrary;

/// Fault raised by the external routine, synchronously or through its
/// deferred value.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RoutineFault {
    message: String,
}

impl RoutineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What the routine handed back when invoked: either it completed on the
/// spot, or it returned a deferred value that may settle later — or never.
pub enum RoutineReturn {
    Completed(Result<(), RoutineFault>),
    Deferred(BoxFuture<'static, Result<(), RoutineFault>>),
}

impl fmt::Debug for RoutineReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(result) => f.debug_tuple("Completed").field(result).finish(),
            Self::Deferred(_) => f.debug_tuple("Deferred").finish(),
        }
    }
}

/// First-class call shape: render straight into the view surface.
pub trait RenderRoutine: Send + Sync {
    fn render(&self, input: Bytes, surface: ViewSurface, options: &RenderOptions) -> RoutineReturn;
}

/// Legacy call shape that parks stylesheet output in a separate surface.
pub trait StyledRenderRoutine: Send + Sync {
    fn render(
        &self,
        input: Bytes,
        surface: ViewSurface,
        style_surface: ViewSurface,
        options: &RenderOptions,
    ) -> RoutineReturn;
}

/// A live invocation. The routine has already been called; its own
/// completion signal, if it ever settles, arrives on `signal`. Dropping the
/// handle aborts the forwarder task, so a superseded attempt can never
/// deliver a late signal into a newer one.
#[derive(Debug)]
pub struct InvocationHandle {
    pub(crate) signal: oneshot::Receiver<Result<(), RoutineFault>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Drop for InvocationHandle {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Call the library's render entry against the surface.
///
/// Probes the primary entry first and falls back to the secondary shape;
/// with neither present the invocation fails fatally. The surface is cleared
/// before the call so stale output from a prior attempt can never satisfy
/// the completion heuristic. The caller is never blocked on the routine's
/// own deferred value: its settlement is forwarded through the handle and
/// means nothing on its own.
pub fn invoke(
    library: &RenderLibrary,
    input: Bytes,
    surface: &ViewSurface,
    options: &RenderOptions,
) -> Result<InvocationHandle, PreviewError> {
    let outcome = match (library.primary(), library.secondary()) {
        (Some(routine), _) => {
            surface.clear();
            routine.render(input, surface.clone(), options)
        }
        (None, Some(routine)) => {
            surface.clear();
            // The legacy shape wants somewhere to park stylesheet output;
            // give it a surface of its own so style fragments never count
            // as rendered content.
            let style_surface = ViewSurface::new();
            routine.render(input, surface.clone(), style_surface, options)
        }
        (None, None) => return Err(PreviewError::NoRenderEntryPoint),
    };

    let (settled_tx, settled_rx) = oneshot::channel();
    let forwarder = match outcome {
        RoutineReturn::Completed(result) => {
            if let Err(fault) = &result {
                warn!(
                    target = "application::invoker",
                    error = %fault,
                    "render routine faulted synchronously"
                );
            }
            let _ = settled_tx.send(result);
            None
        }
        RoutineReturn::Deferred(deferred) => Some(tokio::spawn(async move {
            let result = deferred.await;
            // The receiver is gone once the attempt settled; a late signal
            // is deliberately dropped.
            let _ = settled_tx.send(result);
        })),
    };

    Ok(InvocationHandle {
        signal: settled_rx,
        forwarder,
    })
}
