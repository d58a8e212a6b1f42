//! Application services: the render-completion detection engine.
//!
//! The pipeline is deliberately split along its trust boundary: the loader
//! and invoker talk to the untrusted external routine, the detector decides
//! ground truth from the surface alone, and the session driver sequences
//! attempts and guards every state mutation behind a session-identity check.

mod detector;
mod invoker;
mod loader;
mod session;
mod widget;

pub use detector::{ContentHeuristic, DetectionOutcome, TimeoutGuard, observe};
pub use invoker::{
    InvocationHandle, RenderRoutine, RoutineFault, RoutineReturn, StyledRenderRoutine, invoke,
};
pub use loader::{LibraryLoader, LibrarySource, RenderLibrary};
pub use widget::{NoHooks, PreviewHooks, PreviewTuning, PreviewWidget};
