//! Vetrina: render-completion detection for untrusted document renderers.
//!
//! An external rendering routine is handed an opaque binary document and a
//! view surface to write into. Its asynchronous contract is inconsistent —
//! the deferred value it returns may resolve before content exists, resolve
//! after, never settle, or reject despite partial useful output — so this
//! crate treats the surface itself as ground truth. A session races delayed
//! structural snapshots, mutation notifications, and the routine's own
//! signal into one exactly-once verdict, retrying with backoff until content
//! is confirmed or the attempt budget runs out.
//!
//! [`PreviewWidget`] is the host-facing entry point; [`infra::sim`] ships
//! scripted routines reproducing every observed misbehavior of the real
//! library.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::{
    LibraryLoader, LibrarySource, NoHooks, PreviewHooks, PreviewTuning, PreviewWidget,
    RenderLibrary, RenderRoutine, RoutineFault, RoutineReturn, StyledRenderRoutine,
};
pub use domain::error::PreviewError;
pub use domain::options::RenderOptions;
pub use domain::session::{DetectionVerdict, Evidence, PreviewStatus, SessionId};
pub use infra::surface::ViewSurface;
