use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of one preview session: one input, rendered into one
/// surface, with retries. Superseding the input mints a fresh identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Externally visible widget state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    /// No input supplied.
    Idle,
    /// An attempt is being prepared (library load, invocation).
    Loading,
    /// The routine has been invoked; completion checks are racing.
    Detecting,
    /// Content was confirmed on the surface. Terminal.
    Ready,
    /// Every attempt was consumed without confirmed content. Terminal.
    Failed,
}

impl PreviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Which of the racing checks produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    /// A delayed inspection of the surface (including the timeout guard's
    /// final check).
    StructuralSnapshot,
    /// A structural-change notification from the surface.
    MutationEvent,
    /// The routine's own settlement, confirmed against the surface.
    LibrarySignal,
}

/// Outcome of one completion check. Consumed by the retry controller and
/// never persisted beyond the attempt that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub has_content: bool,
    pub evidence: Evidence,
}

impl DetectionVerdict {
    pub(crate) fn positive(evidence: Evidence) -> Self {
        Self {
            has_content: true,
            evidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PreviewStatus::Ready.is_terminal());
        assert!(PreviewStatus::Failed.is_terminal());
        assert!(!PreviewStatus::Idle.is_terminal());
        assert!(!PreviewStatus::Loading.is_terminal());
        assert!(!PreviewStatus::Detecting.is_terminal());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
