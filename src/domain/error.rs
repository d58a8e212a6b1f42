use thiserror::Error;

/// Structured errors raised while driving a preview session. Everything here
/// is handled inside the retry controller; only `NoRenderEntryPoint` and
/// `RetriesExhausted` ever reach the host, through its error hook.
#[derive(Debug, Clone, Error)]
pub enum PreviewError {
    /// The render library failed to load. A later load may succeed when the
    /// failure was transient.
    #[error("render library unavailable: {message}")]
    LibraryUnavailable { message: String },
    /// The loaded library exposes neither render entry point. Retrying cannot
    /// help since the contract is structurally absent.
    #[error("render library exposes no render entry point")]
    NoRenderEntryPoint,
    /// The routine faulted during invocation. Counts as a negative verdict
    /// for the attempt; content confirmed on the surface still wins.
    #[error("render invocation failed: {message}")]
    InvocationThrew { message: String },
    /// No check confirmed content before the attempt deadline.
    #[error("no rendered content detected within {timeout_ms}ms (attempt {attempt})")]
    DetectionTimeout { attempt: u32, timeout_ms: u64 },
    /// Every attempt was consumed without a positive verdict. Terminal.
    #[error("rendering failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl PreviewError {
    pub fn library_unavailable(message: impl Into<String>) -> Self {
        Self::LibraryUnavailable {
            message: message.into(),
        }
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::InvocationThrew {
            message: message.into(),
        }
    }

    /// True when a later attempt could still succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoRenderEntryPoint | Self::RetriesExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(PreviewError::library_unavailable("io").is_retryable());
        assert!(PreviewError::invocation("boom").is_retryable());
        assert!(
            PreviewError::DetectionTimeout {
                attempt: 1,
                timeout_ms: 2000
            }
            .is_retryable()
        );
        assert!(!PreviewError::NoRenderEntryPoint.is_retryable());
        assert!(
            !PreviewError::RetriesExhausted {
                attempts: 3,
                message: "timed out".to_string()
            }
            .is_retryable()
        );
    }
}
