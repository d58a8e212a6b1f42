use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_WRAPPER_CLASS: &str = "doc-wrapper";

/// Options forwarded verbatim to the external rendering routine.
///
/// These only tune the routine's rendering fidelity; none of them affect the
/// detection control flow. The wrapper class doubles as the structural marker
/// the completion heuristic looks for in the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Class the routine wraps finished output in.
    pub wrapper_class_name: String,
    /// Ask the routine to inline binary assets instead of fetching them.
    pub use_inline_encoding: bool,
    /// Ask the routine to split output into discrete page sections.
    pub paginate: bool,
    /// Allow the routine to fan work out across helper workers.
    pub allow_multi_worker: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            wrapper_class_name: DEFAULT_WRAPPER_CLASS.to_string(),
            use_inline_encoding: true,
            paginate: true,
            allow_multi_worker: false,
        }
    }
}
