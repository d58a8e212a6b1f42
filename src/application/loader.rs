use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::domain::error::PreviewError;

use super::invoker::{RenderRoutine, StyledRenderRoutine};

/// Entry points discovered on a loaded render library.
///
/// Real libraries ship a first-class render entry and sometimes a legacy
/// secondary one that takes a separate style surface; either or both may be
/// absent. The invoker probes the primary entry first and falls back to the
/// secondary.
#[derive(Default, Clone)]
pub struct RenderLibrary {
    primary: Option<Arc<dyn RenderRoutine>>,
    secondary: Option<Arc<dyn StyledRenderRoutine>>,
}

impl RenderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(mut self, routine: Arc<dyn RenderRoutine>) -> Self {
        self.primary = Some(routine);
        self
    }

    pub fn with_secondary(mut self, routine: Arc<dyn StyledRenderRoutine>) -> Self {
        self.secondary = Some(routine);
        self
    }

    pub(crate) fn primary(&self) -> Option<&Arc<dyn RenderRoutine>> {
        self.primary.as_ref()
    }

    pub(crate) fn secondary(&self) -> Option<&Arc<dyn StyledRenderRoutine>> {
        self.secondary.as_ref()
    }
}

/// Mechanism that produces the render library, typically by loading an
/// external module. Loads may fail transiently; implementations should
/// surface the failure rather than swallow it.
#[async_trait]
pub trait LibrarySource: Send + Sync + 'static {
    async fn load(&self) -> Result<RenderLibrary, PreviewError>;
}

/// Lazily obtains the render library and caches the handle for as long as
/// the loader is shared. Only successful loads are cached, so a later call
/// retries when the previous failure was transient.
pub struct LibraryLoader<S: LibrarySource> {
    source: S,
    cached: OnceCell<Arc<RenderLibrary>>,
}

impl<S: LibrarySource> LibraryLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: OnceCell::new(),
        }
    }

    pub async fn load(&self) -> Result<Arc<RenderLibrary>, PreviewError> {
        let library = self
            .cached
            .get_or_try_init(|| async {
                debug!(target = "application::loader", "loading render library");
                match self.source.load().await {
                    Ok(library) => Ok(Arc::new(library)),
                    Err(err) => {
                        warn!(
                            target = "application::loader",
                            error = %err,
                            "render library load failed"
                        );
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(library))
    }
}
