use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

/// Mutable view surface the external routine writes rendered output into.
///
/// Handles are cheap clones of one shared surface; the live session owns the
/// surface for its lifetime and hands a clone to the routine. Every
/// structural change bumps a revision published on a watch channel, which is
/// what the completion detector subscribes to in place of a DOM mutation
/// observer. Changes performed before a subscriber's first poll coalesce
/// into a single notification carrying the latest revision.
#[derive(Debug, Clone)]
pub struct ViewSurface {
    shared: Arc<SurfaceShared>,
}

#[derive(Debug)]
struct SurfaceShared {
    content: Mutex<String>,
    revision: watch::Sender<u64>,
}

impl ViewSurface {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(SurfaceShared {
                content: Mutex::new(String::new()),
                revision,
            }),
        }
    }

    /// Discard all rendered output. Bumps the revision like any other
    /// structural change.
    pub fn clear(&self) {
        self.mutate(|content| content.clear());
    }

    /// Append a rendered fragment.
    pub fn append(&self, fragment: &str) {
        self.mutate(|content| content.push_str(fragment));
    }

    /// Byte length of the serialized content.
    pub fn content_len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether the serialized content contains `marker`.
    pub fn contains(&self, marker: &str) -> bool {
        self.lock().contains(marker)
    }

    /// Copy of the serialized content.
    pub fn content(&self) -> String {
        self.lock().clone()
    }

    /// Current structural revision.
    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    /// Subscribe to structural-change notifications. The receiver resolves
    /// for every revision advance after this call.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    fn mutate(&self, apply: impl FnOnce(&mut String)) {
        let mut content = self.lock();
        apply(&mut content);
        // Publish while the content lock is held so observers never see a
        // revision ahead of the content it describes.
        self.shared.revision.send_modify(|revision| *revision += 1);
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        match self.shared.content.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ViewSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_accumulate_and_bump_revision() {
        let surface = ViewSurface::new();
        assert_eq!(surface.revision(), 0);
        assert!(surface.is_empty());

        surface.append("<p>a</p>");
        surface.append("<p>b</p>");

        assert_eq!(surface.content(), "<p>a</p><p>b</p>");
        assert_eq!(surface.content_len(), 16);
        assert_eq!(surface.revision(), 2);
    }

    #[test]
    fn clear_discards_content_but_still_counts_as_a_change() {
        let surface = ViewSurface::new();
        surface.append("<p>stale</p>");
        surface.clear();

        assert!(surface.is_empty());
        assert_eq!(surface.revision(), 2);
    }

    #[tokio::test]
    async fn watchers_observe_changes_since_subscription() {
        let surface = ViewSurface::new();
        surface.append("before");

        let mut revisions = surface.watch_revision();
        assert_eq!(*revisions.borrow_and_update(), 1);

        surface.append("after");
        revisions.changed().await.expect("sender alive");
        assert_eq!(*revisions.borrow_and_update(), 2);
        assert!(surface.contains("after"));
    }
}
