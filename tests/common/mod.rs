use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use vetrina::application::{PreviewHooks, PreviewTuning};
use vetrina::domain::options::RenderOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Rendered,
    Error(String),
}

/// Hooks that record every host notification for later assertions.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn rendered_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, HookEvent::Rendered))
            .count()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                HookEvent::Error(message) => Some(message.clone()),
                HookEvent::Rendered => None,
            })
            .collect()
    }
}

impl PreviewHooks for RecordingHooks {
    fn on_rendered(&self) {
        self.events.lock().expect("events lock").push(HookEvent::Rendered);
    }

    fn on_error(&self, message: &str) {
        self.events
            .lock()
            .expect("events lock")
            .push(HookEvent::Error(message.to_string()));
    }
}

/// Default tuning with a cutoff small enough that wrapped test fragments
/// count as content while unwrapped partials do not.
pub fn test_tuning() -> PreviewTuning {
    PreviewTuning {
        min_content_bytes: 64,
        ..PreviewTuning::default()
    }
}

pub fn test_tuning_with_retries(max_retries: u32) -> PreviewTuning {
    PreviewTuning {
        max_retries: NonZeroU32::new(max_retries).expect("nonzero retries"),
        ..test_tuning()
    }
}

pub fn wrapped_page(options: &RenderOptions) -> String {
    vetrina::infra::sim::wrapped_fragment(options, "<p>Rendered page body.</p>")
}
