//! Retry sequencing: bounded attempts, fixed backoff between re-invocations,
//! transient load failures consuming attempts, and terminal failure timing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use common::{HookEvent, RecordingHooks, test_tuning, wrapped_page};
use vetrina::application::{PreviewHooks, PreviewWidget, RenderLibrary, RenderRoutine};
use vetrina::domain::session::PreviewStatus;
use vetrina::infra::sim::{RoutineScript, ScriptedLibrarySource, ScriptedRoutine};

const DOC: &[u8] = b"PK\x03\x04sample";

async fn wait_terminal(widget: &PreviewWidget<ScriptedLibrarySource>) -> PreviewStatus {
    let mut status = widget.status_watch();
    *status
        .wait_for(PreviewStatus::is_terminal)
        .await
        .expect("status channel open")
}

#[tokio::test(start_paused = true)]
async fn three_silent_attempts_exhaust_the_budget_on_schedule() {
    let hooks = RecordingHooks::new();
    let hooks_dyn: Arc<dyn PreviewHooks> = hooks.clone();
    let routine = Arc::new(ScriptedRoutine::new(RoutineScript::silent()));
    let primary: Arc<dyn RenderRoutine> = routine.clone();
    let source =
        ScriptedLibrarySource::new(RenderLibrary::new().with_primary(primary));
    let widget = PreviewWidget::new(source, test_tuning(), hooks_dyn);

    let started = Instant::now();
    widget.set_input(Some(Bytes::from_static(DOC)));
    let settled = wait_terminal(&widget).await;

    assert_eq!(settled, PreviewStatus::Failed);
    // Three 2s attempt timeouts separated by two 1.5s backoffs; failure is
    // declared right after the last timeout, not earlier.
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(3 * 2000 + 2 * 1500)
    );
    assert_eq!(routine.calls(), 3);

    let events = hooks.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        HookEvent::Error(message) => {
            assert!(!message.is_empty());
            assert!(message.contains("rendering failed after 3 attempts"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_the_next_invocation() {
    let tuning = test_tuning();
    let page = wrapped_page(&tuning.options);
    let hooks = RecordingHooks::new();
    let hooks_dyn: Arc<dyn PreviewHooks> = hooks.clone();
    let routine = Arc::new(ScriptedRoutine::sequence(vec![
        RoutineScript::resolve_without_content(),
        RoutineScript::write_never_settle(Duration::from_millis(100), page),
    ]));
    let primary: Arc<dyn RenderRoutine> = routine.clone();
    let source =
        ScriptedLibrarySource::new(RenderLibrary::new().with_primary(primary));
    let widget = PreviewWidget::new(source, tuning, hooks_dyn);

    let started = Instant::now();
    widget.set_input(Some(Bytes::from_static(DOC)));
    let settled = wait_terminal(&widget).await;

    assert_eq!(settled, PreviewStatus::Ready);
    // First attempt times out at 2s, backoff holds until 3.5s, and the
    // second invocation's content lands 100ms later.
    assert_eq!(started.elapsed(), Duration::from_millis(2000 + 1500 + 100));
    assert_eq!(routine.calls(), 2);
    // A session that eventually succeeds reports no error.
    assert_eq!(hooks.events(), vec![HookEvent::Rendered]);
}

#[tokio::test(start_paused = true)]
async fn transient_load_failures_consume_attempts_then_recover() {
    let tuning = test_tuning();
    let page = wrapped_page(&tuning.options);
    let hooks = RecordingHooks::new();
    let hooks_dyn: Arc<dyn PreviewHooks> = hooks.clone();
    let routine = Arc::new(ScriptedRoutine::new(RoutineScript::write_never_settle(
        Duration::from_millis(100),
        page,
    )));
    let primary: Arc<dyn RenderRoutine> = routine.clone();
    let source =
        ScriptedLibrarySource::new(RenderLibrary::new().with_primary(primary))
            .failing_first(2);
    let widget = PreviewWidget::new(source, tuning, hooks_dyn);

    let started = Instant::now();
    widget.set_input(Some(Bytes::from_static(DOC)));
    let settled = wait_terminal(&widget).await;

    assert_eq!(settled, PreviewStatus::Ready);
    // Two failed loads cost no detection time, only the backoffs between
    // attempts; the third attempt loads, invokes, and confirms at +100ms.
    assert_eq!(started.elapsed(), Duration::from_millis(1500 + 1500 + 100));
    assert_eq!(routine.calls(), 1);
    assert_eq!(hooks.events(), vec![HookEvent::Rendered]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_failure_carries_the_last_observed_fault() {
    let hooks = RecordingHooks::new();
    let hooks_dyn: Arc<dyn PreviewHooks> = hooks.clone();
    let routine = Arc::new(ScriptedRoutine::new(RoutineScript::sync_fault(
        "font pipeline exploded",
    )));
    let primary: Arc<dyn RenderRoutine> = routine.clone();
    let source =
        ScriptedLibrarySource::new(RenderLibrary::new().with_primary(primary));
    let widget = PreviewWidget::new(source, test_tuning(), hooks_dyn);

    widget.set_input(Some(Bytes::from_static(DOC)));
    let settled = wait_terminal(&widget).await;

    assert_eq!(settled, PreviewStatus::Failed);
    let errors = hooks.error_messages();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("font pipeline exploded"));
}

#[tokio::test(start_paused = true)]
async fn library_that_never_loads_fails_with_the_load_error() {
    let hooks = RecordingHooks::new();
    let hooks_dyn: Arc<dyn PreviewHooks> = hooks.clone();
    let source = ScriptedLibrarySource::new(RenderLibrary::new()).failing_first(usize::MAX);
    let widget = PreviewWidget::new(source, test_tuning(), hooks_dyn);

    let started = Instant::now();
    widget.set_input(Some(Bytes::from_static(DOC)));
    let settled = wait_terminal(&widget).await;

    assert_eq!(settled, PreviewStatus::Failed);
    // Load failures are instant; only the inter-attempt backoffs elapse.
    assert_eq!(started.elapsed(), Duration::from_millis(2 * 1500));

    let errors = hooks.error_messages();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("render library unavailable"));
}
