//! Diagnostic probe: drive the preview engine against a scripted routine and
//! report how the session settled.

use std::{error::Error, process, sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::info;

use vetrina::application::{PreviewHooks, PreviewTuning, PreviewWidget, RenderLibrary};
use vetrina::config::{self, ProbeScenario};
use vetrina::domain::session::PreviewStatus;
use vetrina::infra::sim::{
    RoutineScript, ScriptedLibrarySource, ScriptedRoutine, ScriptedWrite, Settlement,
    wrapped_fragment,
};
use vetrina::infra::telemetry;

// Opaque sample payload with a package-format magic prefix, stands in for a
// real document when none is supplied.
const SAMPLE_DOCUMENT: &[u8] = b"PK\x03\x04vetrina-sample-document";

struct LoggingHooks;

impl PreviewHooks for LoggingHooks {
    fn on_rendered(&self) {
        info!(target = "bin::preview_probe", "host notified: rendered");
    }

    fn on_error(&self, message: &str) {
        info!(target = "bin::preview_probe", message, "host notified: error");
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("preview-probe failed: {error}");
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let (args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let tuning = PreviewTuning::from(&settings.preview);
    let source = scenario_source(args.scenario, &tuning);
    let widget = PreviewWidget::new(source, tuning, Arc::new(LoggingHooks));

    let input = match args.document.as_ref() {
        Some(path) => Bytes::from(tokio::fs::read(path).await?),
        None => Bytes::from_static(SAMPLE_DOCUMENT),
    };

    let mut status = widget.status_watch();
    widget.set_input(Some(input));
    let settled = *status.wait_for(PreviewStatus::is_terminal).await?;

    let summary = serde_json::json!({
        "scenario": format!("{:?}", args.scenario),
        "status": settled,
        "surface_bytes": widget.surface().content_len(),
    });
    println!("{summary}");

    if settled == PreviewStatus::Failed {
        process::exit(2);
    }
    Ok(())
}

fn scenario_source(scenario: ProbeScenario, tuning: &PreviewTuning) -> ScriptedLibrarySource {
    let page = wrapped_fragment(&tuning.options, "<p>Probe page rendered by script.</p>");
    let script = match scenario {
        ProbeScenario::Clean => RoutineScript::write_then_resolve(
            Duration::from_millis(120),
            page,
            Duration::from_millis(150),
        ),
        ProbeScenario::EagerResolve => {
            RoutineScript::resolve_before_content(Duration::from_millis(600), page)
        }
        ProbeScenario::MuteResolve => RoutineScript::resolve_without_content(),
        ProbeScenario::NeverSettles => {
            RoutineScript::write_never_settle(Duration::from_millis(200), page)
        }
        ProbeScenario::RejectsLate => RoutineScript::new(
            vec![
                ScriptedWrite::new(Duration::from_millis(50), "<p>partial</p>".to_string()),
                ScriptedWrite::new(Duration::from_millis(900), page),
            ],
            Settlement::Reject {
                at: Duration::from_millis(120),
                fault: "scripted worker crash".to_string(),
            },
        ),
        ProbeScenario::Faulty => RoutineScript::sync_fault("scripted synchronous fault"),
        ProbeScenario::MissingEntry => {
            return ScriptedLibrarySource::new(RenderLibrary::new());
        }
        ProbeScenario::FlakyLoad => {
            let script = RoutineScript::write_then_resolve(
                Duration::from_millis(120),
                page,
                Duration::from_millis(150),
            );
            return ScriptedLibrarySource::with_primary_script(script).failing_first(2);
        }
    };
    ScriptedLibrarySource::new(
        RenderLibrary::new().with_primary(Arc::new(ScriptedRoutine::new(script))),
    )
}
