//! Terminal driver for the document quality loop.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use quality_loop_client::prelude::*;
use quality_loop_client::{
    ArtifactType, ComparisonReport, EventKind, ParsedEvent, ProgressObserver, init_observability,
};
use tracing::{info, warn};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_observability();

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = cli.base_url {
        config = config.base_url(url);
    }
    let service = HttpAnalysisService::new(config)?;

    match cli.command {
        Command::Analyse {
            file,
            artifact_type,
            threshold,
        } => analyse(&service, &file, artifact_type.map(ArtifactType::from), threshold).await,
        Command::Iterate {
            file,
            threshold,
            max_rounds,
            cleanup,
        } => iterate(service, &file, threshold, max_rounds, cleanup).await,
    }
}

fn read_artifact(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if text.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(text)
}

fn step_printer() -> ProgressObserver {
    Arc::new(|event: &ParsedEvent| match event.kind() {
        EventKind::TypeDetected => {
            if let Some(kind) = event.str_field("artifact_type") {
                println!("  detected type: {kind}");
            }
        }
        EventKind::DimensionComplete => {
            let name = event.str_field("dimension").unwrap_or("?");
            match event.data().get("score").and_then(|v| v.as_f64()) {
                Some(score) => println!("  {name}: {score:.0}"),
                None => println!("  {name}: done"),
            }
        }
        _ => {}
    })
}

fn print_result(result: &AnalysisResult) {
    println!(
        "score {:.1} ({:?}), {} issue(s), {} suggestion(s)",
        result.overall_score,
        result.artifact_type,
        result.issues.len(),
        result.suggestions.len()
    );
    for issue in &result.issues {
        println!("  [{:?}] {}: {}", issue.severity, issue.id, issue.description);
    }
}

fn print_comparison(report: &ComparisonReport) {
    println!(
        "  vs round {}: {:+.1}, improved {:?}, regressed {:?}, resolved {}, new {}",
        report.previous_iteration,
        report.score_delta,
        report.improved_dimensions,
        report.regressed_dimensions,
        report.resolved_issues.len(),
        report.new_issues.len()
    );
}

async fn analyse(
    service: &HttpAnalysisService,
    file: &Path,
    artifact_type: Option<ArtifactType>,
    threshold: Option<f64>,
) -> anyhow::Result<()> {
    let mut request = AnalyseRequest::new(read_artifact(file)?);
    if let Some(artifact_type) = artifact_type {
        request = request.artifact_type(artifact_type);
    }
    if let Some(threshold) = threshold {
        request = request.threshold(threshold);
    }

    let mut handle = service.analyse(&request)?;
    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let dispatcher = Dispatcher::<AnalysisResult>::new().observer(step_printer());
    let mut last_message = String::new();
    let state = dispatcher
        .run(&mut handle, |state| {
            if state.loading && state.progress_message != last_message {
                last_message = state.progress_message.clone();
                println!("{last_message}");
            }
        })
        .await;

    match (state.result, state.error) {
        (Some(result), _) => {
            print_result(&result);
            let threshold = threshold.unwrap_or(service.config().default_threshold);
            let verdict = if result.overall_score >= threshold {
                "ready"
            } else {
                "not ready"
            };
            println!("{verdict} (threshold {threshold:.0})");
            Ok(())
        }
        (None, Some(error)) => bail!("analysis failed: {error}"),
        (None, None) => {
            println!("cancelled");
            Ok(())
        }
    }
}

async fn iterate(
    service: HttpAnalysisService,
    file: &Path,
    threshold: Option<f64>,
    max_rounds: u32,
    cleanup: bool,
) -> anyhow::Result<()> {
    let text = read_artifact(file)?;
    let threshold = threshold.unwrap_or(service.config().default_threshold);
    let service = Arc::new(service);
    let mut controller = SessionController::new(service.clone()).with_observer(step_printer());

    let session_id = controller
        .create_session(text, threshold)
        .await?
        .id()
        .to_string();
    println!("session {session_id} (threshold {threshold:.0})");
    controller.start_round()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let mut interrupted = false;
        let update = tokio::select! {
            update = controller.next_update() => update,
            _ = &mut ctrl_c => {
                interrupted = true;
                None
            }
        };
        if interrupted {
            controller.cancel()?;
            println!("cancelled");
            break;
        }

        match update {
            Some(SessionUpdate::Progress(state)) => {
                if !state.progress_message.is_empty() {
                    println!("{}", state.progress_message);
                }
            }
            Some(SessionUpdate::RoundCompleted(round)) => {
                println!("round {}:", round.index);
                print_result(&round.result);
                if let Some(report) = &round.comparison_to_previous {
                    print_comparison(report);
                }
                if controller.phase() == SessionPhase::Ready {
                    println!("ready after {} round(s)", round.index);
                    break;
                }
                if round.index >= max_rounds {
                    println!("stopping after {max_rounds} round(s)");
                    break;
                }
                let accepted: Vec<String> =
                    controller.suggestions().iter().map(|s| s.id.clone()).collect();
                if accepted.is_empty() {
                    println!("no suggestions left");
                    break;
                }
                info!(count = accepted.len(), "accepting suggestions");
                controller.apply_suggestions(&accepted).await?;
            }
            Some(SessionUpdate::RoundFailed(failure)) => bail!("round failed: {failure}"),
            Some(SessionUpdate::RoundRejected { expected, actual }) => {
                bail!("service returned iteration {actual}, expected {expected}")
            }
            None => break,
        }
    }

    match service.fetch_session(&session_id).await {
        Ok(summary) => {
            let scores: Vec<String> = summary
                .history
                .iter()
                .map(|point| format!("{}:{:.0}", point.iteration, point.score))
                .collect();
            println!("history {}", scores.join(" "));
        }
        Err(err) => warn!(error = %err, "failed to fetch session summary"),
    }
    if cleanup {
        service.delete_session(&session_id).await?;
        println!("session {session_id} deleted");
    }
    Ok(())
}
