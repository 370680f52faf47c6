//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use vigil_core::engine::NotificationOrigin;
use vigil_core::store::{JsonFileStore, StateStore};
use vigil_core::{
    CycleReport, DetectionBatch, Engine, HistoricalAnalytics, IncidentResponse, Resource,
    VigilConfig,
};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: VigilConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            batches,
            analytics,
            fleet,
            state,
            json,
        } => {
            let store = state_store(state, workspace);
            let reports = handle_run(
                config,
                &store,
                &batches,
                analytics.as_deref(),
                fleet.as_deref(),
            )
            .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    println!("{}", summarize(report));
                }
            }
            Ok(())
        }
        Commands::Incidents { state } => {
            let engine = load_engine(config, &state_store(state, workspace))?;
            let snapshot = engine.incidents_snapshot();
            if snapshot.active.is_empty() && snapshot.archived.is_empty() {
                println!("No incidents recorded.");
                return Ok(());
            }
            println!("Active incidents ({}):", snapshot.active.len());
            for incident in &snapshot.active {
                println!(
                    "  {}  {:<13} {:<8} {:<10} at {} (seen {}x)",
                    incident.id,
                    incident.status,
                    incident.priority,
                    incident.kind,
                    incident.location,
                    incident.observations
                );
            }
            println!("Archived incidents ({}):", snapshot.archived.len());
            for incident in &snapshot.archived {
                let details = incident
                    .resolution
                    .as_ref()
                    .map(|r| r.details.as_str())
                    .unwrap_or("");
                println!(
                    "  {}  {:<13} {:<8} {:<10} {}",
                    incident.id, incident.status, incident.priority, incident.kind, details
                );
            }
            Ok(())
        }
        Commands::Plan { id, state } => {
            let engine = load_engine(config, &state_store(state, workspace))?;
            let plan = engine.response_plan(&id)?;
            if plan.is_empty() {
                println!("No response steps apply to {}.", id);
            }
            for (i, step) in plan.iter().enumerate() {
                println!("{}. [{}] {}", i + 1, step.priority, step.action);
                if !step.responders.is_empty() {
                    println!("   Responders: {}", step.responders.join(", "));
                }
                if !step.instructions.is_empty() {
                    println!("   {}", step.instructions);
                }
            }
            Ok(())
        }
        Commands::Respond {
            id,
            action,
            responder,
            outcome,
            notes,
            status,
            priority,
            state,
        } => {
            let store = state_store(state, workspace);
            let engine = load_engine(config, &store)?;
            let mut response = IncidentResponse::new(action, responder, outcome);
            if let Some(notes) = notes {
                response = response.with_notes(notes);
            }
            if let Some(priority) = priority {
                response = response.with_priority(priority);
            }
            engine.update_incident(&id, status, Some(response))?;
            store.save(&engine.export_state())?;
            println!("Recorded response on {}.", id);
            Ok(())
        }
        Commands::Resolve { id, details, state } => {
            let store = state_store(state, workspace);
            let engine = load_engine(config, &store)?;
            engine.resolve_incident(&id, &details)?;
            store.save(&engine.export_state())?;
            println!("Resolved {}.", id);
            Ok(())
        }
        Commands::Close { id, reason, state } => {
            let store = state_store(state, workspace);
            let engine = load_engine(config, &store)?;
            engine.close_incident(&id, &reason)?;
            store.save(&engine.export_state())?;
            println!("Closed {}.", id);
            Ok(())
        }
        Commands::Stats { state } => {
            let engine = load_engine(config, &state_store(state, workspace))?;
            println!("{}", serde_json::to_string_pretty(&engine.statistics())?);
            Ok(())
        }
        Commands::Config { action } => handle_config(action, &config),
    }
}

fn handle_config(action: ConfigAction, config: &VigilConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigAction::Validate => {
            config.validate()?;
            println!("Configuration is valid.");
            Ok(())
        }
    }
}

/// Replay every batch in `batches` as one cycle each, then persist the engine state.
async fn handle_run(
    config: VigilConfig,
    store: &JsonFileStore,
    batches: &Path,
    analytics: Option<&Path>,
    fleet: Option<&Path>,
) -> anyhow::Result<Vec<CycleReport>> {
    let batches = read_batches(batches)?;
    let analytics = analytics
        .map(read_json::<HistoricalAnalytics>)
        .transpose()?;

    let mut engine = load_engine(config, store)?;
    if let Some(path) = fleet {
        let resources: Vec<Resource> = read_json(path)?;
        for resource in resources {
            let id = resource.id.clone();
            if let Err(e) = engine.add_resource(resource) {
                warn!(id = %id, error = %e, "Skipping fleet entry");
            }
        }
    }

    let mut notifications = engine.subscribe();
    let listener = tokio::spawn(async move {
        while let Some(n) = notifications.recv().await {
            let origin = match n.origin {
                NotificationOrigin::Threat => "threat",
                NotificationOrigin::Allocation => "allocation",
            };
            warn!(
                cycle = n.cycle,
                origin,
                priority = %n.recommendation.priority,
                details = %n.recommendation.details,
                "{}",
                n.recommendation.action
            );
        }
    });

    let mut reports = Vec::with_capacity(batches.len());
    for batch in &batches {
        reports.push(engine.run_cycle(batch, analytics.as_ref()));
    }
    store.save(&engine.export_state())?;
    info!(
        cycles = reports.len(),
        path = %store.path().display(),
        "Replay finished, state saved"
    );

    // Dropping the engine closes the channel so the listener drains and exits.
    drop(engine);
    listener.await?;
    Ok(reports)
}

/// Parse a file holding a JSON array of detector-name to payload maps.
fn read_batches(path: &Path) -> anyhow::Result<Vec<DetectionBatch>> {
    let value: serde_json::Value = read_json(path)?;
    let Some(cycles) = value.as_array() else {
        anyhow::bail!(
            "{} must contain a JSON array of detection batches",
            path.display()
        );
    };
    Ok(cycles.iter().map(DetectionBatch::from_json).collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
}

fn load_engine(config: VigilConfig, store: &JsonFileStore) -> anyhow::Result<Engine> {
    let engine = match store.load()? {
        Some(state) => {
            info!(path = %store.path().display(), cycle = state.cycle, "Resuming from saved state");
            Engine::from_state(config, state)?
        }
        None => Engine::new(config)?,
    };
    Ok(engine)
}

fn state_store(explicit: Option<PathBuf>, workspace: &Path) -> JsonFileStore {
    JsonFileStore::new(explicit.unwrap_or_else(|| default_state_path(workspace)))
}

/// `<data dir>/state.json`, or `<workspace>/.vigil/state.json` when no home directory is known.
fn default_state_path(workspace: &Path) -> PathBuf {
    directories::ProjectDirs::from("dev", "vigil", "vigil")
        .map(|d| d.data_dir().join("state.json"))
        .unwrap_or_else(|| workspace.join(".vigil").join("state.json"))
}

fn summarize(report: &CycleReport) -> String {
    let a = &report.assessment;
    let mut line = format!(
        "Cycle {}: threat level {:.2}, {} immediate, {} potential, {} anomalies; \
         {} opened, {} observed; {} assigned, coverage {:.2}%",
        report.cycle,
        a.threat_level,
        a.immediate_threats.len(),
        a.potential_threats.len(),
        a.anomalies.len(),
        report.opened.len(),
        report.observed.len(),
        report.plan.assignments.len(),
        report.plan.coverage.overall_coverage * 100.0
    );
    if !report.complete {
        line.push_str(&format!(" [partial: {}]", report.failures.join("; ")));
    }
    line
}
