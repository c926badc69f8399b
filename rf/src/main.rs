//! ReelForge - moment-to-media generation orchestrator
//!
//! CLI entry point for creating, running and inspecting sessions.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use reelforge::cli::{Cli, Command, OutputFormat, SessionCommand, get_log_path};
use reelforge::config::Config;
use reelforge::domain::{Highlight, MomentStatus, Plan, Session, SessionStage, SequenceStatus};
use reelforge::estimate::estimate_plan;
use reelforge::events::{EventBus, ForgeEvent, create_event_bus, spawn_event_logger};
use reelforge::runner::{SessionManager, SessionTask, join};
use reelforge::scheduler::FixedIntervalGate;
use reelforge::services::{HttpServices, Services};
use reelforge::state::SessionStore;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > RUST_LOG > INFO
    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
    let filter = match cli_log_level {
        Some(_) => tracing_subscriber::EnvFilter::new(level.as_str()),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str())),
    };

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Input file for `rf session create`
#[derive(Debug, Deserialize)]
struct MomentsFile {
    title: String,
    highlights: Vec<Highlight>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(base_url = %config.services.base_url, "ReelForge loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Estimate { plan } => cmd_estimate(&plan),
        Command::Session { command } => match command {
            SessionCommand::Create { moments } => cmd_create(&config, &moments).await,
            SessionCommand::Show { id, format } => cmd_show(&config, &id, format).await,
            SessionCommand::List => cmd_list(&config).await,
        },
        Command::Run { id } => cmd_run(&config, &id).await,
        Command::Regenerate { id, moment, order } => cmd_regenerate(&config, &id, moment, order).await,
    }
}

/// Print the estimate for a plan file
fn cmd_estimate(path: &Path) -> Result<()> {
    debug!(path = %path.display(), "cmd_estimate: called");
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    let mut plan: Plan = serde_json::from_str(&content).context("Failed to parse plan")?;
    plan.recompute();
    let estimate = estimate_plan(&plan);

    println!("Sequences:  {}", plan.sequences.len());
    println!("Duration:   {:.1}s", plan.total_duration_sec);
    println!("Cost:       ${:.2}", estimate.cost);
    println!("Time:       {:.0}s (~{} min)", estimate.seconds, estimate.minutes());
    Ok(())
}

async fn cmd_create(config: &Config, moments: &Path) -> Result<()> {
    debug!(path = %moments.display(), "cmd_create: called");
    let content = fs::read_to_string(moments).context(format!("Failed to read {}", moments.display()))?;
    let input: MomentsFile = serde_json::from_str(&content).context("Failed to parse moments file")?;

    let (manager, _bus) = build_manager(config)?;
    let session = manager
        .create_session(&input.title, input.highlights, &config.storage.output_dir)
        .await?;
    println!("{} {}", "Created".green(), session.id);
    Ok(())
}

async fn cmd_show(config: &Config, reference: &str, format: OutputFormat) -> Result<()> {
    debug!(%reference, %format, "cmd_show: called");
    let store = open_store_read_only(config)?;
    let id = store.resolve(reference).await?;
    let session = store.require(&id).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&session)?),
        OutputFormat::Text => print_session(&session),
    }
    Ok(())
}

async fn cmd_list(config: &Config) -> Result<()> {
    debug!("cmd_list: called");
    let store = open_store_read_only(config)?;
    let sessions = store.list().await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{:<40} {:<14} {:>3}%  {}",
            session.id,
            colored_stage(session.stage),
            session.progress.percent,
            session.title
        );
    }
    Ok(())
}

async fn cmd_run(config: &Config, reference: &str) -> Result<()> {
    debug!(%reference, "cmd_run: called");
    let (manager, bus) = build_manager(config)?;
    let id = manager.store().resolve(reference).await?;
    let task = manager.start_run(&id)?;
    let session = follow(&manager, &bus, &id, task).await?;
    print_session(&session);
    Ok(())
}

async fn cmd_regenerate(config: &Config, reference: &str, moment: usize, order: u32) -> Result<()> {
    debug!(%reference, moment, order, "cmd_regenerate: called");
    if moment == 0 {
        return Err(eyre::eyre!("Moment numbers start at 1"));
    }
    let (manager, bus) = build_manager(config)?;
    let id = manager.store().resolve(reference).await?;
    let task = manager.start_regeneration(&id, moment - 1, order)?;
    let session = follow(&manager, &bus, &id, task).await?;
    print_session(&session);
    Ok(())
}

fn open_store(config: &Config) -> Result<SessionStore> {
    SessionStore::spawn(&config.storage.sessions_dir).context("Failed to open session store")
}

/// Store for commands that only look; never recovers or rewrites snapshots
fn open_store_read_only(config: &Config) -> Result<SessionStore> {
    SessionStore::open_read_only(&config.storage.sessions_dir).context("Failed to open session store")
}

fn build_manager(config: &Config) -> Result<(SessionManager, Arc<EventBus>)> {
    let store = open_store(config)?;
    let http = HttpServices::from_config(&config.services).context("Failed to create HTTP client")?;
    let services = Services::from_http(Arc::new(http));
    let bus = create_event_bus();
    spawn_event_logger(bus.clone(), config.storage.events_dir());

    let limiter = Arc::new(FixedIntervalGate::new(config.generation.min_interval()));
    let manager = SessionManager::new(store, &services, config, limiter, bus.clone());
    Ok((manager, bus))
}

/// Print events until the task ends; Ctrl-C requests cancellation
async fn follow(manager: &SessionManager, bus: &EventBus, id: &str, task: SessionTask) -> Result<Session> {
    let mut rx = bus.subscribe();
    let task = join(id, task);
    tokio::pin!(task);
    loop {
        tokio::select! {
            result = &mut task => {
                return match result {
                    Ok(session) => Ok(session),
                    Err(e) if e.is_cancelled() => {
                        println!("{}", "Cancelled".yellow());
                        Ok(manager.store().require(id).await?)
                    }
                    Err(e) => Err(e).context(format!("Session {} failed", id)),
                };
            }
            event = rx.recv() => {
                if let Ok(event) = event {
                    print_event(&event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Cancelling after the current unit...".yellow());
                manager.cancel(id);
            }
        }
    }
}

fn print_event(event: &ForgeEvent) {
    match event {
        ForgeEvent::StageChanged { to, .. } => println!("{} {}", "stage".cyan(), colored_stage(*to)),
        ForgeEvent::ProgressUpdated { percent, message, .. } => println!("{:>3}% {}", percent, message),
        ForgeEvent::SequenceFailed {
            moment_index,
            order,
            error,
            ..
        } => println!(
            "{} moment {} sequence {}: {}",
            "failed".red(),
            moment_index + 1,
            order,
            error
        ),
        _ => {}
    }
}

fn colored_stage(stage: SessionStage) -> String {
    let text = stage.to_string();
    match stage {
        SessionStage::Complete => text.green().to_string(),
        SessionStage::Failed => text.red().to_string(),
        SessionStage::Cancelled => text.yellow().to_string(),
        _ => text.cyan().to_string(),
    }
}

fn print_session(session: &Session) {
    println!("{} {}", session.id.bold(), session.title);
    println!(
        "  stage: {}  progress: {}% ({})",
        colored_stage(session.stage),
        session.progress.percent,
        session.progress.message
    );
    if let Some(error) = &session.error {
        println!("  error: {}", error.red());
    }
    println!(
        "  estimated: {} min  spent: ${:.2}",
        session.estimated_minutes,
        session.spent()
    );

    for moment in &session.moments {
        let status = moment.status();
        let status_text = match status {
            MomentStatus::Complete => status.to_string().green(),
            MomentStatus::Partial => status.to_string().yellow(),
            MomentStatus::Failed => status.to_string().red(),
            MomentStatus::Pending => status.to_string().normal(),
        };
        let degraded = if moment.quality_degraded { " (quality degraded)" } else { "" };
        println!(
            "  moment {}: {} [{}]{}",
            moment.index + 1,
            moment.highlight.title,
            status_text,
            degraded
        );

        let Some(plan) = &moment.plan else {
            continue;
        };
        for seq in &plan.sequences {
            let marker = match seq.status {
                SequenceStatus::Complete => "ok".green(),
                SequenceStatus::Failed | SequenceStatus::ExportFailed => "!!".red(),
                _ => "..".normal(),
            };
            print!(
                "    {} {:>2} {:<18} {:>5.1}s ${:.2} {}",
                marker,
                seq.order,
                seq.kind.name(),
                seq.duration_sec,
                seq.cost,
                seq.status
            );
            if let Some(error) = &seq.error {
                print!(" - {}", error);
            }
            println!();
            for warning in &seq.quality_warnings {
                println!("         warning: {}", warning);
            }
        }
    }
}
