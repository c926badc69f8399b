//! Integration tests for ReelForge
//!
//! These drive a session end to end through the public API with in-process
//! collaborators, and exercise the `rf` binary for the offline commands.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_cmd::Command;
use async_trait::async_trait;
use predicates::prelude::*;
use tempfile::TempDir;

use reelforge::config::Config;
use reelforge::domain::{
    AssetKind, AssetOrigin, AssetRef, Background, CreativeDimension, CreativeQcResult, DimensionVerdict, Highlight,
    Plan, QcResult, Sequence, SequenceKind, SequenceStatus, SessionStage,
};
use reelforge::events::create_event_bus;
use reelforge::runner::{SessionManager, join};
use reelforge::scheduler::Unlimited;
use reelforge::services::{
    AssetGenerator, AssetRequest, CharacterRef, CreativeValidator, ExportOptions, ExportResult, ExportService,
    GeneratedAsset, MomentContext, Planner, PlanningInput, RenderableUnit, SceneContext, SceneContextBuilder,
    ServiceError, Services, TechnicalValidator,
};
use reelforge::state::SessionStore;

// =============================================================================
// In-process collaborators
// =============================================================================

struct StaticScene;

#[async_trait]
impl SceneContextBuilder for StaticScene {
    async fn build(&self, moment: &MomentContext) -> Result<SceneContext, ServiceError> {
        Ok(SceneContext {
            summary: moment.highlight.title.clone(),
            setting: "tavern".to_string(),
            characters: vec![CharacterRef {
                name: "Vex".to_string(),
                description: "half-elf rogue".to_string(),
            }],
        })
    }
}

/// Establishing shot, a dialogue reusing its background, then an impact beat
struct TavernPlanner;

#[async_trait]
impl Planner for TavernPlanner {
    async fn plan(&self, _input: &PlanningInput) -> Result<Plan, ServiceError> {
        Ok(Plan::new(vec![
            Sequence::new(
                1,
                4.0,
                SequenceKind::EstablishingShot {
                    location: "The Broken Tankard".to_string(),
                    description: "smoky tavern at night".to_string(),
                },
            ),
            Sequence::new(
                2,
                6.0,
                SequenceKind::Dialogue {
                    speaker: "Vex".to_string(),
                    line: "Nobody move.".to_string(),
                    expression: "smirking".to_string(),
                    background: Background::new("smoky tavern at night").reusing(1),
                },
            ),
            Sequence::new(
                3,
                2.0,
                SequenceKind::Impact {
                    text: "NATURAL 20".to_string(),
                },
            ),
        ]))
    }
}

struct Approving;

#[async_trait]
impl TechnicalValidator for Approving {
    async fn validate(&self, _plan: &Plan) -> Result<QcResult, ServiceError> {
        Ok(QcResult::approved())
    }
}

#[async_trait]
impl CreativeValidator for Approving {
    async fn review(
        &self,
        _plan: &Plan,
        _scene: &SceneContext,
        _characters: &[CharacterRef],
    ) -> Result<CreativeQcResult, ServiceError> {
        Ok(CreativeQcResult::from_dimensions(
            CreativeDimension::ALL
                .into_iter()
                .map(|d| {
                    (
                        d,
                        DimensionVerdict {
                            pass: true,
                            feedback: String::new(),
                        },
                    )
                })
                .collect(),
        ))
    }
}

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl AssetGenerator for CountingGenerator {
    async fn generate(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedAsset {
            bytes: request.descriptor.as_bytes().to_vec(),
            mime_type: "image/png".to_string(),
            cost: 0.02,
            width: None,
            height: None,
        })
    }
}

/// Writes one marker file per sequence into the moment's working directory
struct FileExporter;

#[async_trait]
impl ExportService for FileExporter {
    async fn export(
        &self,
        unit: &RenderableUnit,
        work_dir: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, ServiceError> {
        let path = work_dir.join(format!("seq-{:02}.{}", unit.sequence.order, options.format));
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| ServiceError::Permanent(e.to_string()))?;
        tokio::fs::write(&path, unit.sequence.kind.name())
            .await
            .map_err(|e| ServiceError::Permanent(e.to_string()))?;
        Ok(ExportResult { files: vec![path] })
    }
}

struct Harness {
    _dir: TempDir,
    sessions_dir: std::path::PathBuf,
    output_dir: std::path::PathBuf,
    generator: Arc<CountingGenerator>,
    manager: SessionManager,
}

fn harness() -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let sessions_dir = dir.path().join("sessions");
    let output_dir = dir.path().join("output");

    let mut config = Config::default();
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.generation.min_interval_ms = 0;

    let generator = Arc::new(CountingGenerator::default());
    let services = Services {
        scene: Arc::new(StaticScene),
        planner: Arc::new(TavernPlanner),
        technical: Arc::new(Approving),
        creative: Arc::new(Approving),
        generator: generator.clone(),
        vision: None,
        exporter: Arc::new(FileExporter),
    };

    let store = SessionStore::spawn(&sessions_dir).expect("Failed to open store");
    let manager = SessionManager::new(store, &services, &config, Arc::new(Unlimited), create_event_bus());
    Harness {
        _dir: dir,
        sessions_dir,
        output_dir,
        generator,
        manager,
    }
}

fn highlight(id: &str, title: &str) -> Highlight {
    Highlight {
        id: id.to_string(),
        start_sec: 10.0,
        end_sec: 22.0,
        title: title.to_string(),
        transcript: "Vex: Nobody move.".to_string(),
    }
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_session_runs_to_complete_and_survives_reload() {
    let h = harness();
    let session = h
        .manager
        .create_session("Heist night", vec![highlight("h1", "The heist")], &h.output_dir)
        .await
        .expect("Failed to create session");
    assert_eq!(session.stage, SessionStage::Uploaded);

    let task = h.manager.start_run(&session.id).expect("Failed to start run");
    let done = join(&session.id, task).await.expect("Run failed");

    assert_eq!(done.stage, SessionStage::Complete);
    assert_eq!(done.progress.percent, 100);
    assert!(done.estimated_minutes >= 1);

    let plan = done.moments[0].plan.as_ref().expect("moment has a plan");
    assert!(plan.sequences.iter().all(|s| s.status == SequenceStatus::Complete));

    // Establishing background plus one portrait; the dialogue reuses the background
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);
    let first_bg = plan.sequences[0].assets.background.as_ref().expect("background");
    let reused_bg = plan.sequences[1].assets.background.as_ref().expect("reused background");
    assert_eq!(first_bg.path, reused_bg.path);
    assert!(plan.sequences[1].assets.portrait.is_some());
    assert!(plan.sequences[2].assets.generated().is_empty());

    for seq in &plan.sequences {
        assert_eq!(seq.assets.exported.len(), 1);
        assert!(seq.assets.exported[0].exists());
    }
    assert!((done.spent() - 0.04).abs() < 1e-9);

    // A second store over the same directory sees the same snapshot
    let reopened = SessionStore::spawn(&h.sessions_dir).expect("Failed to reopen store");
    let loaded = reopened.require(&session.id).await.expect("session persisted");
    assert_eq!(loaded.stage, SessionStage::Complete);
    assert_eq!(loaded.moments[0].plan, done.moments[0].plan);
}

#[tokio::test]
async fn test_regenerate_one_sequence_after_complete() {
    let h = harness();
    let session = h
        .manager
        .create_session("Heist night", vec![highlight("h1", "The heist")], &h.output_dir)
        .await
        .expect("Failed to create session");
    let task = h.manager.start_run(&session.id).expect("Failed to start run");
    join(&session.id, task).await.expect("Run failed");
    let before = h.generator.calls.load(Ordering::SeqCst);

    let task = h
        .manager
        .start_regeneration(&session.id, 0, 2)
        .expect("Failed to start regeneration");
    let done = join(&session.id, task).await.expect("Regeneration failed");

    assert_eq!(done.stage, SessionStage::Complete);
    // Background still comes from sequence 1; only the portrait is generated again
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), before + 1);

    let seq = &done.moments[0].plan.as_ref().expect("plan").sequences[1];
    assert_eq!(seq.status, SequenceStatus::Complete);
    let portrait: &AssetRef = seq.assets.portrait.as_ref().expect("portrait");
    assert_eq!(portrait.kind, AssetKind::Portrait);
    assert_eq!(portrait.origin, AssetOrigin::Fresh);
}

#[tokio::test]
async fn test_every_moment_gets_a_plan() {
    let h = harness();
    let session = h
        .manager
        .create_session(
            "Two moments",
            vec![highlight("h1", "The heist"), highlight("h2", "The getaway")],
            &h.output_dir,
        )
        .await
        .expect("Failed to create session");

    let task = h.manager.start_analysis(&session.id).expect("Failed to start analysis");
    let planned = join(&session.id, task).await.expect("Analysis failed");

    assert_eq!(planned.stage, SessionStage::PlanReady);
    assert_eq!(planned.progress.percent, 50);
    assert!(planned.moments.iter().all(|m| m.plan.is_some() && !m.quality_degraded));
    assert_ne!(planned.moments[0].work_dir, planned.moments[1].work_dir);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// CLI
// =============================================================================

fn rf(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rf").expect("rf binary");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_estimate_prints_totals() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let plan = serde_json::json!({
        "sequences": [
            {"order": 1, "durationSec": 4.0, "type": "establishing_shot",
             "location": "The Broken Tankard", "description": "smoky tavern"},
            {"order": 2, "durationSec": 2.0, "type": "impact", "text": "NATURAL 20"}
        ]
    });
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, plan.to_string()).expect("write plan");

    rf(dir.path())
        .arg("estimate")
        .arg(&plan_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Sequences:  2"))
        .stdout(predicate::str::contains("Duration:   6.0s"))
        .stdout(predicate::str::contains("Cost:"));
}

#[test]
fn test_cli_estimate_rejects_bad_plan() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let plan_path = dir.path().join("plan.json");
    std::fs::write(&plan_path, "not json").expect("write plan");

    rf(dir.path())
        .arg("estimate")
        .arg(&plan_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse plan"));
}

#[test]
fn test_cli_session_create_then_list() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = dir.path().join("rf.yml");
    std::fs::write(
        &config_path,
        format!(
            "storage:\n  sessions-dir: {}\n  output-dir: {}\n",
            dir.path().join("sessions").display(),
            dir.path().join("output").display()
        ),
    )
    .expect("write config");

    let moments = serde_json::json!({
        "title": "Heist night",
        "highlights": [
            {"id": "h1", "startSec": 10.0, "endSec": 22.0, "title": "The heist"}
        ]
    });
    let moments_path = dir.path().join("moments.json");
    std::fs::write(&moments_path, moments.to_string()).expect("write moments");

    rf(dir.path())
        .arg("-c")
        .arg(&config_path)
        .args(["session", "create"])
        .arg(&moments_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    rf(dir.path())
        .arg("-c")
        .arg(&config_path)
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Heist night"))
        .stdout(predicate::str::contains("uploaded"));
}
