use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use jobs::{ClipJobRequest, ClipType, JobEvent, JobKind, JobStatus, JobsRuntime};
use media_io::sim::{SimEngine, SimMedia};
use media_io::{resource_path, PROFILE_PRESETS};
use project::{ProjectDb, ProjectSettings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipjob")]
#[command(about = "Run clip analysis jobs against the simulated engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job and print its events as JSON lines
    Run(RunArgs),
    /// List the profile presets
    Profiles,
}

#[derive(Args)]
struct RunArgs {
    /// Clip resource, a path or a file:// URL
    #[arg(long)]
    resource: String,
    #[arg(long)]
    clip_id: String,
    #[arg(long, default_value = "video")]
    clip_type: ClipType,
    /// Frames in the simulated clip
    #[arg(long, default_value_t = 250)]
    length: i64,
    /// Frame positions the scenecut filter reports
    #[arg(long = "scene-cut")]
    scene_cuts: Vec<i64>,
    /// Job extra as key=value, repeatable
    #[arg(long = "extra", value_parser = parse_key_val)]
    extras: Vec<(String, String)>,
    /// Overrides the configured profile
    #[arg(long)]
    profile: Option<String>,
    /// Overrides the configured render thread count
    #[arg(long)]
    threads: Option<u32>,
    /// Settings file, defaults to the per-user one
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Record the job and its results in this database
    #[arg(long)]
    db: Option<PathBuf>,
    /// Job parameter tokens
    #[arg(last = true)]
    tokens: Vec<String>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Profiles => {
            for p in PROFILE_PRESETS {
                println!(
                    "{:<16} {}x{} {}/{} fps  {}",
                    p.id, p.size.0, p.size.1, p.frame_rate.0, p.frame_rate.1, p.description
                );
            }
            Ok(())
        }
        Commands::Run(args) => {
            let status = run(args)?;
            if status == JobStatus::Crashed {
                bail!("job crashed");
            }
            Ok(())
        }
    }
}

fn load_settings(args: &RunArgs) -> Result<ProjectSettings> {
    let path = args.settings.clone().unwrap_or_else(ProjectSettings::default_path);
    let mut settings = ProjectSettings::load(&path).with_context(|| format!("load settings {}", path.display()))?;
    if let Some(profile) = &args.profile {
        settings.current_profile = profile.clone();
    }
    if let Some(threads) = args.threads {
        settings.render_threads = threads;
    }
    Ok(settings)
}

fn run(args: RunArgs) -> Result<JobStatus> {
    let settings = load_settings(&args)?;
    let db = args.db.as_deref().map(ProjectDb::open_or_create).transpose()?;

    let media = SimMedia::new(args.length).with_scene_cuts(args.scene_cuts.iter().copied());
    let engine = Arc::new(SimEngine::new().with_media(resource_path(&args.resource), media));
    let runtime = JobsRuntime::start(1, engine, settings);
    let handle = runtime.handle();

    let job_id = handle.enqueue(ClipJobRequest {
        clip_id: args.clip_id,
        clip_type: args.clip_type,
        resource: args.resource,
        parameters: args.tokens,
        extras: args.extras.into_iter().collect(),
    });
    info!(job = %job_id, "job queued");

    let status = loop {
        let event = handle.rx_events.recv().context("job runtime stopped")?;
        if let Some(db) = &db {
            if let Err(e) = record(db, &event) {
                warn!(error = %e, "failed to record job event");
            }
        }
        println!("{}", serde_json::to_string(&event)?);
        if let JobEvent::Finished { status, .. } = event {
            break status;
        }
    };
    runtime.shutdown();
    Ok(status)
}

fn record(db: &ProjectDb, event: &JobEvent) -> Result<()> {
    match event {
        JobEvent::Queued { job_id, clip_id } => db.record_job(job_id, clip_id, JobKind::Mlt.as_str())?,
        JobEvent::Status { job_id, status, .. } => db.update_job_status(job_id, status.as_str(), None)?,
        JobEvent::Progress { .. } => {}
        JobEvent::Result { job_id, results, .. } => db.record_job_results(job_id, results)?,
        JobEvent::Finished { job_id, status, error, destination, .. } => {
            let tx = db.begin_tx()?;
            db.update_job_status(job_id, status.as_str(), error.as_deref())?;
            if let Some(dest) = destination {
                db.set_job_destination(job_id, dest)?;
            }
            tx.commit()?;
        }
    }
    Ok(())
}
