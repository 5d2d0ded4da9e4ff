use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::thread;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod album;
mod artifact;
mod config;
mod error;
mod inventory;
mod mutations;
mod notify;
mod pipeline;
mod reconcile;
mod status;
mod store;

use config::{BucketBackend, Cli, Command, Settings};
use notify::{Notifier, WebhookNotifier};
use pipeline::{transcoder_for, trigger_path, Pipeline, Snapshot};
use status::{LogStatusSink, Phase, SqliteStatusSink, Status, StatusEntry, StatusReporter, StatusSink};
use store::Bucket;

fn main() -> Result<()> {
    // A missing .env is normal
    let env_file = dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Some(path) = env_file {
        debug!(path = %path.display(), "loaded environment file");
    }

    let settings = match cli.settings.validate() {
        Ok(settings) => settings,
        Err(e) => {
            let sink = status_sink(cli.settings.status_db.as_deref());
            StatusReporter::new(sink.as_ref()).post(
                StatusEntry::new(Phase::Run, Status::Error, e.to_string()).with_progress(100.0),
            );
            return Err(e).context("invalid configuration");
        }
    };

    let sink = status_sink(settings.status_db.as_deref());
    let bucket = Bucket::open(&settings.bucket).with_context(|| match &settings.bucket {
        BucketBackend::S3(s3) => format!("cannot open bucket '{}'", s3.bucket),
        BucketBackend::Fs { root } => format!("cannot open bucket at {}", root.display()),
    })?;
    let webhook = settings
        .webhook_url
        .as_deref()
        .map(WebhookNotifier::new)
        .transpose()
        .context("cannot set up the completion webhook")?;
    let notifier = webhook.as_ref().map(|w| w as &dyn Notifier);
    let pipeline = Pipeline::new(&settings, &bucket, sink.as_ref(), notifier);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_once(&pipeline, &settings),
        Command::Drain => {
            let outcome = pipeline.drain()?;
            info!(deletions = ?outcome.deletions, moves = ?outcome.moves, "mutation logs drained");
            Ok(())
        }
        Command::Plan => {
            let snapshot = pipeline.snapshot(false)?;
            print_plan(&snapshot);
            Ok(())
        }
        Command::Watch => watch(&pipeline, &settings),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "gallery_sync=debug"
    } else {
        "gallery_sync=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

/// Dashboard database when configured and usable, the log otherwise
fn status_sink(db_path: Option<&Path>) -> Box<dyn StatusSink> {
    match db_path {
        Some(path) => match SqliteStatusSink::open(path) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "status database unavailable, logging status instead");
                Box::new(LogStatusSink)
            }
        },
        None => Box::new(LogStatusSink),
    }
}

fn run_once(pipeline: &Pipeline<'_>, settings: &Settings) -> Result<()> {
    let transcoder = transcoder_for(settings);
    let outcome = pipeline.run(&transcoder)?;
    if !outcome.report.is_clean() {
        for failure in &outcome.report.failures {
            warn!(key = %failure.key, operation = %failure.operation, reason = %failure.reason, "object not synced");
        }
    }
    Ok(())
}

/// Poll the watch directory until the trigger file shows up, run one pass,
/// remove the trigger and return
fn watch(pipeline: &Pipeline<'_>, settings: &Settings) -> Result<()> {
    let trigger = trigger_path(&settings.watch_dir);
    info!(
        trigger = %trigger.display(),
        interval = %humantime::format_duration(settings.poll_interval),
        "waiting for trigger"
    );
    while !trigger.exists() {
        thread::sleep(settings.poll_interval);
    }

    info!("trigger found, starting pass");
    let result = run_once(pipeline, settings);
    if let Err(e) = fs::remove_file(&trigger) {
        warn!(path = %trigger.display(), error = %e, "could not remove trigger file");
    }
    result
}

fn print_plan(snapshot: &Snapshot) {
    let plan = &snapshot.plan;
    for key in &plan.upload {
        println!("upload  {}", key);
    }
    for key in &plan.delete {
        println!("delete  {}", key);
    }
    println!(
        "{} local, {} published, {} to upload, {} to delete, {} unchanged",
        snapshot.local.len(),
        snapshot.remote.tracked.len() + snapshot.remote.stale_thumbnails.len(),
        plan.upload.len(),
        plan.delete.len(),
        plan.skip.len()
    );
}
