mod banner;
mod convert;
mod error;
mod jobs;
mod progress;
mod scratch;
mod web;
mod ytdlp;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobs::Jobs;
use scratch::Scratch;
use ytdlp::{Mode, ToolSpec};

#[derive(Parser, Debug, Clone)]
#[command(name = "webtube")]
#[command(version = "0.1.0")]
#[command(about = "A web front end for yt-dlp conversions", long_about = None)]
struct Args {
    /// Convert this URL directly and exit (no server)
    url: Option<String>,

    /// With a direct URL: extract audio as mp3 instead of mp4 video
    #[arg(short, long)]
    audio: bool,

    /// Address to serve the web UI on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Scratch directory for in-progress and completed files
    /// (default: ~/.webtube_tmp)
    #[arg(short, long)]
    scratch_dir: Option<PathBuf>,

    /// Path to the yt-dlp executable (default: probe PATH, then python3 -m)
    #[arg(long)]
    ytdlp: Option<PathBuf>,

    /// Number of conversions allowed to run at once
    #[arg(short, long, default_value = "2")]
    jobs: usize,

    /// Hours to keep leftover scratch files before sweeping them
    #[arg(short, long, default_value = "24")]
    retention_hours: u64,

    /// Be quiet (no banner, no tool output)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    if !args.quiet {
        banner::print_banner();
    }

    let tool = ToolSpec::locate(args.ytdlp.as_ref()).await?;

    let root = args
        .scratch_dir
        .clone()
        .unwrap_or_else(Scratch::default_root);
    let retention = Duration::from_secs(args.retention_hours.max(1) * 3600);
    let scratch = Scratch::new(root, retention)
        .context("failed to create scratch directory")?;

    let swept = scratch.sweep();
    if swept > 0 && !args.quiet {
        println!(
            "{} Swept {} stale scratch entries",
            style("[webtube]").cyan().bold(),
            style(swept).yellow()
        );
    }

    if let Some(url) = &args.url {
        let mode = if args.audio { Mode::Audio } else { Mode::Video };
        return run_once(&tool, &scratch, url, mode, args.quiet).await;
    }

    if !args.quiet {
        println!(
            "{} Using tool: {}",
            style("[webtube]").cyan().bold(),
            style(tool.describe()).yellow()
        );
        println!(
            "{} Listening on {}",
            style("[webtube]").cyan().bold(),
            style(format!("http://{}", args.bind)).green()
        );
    }

    let jobs = Jobs::new(tool, scratch, args.jobs.clamp(1, 10), args.quiet);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    axum::serve(listener, web::router(jobs)).await?;

    Ok(())
}

/// Convert a single URL from the command line, file lands in the current
/// directory.
async fn run_once(
    tool: &ToolSpec,
    scratch: &Scratch,
    url: &str,
    mode: Mode,
    quiet: bool,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4();
    let job_dir = scratch.job_dir(id)?;

    let (tx, mut rx) = tokio::sync::watch::channel(progress::ProgressSnapshot::starting());

    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(1000);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap()
                .progress_chars("█▓░"),
        );
        pb
    };

    let feeder_bar = bar.clone();
    let feeder = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow().clone();
            feeder_bar.set_position((snapshot.fraction * 1000.0) as u64);
            feeder_bar.set_message(snapshot.detail);
        }
    });

    let result = convert::run(tool, &job_dir, url, mode, &tx, CancellationToken::new(), true).await;
    drop(tx);
    let _ = feeder.await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            bar.abandon();
            scratch.remove_job_dir(id);
            return Err(e.into());
        }
    };

    bar.finish_with_message("Download complete");

    // The tool wrote into the scratch job dir; hand the file to the caller's
    // working directory. Copy, not rename: scratch may be on another volume.
    let dest = PathBuf::from(&outcome.file_name);
    std::fs::copy(&outcome.path, &dest)
        .with_context(|| format!("cannot place {}", dest.display()))?;
    scratch.remove_job_dir(id);

    if !quiet {
        println!(
            "{} Saved: {}",
            style("[webtube]").cyan().bold(),
            style(dest.display()).yellow()
        );
    }

    Ok(())
}
