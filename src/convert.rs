use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use console::style;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::progress::{parse_percent, ProgressSnapshot};
use crate::scratch::newest_file;
use crate::ytdlp::{build_args, classify_failure, Mode, ToolSpec};

// How much raw tool output to keep for diagnostics on failure.
const TAIL_LINES: usize = 40;

/// A completed conversion: the file the tool left behind.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub path: PathBuf,
    pub file_name: String,
}

/// Run one conversion to completion.
///
/// Spawns the external tool into `job_dir`, follows its combined output line
/// by line, publishes progress fractions on `progress`, and on a clean exit
/// identifies the result as the newest file in the directory. The token
/// kills the child when the run is abandoned.
pub async fn run(
    tool: &ToolSpec,
    job_dir: &Path,
    url: &str,
    mode: Mode,
    progress: &watch::Sender<ProgressSnapshot>,
    cancel: CancellationToken,
    quiet: bool,
) -> Result<Outcome> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::EmptyUrl);
    }

    let template = job_dir.join("%(title)s.%(ext)s");
    let args = build_args(url, &template.to_string_lossy(), mode);

    let mut child = tool
        .command()
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::MissingTool(format!("{}: {}", tool.describe(), e)))?;

    progress.send_replace(ProgressSnapshot::starting());

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stderr not captured")))?;
    let mut merged = futures::stream::select(
        LinesStream::new(BufReader::new(stdout).lines()),
        LinesStream::new(BufReader::new(stderr).lines()),
    );

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);

    loop {
        tokio::select! {
            line = merged.next() => match line {
                Some(Ok(line)) => {
                    if !quiet {
                        println!("{} {}", style("[yt-dlp]").dim(), line);
                    }

                    if tail.len() == TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());

                    if let Some(fraction) = parse_percent(&line) {
                        progress.send_replace(ProgressSnapshot::downloading(fraction));
                    }
                }
                Some(Err(_)) => continue,
                None => break,
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Canceled);
            }
        }
    }

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };
    let status = match waited {
        Some(status) => status?,
        None => {
            let _ = child.kill().await;
            return Err(Error::Canceled);
        }
    };

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        let detail: Vec<&str> = tail.iter().map(String::as_str).collect();
        return Err(classify_failure(code, &detail.join("\n")));
    }

    progress.send_replace(ProgressSnapshot::finishing());

    let path = newest_file(job_dir).ok_or(Error::NoOutput)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or(Error::NoOutput)?;

    Ok(Outcome { path, file_name })
}
