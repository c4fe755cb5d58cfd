use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::convert::{self, Outcome};
use crate::error::{Error, Result};
use crate::progress::ProgressSnapshot;
use crate::scratch::Scratch;
use crate::ytdlp::{Mode, ToolSpec};

enum JobState {
    Running,
    Ready(Outcome),
    Failed(String),
}

struct Job {
    state: JobState,
    progress: watch::Receiver<ProgressSnapshot>,
    cancel: CancellationToken,
}

/// What the polling endpoint sees.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub state: &'static str,
    pub fraction: f32,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Inner {
    tool: ToolSpec,
    scratch: Scratch,
    max_running: usize,
    quiet: bool,
    table: Mutex<HashMap<Uuid, Job>>,
}

/// Registry of conversions, keyed by job id.
///
/// Every conversion runs as a detached task writing into its own scratch
/// subdirectory; the registry holds its state from submission until an
/// explicit reset. `Ready` persists until reset, `Failed` persists until
/// reset so the page can show the message.
#[derive(Clone)]
pub struct Jobs {
    inner: Arc<Inner>,
}

impl Jobs {
    pub fn new(tool: ToolSpec, scratch: Scratch, max_running: usize, quiet: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                tool,
                scratch,
                max_running: max_running.max(1),
                quiet,
                table: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn scratch(&self) -> &Scratch {
        &self.inner.scratch
    }

    /// Begin a conversion. Returns its id immediately; the run itself is a
    /// spawned task observed via `snapshot`.
    pub fn start(&self, url: &str, mode: Mode) -> Result<Uuid> {
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(Error::EmptyUrl);
        }

        let id = Uuid::new_v4();
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::starting());
        let cancel = CancellationToken::new();

        let held: Vec<Uuid> = {
            let mut table = self.inner.table.lock();
            let running = table
                .values()
                .filter(|job| matches!(job.state, JobState::Running))
                .count();
            if running >= self.inner.max_running {
                return Err(Error::Busy);
            }
            table.insert(
                id,
                Job {
                    state: JobState::Running,
                    progress: progress_rx,
                    cancel: cancel.clone(),
                },
            );
            table.keys().copied().collect()
        };

        // Old runs age out before new ones start, not on a timer. Jobs still
        // in the table keep their files whatever their age.
        self.inner.scratch.sweep_except(&held);

        let job_dir = match self.inner.scratch.job_dir(id) {
            Ok(dir) => dir,
            Err(e) => {
                self.inner.table.lock().remove(&id);
                return Err(e);
            }
        };

        let jobs = self.clone();
        tokio::spawn(async move {
            let result = convert::run(
                &jobs.inner.tool,
                &job_dir,
                &url,
                mode,
                &progress_tx,
                cancel,
                jobs.inner.quiet,
            )
            .await;

            let mut table = jobs.inner.table.lock();
            match result {
                Ok(outcome) => {
                    if let Some(job) = table.get_mut(&id) {
                        job.state = JobState::Ready(outcome);
                    } else {
                        // Reset raced the finish; nothing holds the file now.
                        jobs.inner.scratch.remove_job_dir(id);
                    }
                }
                Err(err) => {
                    jobs.inner.scratch.remove_job_dir(id);
                    if let Some(job) = table.get_mut(&id) {
                        job.state = JobState::Failed(err.to_string());
                    }
                }
            }
        });

        Ok(id)
    }

    pub fn snapshot(&self, id: Uuid) -> Result<JobView> {
        let table = self.inner.table.lock();
        let job = table.get(&id).ok_or(Error::UnknownJob(id))?;
        let progress = job.progress.borrow().clone();

        Ok(match &job.state {
            JobState::Running => JobView {
                id,
                state: "running",
                fraction: progress.fraction,
                detail: progress.detail,
                file_name: None,
                error: None,
            },
            JobState::Ready(outcome) => JobView {
                id,
                state: "ready",
                fraction: 1.0,
                detail: "Done".to_string(),
                file_name: Some(outcome.file_name.clone()),
                error: None,
            },
            JobState::Failed(message) => JobView {
                id,
                state: "failed",
                fraction: progress.fraction,
                detail: progress.detail,
                file_name: None,
                error: Some(message.clone()),
            },
        })
    }

    /// Path and name of a ready result, for serving.
    pub fn result_file(&self, id: Uuid) -> Result<(PathBuf, String)> {
        let table = self.inner.table.lock();
        let job = table.get(&id).ok_or(Error::UnknownJob(id))?;
        match &job.state {
            JobState::Ready(outcome) => Ok((outcome.path.clone(), outcome.file_name.clone())),
            _ => Err(Error::UnknownJob(id)),
        }
    }

    /// Discard a job: cancel it if still running, delete whatever it wrote,
    /// forget it. Unknown ids are a no-op.
    pub fn reset(&self, id: Uuid) {
        let removed = self.inner.table.lock().remove(&id);
        if let Some(job) = removed {
            job.cancel.cancel();
        }
        self.inner.scratch.remove_job_dir(id);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn fake_tool(dir: &Path, body: &str) -> ToolSpec {
        let script = dir.join("fake-tool.sh");
        let contents = format!("#!/bin/sh\nout=$(dirname \"$3\")\n{body}\n");
        std::fs::write(&script, contents).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        ToolSpec::Binary(script)
    }

    fn scratch_in(dir: &Path) -> Scratch {
        Scratch::new(dir.join("scratch"), Duration::from_secs(3600)).unwrap()
    }

    async fn wait_until_settled(jobs: &Jobs, id: Uuid) -> JobView {
        for _ in 0..200 {
            let view = jobs.snapshot(id).unwrap();
            if view.state != "running" {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} never settled");
    }

    #[tokio::test]
    async fn test_job_reaches_ready_and_serves_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), r#"printf 'abc123' > "$out/clip.mp4""#);
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 2, true);

        let id = jobs.start("https://example.com/watch?v=x", Mode::Video).unwrap();
        let view = wait_until_settled(&jobs, id).await;

        assert_eq!(view.state, "ready");
        assert_eq!(view.file_name.as_deref(), Some("clip.mp4"));

        let (path, name) = jobs.result_file(id).unwrap();
        assert_eq!(name, "clip.mp4");
        assert_eq!(std::fs::read(path).unwrap(), b"abc123");
    }

    #[tokio::test]
    async fn test_failed_job_reports_error_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo 'ERROR: no such video'\nexit 1");
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 2, true);

        let id = jobs.start("https://example.com/watch?v=x", Mode::Audio).unwrap();
        let view = wait_until_settled(&jobs, id).await;

        assert_eq!(view.state, "failed");
        assert!(!view.error.unwrap().is_empty());
        assert!(jobs.result_file(id).is_err());
        assert!(!jobs.scratch().root().join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_reset_deletes_file_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), r#"printf 'abc' > "$out/clip.mp3""#);
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 2, true);

        let id = jobs.start("https://example.com/watch?v=x", Mode::Audio).unwrap();
        wait_until_settled(&jobs, id).await;

        let (path, _) = jobs.result_file(id).unwrap();
        assert!(path.exists());

        jobs.reset(id);
        assert!(!path.exists());
        assert!(matches!(jobs.snapshot(id), Err(Error::UnknownJob(_))));

        // Reset with nothing held must not fail
        jobs.reset(id);
        jobs.reset(Uuid::new_v4());
    }

    #[tokio::test]
    async fn test_running_cap_rejects_extra_submissions() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "sleep 30");
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 1, true);

        let first = jobs.start("https://example.com/watch?v=x", Mode::Audio).unwrap();
        let second = jobs.start("https://example.com/watch?v=y", Mode::Audio);
        assert!(matches!(second, Err(Error::Busy)));

        // Discarding the running job frees the slot
        jobs.reset(first);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(jobs.start("https://example.com/watch?v=z", Mode::Audio).is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_serializes_for_polling() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), r#"printf 'x' > "$out/clip.mp4""#);
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 2, true);

        let id = jobs.start("https://example.com/watch?v=x", Mode::Video).unwrap();
        let view = wait_until_settled(&jobs, id).await;

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["file_name"], "clip.mp4");
        // Absent fields are omitted, not null
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "exit 0");
        let jobs = Jobs::new(tool, scratch_in(tmp.path()), 2, true);

        assert!(matches!(jobs.start("  ", Mode::Audio), Err(Error::EmptyUrl)));
    }
}
