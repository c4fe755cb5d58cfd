use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::Error;
use crate::jobs::Jobs;
use crate::ytdlp::Mode;

pub fn router(jobs: Jobs) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/convert", post(convert))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/jobs/{id}/file", get(job_file))
        .route("/api/jobs/{id}/reset", post(job_reset))
        .with_state(jobs)
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
    pub mode: Mode,
}

#[derive(Debug, Serialize)]
struct ConvertResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::EmptyUrl => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Busy => StatusCode::CONFLICT,
            Error::UnknownJob(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn convert(
    State(jobs): State<Jobs>,
    Form(req): Form<ConvertRequest>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let id = jobs.start(&req.url, req.mode)?;
    Ok(Json(ConvertResponse { id }))
}

async fn job_status(
    State(jobs): State<Jobs>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::jobs::JobView>, ApiError> {
    Ok(Json(jobs.snapshot(id)?))
}

async fn job_file(
    State(jobs): State<Jobs>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (path, name) = jobs.result_file(id)?;

    let file = tokio::fs::File::open(&path).await.map_err(Error::Io)?;
    let stream = ReaderStream::new(file);

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let disposition = format!("attachment; filename=\"{name}\"");

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn job_reset(State(jobs): State<Jobs>, Path(id): Path<Uuid>) -> StatusCode {
    jobs.reset(id);
    StatusCode::NO_CONTENT
}

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>webtube</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 560px; margin: 3rem auto; padding: 0 1rem; }
  h1 { margin-bottom: 0.2rem; }
  input[type=url] { width: 100%; padding: 0.6rem; font-size: 1rem; box-sizing: border-box; }
  button { padding: 0.6rem 1.2rem; font-size: 1rem; margin: 0.6rem 0.4rem 0 0; cursor: pointer; }
  progress { width: 100%; height: 1.2rem; margin-top: 1rem; }
  .error { color: #b00020; margin-top: 1rem; }
  .muted { color: #666; }
  #result, #progress-row, #error { display: none; }
</style>
</head>
<body>
<h1>webtube</h1>
<p class="muted">Paste a video URL, pick a format, get a file.</p>

<div id="form-row">
  <input id="url" type="url" placeholder="https://..." autofocus>
  <button onclick="start('audio')">&#127925; MP3</button>
  <button onclick="start('video')">&#127916; MP4</button>
</div>

<div id="progress-row">
  <progress id="bar" max="1" value="0"></progress>
  <p id="status" class="muted"></p>
</div>

<div id="result">
  <p id="ready-name"></p>
  <button onclick="download()">&#11015; Download</button>
  <button onclick="reset()">&#8635; Convert another</button>
</div>

<p id="error" class="error"></p>

<script>
let jobId = null;
let timer = null;

function show(id, on) { document.getElementById(id).style.display = on ? 'block' : 'none'; }

async function start(mode) {
  const url = document.getElementById('url').value.trim();
  if (!url) { fail('Paste a link first.'); return; }
  show('error', false);

  const body = new URLSearchParams({ url: url, mode: mode });
  const resp = await fetch('/api/convert', { method: 'POST', body: body });
  const data = await resp.json();
  if (!resp.ok) { fail(data.error); return; }

  jobId = data.id;
  show('form-row', false);
  show('progress-row', true);
  timer = setInterval(poll, 500);
}

async function poll() {
  const resp = await fetch('/api/jobs/' + jobId);
  if (!resp.ok) { stopPolling(); fail('Job vanished.'); return; }
  const job = await resp.json();

  document.getElementById('bar').value = job.fraction;
  document.getElementById('status').textContent = job.detail;

  if (job.state === 'ready') {
    stopPolling();
    show('progress-row', false);
    document.getElementById('ready-name').textContent = 'Ready: ' + job.file_name;
    show('result', true);
  } else if (job.state === 'failed') {
    stopPolling();
    show('progress-row', false);
    show('form-row', true);
    fail(job.error);
  }
}

function download() { window.location = '/api/jobs/' + jobId + '/file'; }

async function reset() {
  if (jobId) { await fetch('/api/jobs/' + jobId + '/reset', { method: 'POST' }); }
  jobId = null;
  show('result', false);
  show('form-row', true);
  document.getElementById('url').value = '';
}

function stopPolling() { clearInterval(timer); timer = null; }
function fail(msg) {
  const el = document.getElementById('error');
  el.textContent = msg || 'Something went wrong.';
  show('error', true);
}
</script>
</body>
</html>
"#;
