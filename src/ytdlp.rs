use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

// Fixed browser identity; the tool gets blocked far more often with its
// default user-agent string.
const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Output selection for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Extract the audio track and transcode to mp3.
    Audio,
    /// Keep the video in an mp4 container.
    Video,
}

impl Mode {
    fn flags(&self) -> &'static [&'static str] {
        match self {
            Mode::Audio => &["-x", "--audio-format", "mp3"],
            Mode::Video => &["-f", "mp4"],
        }
    }
}

/// How to invoke the external retrieval tool on this host.
#[derive(Debug, Clone)]
pub enum ToolSpec {
    /// A concrete executable, either user-supplied or found on PATH.
    Binary(PathBuf),
    /// Fallback: run the tool as a Python module.
    PythonModule,
}

impl ToolSpec {
    /// Locate a working tool invocation, probing candidates with `--version`.
    ///
    /// Order: explicit override, the platform binary name on PATH, then
    /// `python3 -m yt_dlp`. All candidates failing is fatal.
    pub async fn locate(override_path: Option<&PathBuf>) -> Result<ToolSpec> {
        if let Some(path) = override_path {
            let spec = ToolSpec::Binary(path.clone());
            if spec.probe().await {
                return Ok(spec);
            }
            return Err(Error::MissingTool(path.display().to_string()));
        }

        let bin_name = if cfg!(target_os = "windows") {
            "yt-dlp.exe"
        } else {
            "yt-dlp"
        };
        let spec = ToolSpec::Binary(PathBuf::from(bin_name));
        if spec.probe().await {
            return Ok(spec);
        }

        let spec = ToolSpec::PythonModule;
        if spec.probe().await {
            return Ok(spec);
        }

        Err(Error::MissingTool(bin_name.to_string()))
    }

    /// A command ready to receive conversion arguments.
    pub fn command(&self) -> Command {
        match self {
            ToolSpec::Binary(path) => Command::new(path),
            ToolSpec::PythonModule => {
                let mut cmd = Command::new("python3");
                cmd.args(["-m", "yt_dlp"]);
                cmd
            }
        }
    }

    /// Human-readable form for startup output.
    pub fn describe(&self) -> String {
        match self {
            ToolSpec::Binary(path) => path.display().to_string(),
            ToolSpec::PythonModule => "python3 -m yt_dlp".to_string(),
        }
    }

    async fn probe(&self) -> bool {
        self.command()
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Build the argument list for one conversion.
///
/// `output_template` carries the tool's own title/extension placeholders;
/// the tool resolves them, we never learn the final name until the scan.
pub fn build_args(url: &str, output_template: &str, mode: Mode) -> Vec<String> {
    let mut args: Vec<String> = vec![
        url.to_string(),
        "-o".to_string(),
        output_template.to_string(),
        "--newline".to_string(),
        "--no-check-certificate".to_string(),
        "--restrict-filenames".to_string(),
        "--force-overwrites".to_string(),
        "--no-playlist".to_string(),
        "--geo-bypass".to_string(),
        "--user-agent".to_string(),
        CHROME_UA.to_string(),
    ];

    args.extend(mode.flags().iter().map(|s| s.to_string()));
    args
}

/// Classify a nonzero exit using the captured output tail.
///
/// The one failure class worth distinguishing for the user is the source
/// refusing automated access; everything else is a generic tool failure.
pub fn classify_failure(code: i32, tail: &str) -> Error {
    const BLOCKED_SIGNATURES: &[&str] = &[
        "HTTP Error 429",
        "Sign in to confirm",
        "confirm you're not a bot",
        "confirm that you are not a robot",
    ];

    for sig in BLOCKED_SIGNATURES {
        if tail.contains(sig) {
            return Error::Blocked(sig.to_string());
        }
    }

    Error::ToolFailed {
        code,
        detail: tail.to_string(),
    }
}
