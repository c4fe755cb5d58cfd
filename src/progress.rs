use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Extract a completion fraction from one line of tool output.
///
/// The tool prints free-text lines, some of which carry a percentage in the
/// form `NN.N%` (one to three integer digits, one fractional digit). Returns
/// the value mapped into [0, 1], or `None` for lines without a marker.
pub fn parse_percent(line: &str) -> Option<f32> {
    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = PERCENT_RE.get_or_init(|| Regex::new(r"(\d{1,3}\.\d)%").unwrap());

    let caps = re.captures(line)?;
    let pct: f32 = caps.get(1)?.as_str().parse().ok()?;
    Some((pct / 100.0).clamp(0.0, 1.0))
}

/// Where a running conversion currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Downloading,
    Finishing,
}

/// The value published on the watch channel while a conversion runs.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub fraction: f32,
    pub detail: String,
}

impl ProgressSnapshot {
    pub fn starting() -> Self {
        Self {
            phase: Phase::Starting,
            fraction: 0.0,
            detail: "Starting...".to_string(),
        }
    }

    pub fn downloading(fraction: f32) -> Self {
        Self {
            phase: Phase::Downloading,
            fraction,
            detail: format!("Downloading: {:.1}%", fraction * 100.0),
        }
    }

    pub fn finishing() -> Self {
        Self {
            phase: Phase::Finishing,
            fraction: 1.0,
            detail: "Processing output...".to_string(),
        }
    }
}
