use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No URL given")]
    EmptyUrl,

    #[error("Media tool not found: {0}")]
    MissingTool(String),

    #[error("The source refused automated access: {0}")]
    Blocked(String),

    #[error("Conversion tool exited with code {code}: {detail}")]
    ToolFailed { code: i32, detail: String },

    #[error("Tool reported success but produced no output file")]
    NoOutput,

    #[error("Conversion was canceled")]
    Canceled,

    #[error("Too many conversions already running")]
    Busy,

    #[error("No such job: {0}")]
    UnknownJob(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
