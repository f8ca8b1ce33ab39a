use std::time::Duration;

/// Core error type for the label print bot.
///
/// Adapter crates map their specific errors into this type so the handler can
/// turn every failure into one user-facing reply plus a log entry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("{} is not authorized", sender_label(.0))]
    Unauthorized(Option<i64>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("image decode error: {0}")]
    ImageDecode(#[source] image::ImageError),

    #[error("image encode error: {0}")]
    ImageEncode(#[source] image::ImageError),

    #[error("failed to launch print command `{program}`: {source}")]
    PrintLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("print command exited with {}", exit_label(.status))]
    PrintFailed {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("print command timed out after {0:?}")]
    PrintTimeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Text shown to the sender when a print attempt fails.
    ///
    /// For a non-zero exit this is the raw output of the print client
    /// (stderr first), otherwise the error message itself.
    pub fn diagnostic(&self) -> String {
        match self {
            Error::PrintFailed {
                status,
                stdout,
                stderr,
            } => {
                if !stderr.trim().is_empty() {
                    stderr.trim().to_string()
                } else if !stdout.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    format!("print command exited with {}", exit_label(status))
                }
            }
            Error::PrintLaunch { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

fn sender_label(user_id: &Option<i64>) -> String {
    match user_id {
        Some(id) => format!("user {id}"),
        None => "update without a sender".to_string(),
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
