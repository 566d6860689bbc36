use thiserror::Error;

/// Error taxonomy per spec §7. Kinds, not concrete transport/DB types —
/// everything that crosses a component boundary gets mapped into one of
/// these so the job runner can decide whether to retry.
#[derive(Debug, Error)]
pub enum DropwatchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("fatal I/O error: {0}")]
    FatalIo(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("no baseline snapshot for {tld}/{date}")]
    MissingBaseline { tld: String, date: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("run timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl DropwatchError {
    /// Whether the job runner should retry this error per §4.6.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DropwatchError::TransientIo(_))
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            DropwatchError::Config(_) => "config",
            DropwatchError::TransientIo(_) => "transient_io",
            DropwatchError::FatalIo(_) => "fatal_io",
            DropwatchError::Parser(_) => "parser",
            DropwatchError::MissingBaseline { .. } => "missing_baseline",
            DropwatchError::Cancelled => "cancelled",
            DropwatchError::Timeout(_) => "timeout",
            DropwatchError::Db(_) => "db",
        }
    }
}

pub type Result<T> = std::result::Result<T, DropwatchError>;
