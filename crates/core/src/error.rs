/// Error taxonomy for the import pipeline.
///
/// Stage errors (`Connection`, `Transfer`, `Extraction`, `Import`,
/// `Checkpoint`) are caught by the orchestrator and surface through
/// `ImportStatus.error`. `AlreadyRunning` and `ServiceDisabled` are returned
/// synchronously to callers and never mark a run as failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Import error for target '{target}': {message}")]
    Import { target: String, message: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("An import is already running")]
    AlreadyRunning,

    #[error("Import service is disabled")]
    ServiceDisabled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the orchestrator may retry the stage that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transfer(_) | Self::Extraction(_)
        )
    }

    /// Pipeline step this error belongs to, for log entries.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config",
            Self::Connection(_) | Self::Transfer(_) => "download",
            Self::Extraction(_) => "extract",
            Self::Import { .. } => "import",
            Self::Checkpoint(_) => "checkpoint",
            Self::AlreadyRunning | Self::ServiceDisabled | Self::Internal(_) => "orchestrator",
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
