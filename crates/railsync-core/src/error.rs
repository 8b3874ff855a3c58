use thiserror::Error;

pub type Result<T> = std::result::Result<T, RailError>;

#[derive(Debug, Error)]
pub enum RailError {
    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid report {path}: {reason}")]
    InvalidReport { path: String, reason: String },

    #[error("backend rejected {command}: status {status}: {body}")]
    Backend {
        command: String,
        status: u16,
        body: String,
    },

    #[error("missing context: {0}")]
    MissingContext(String),

    #[error("artifact fetch failed: {0}")]
    ArtifactFetch(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl RailError {
    pub fn invalid_report(path: impl AsRef<std::path::Path>, reason: impl Into<String>) -> Self {
        Self::InvalidReport {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }
}
