use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Failures of the SSO login sequence. Each one leaves the authenticator
/// back in the unauthenticated state.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login page did not contain an execution key")]
    MissingExecutionKey,

    #[error("invalid credentials: no service ticket in login response")]
    InvalidCredentials,

    #[error("expected a redirect when redeeming the service ticket, got HTTP {0}")]
    UnexpectedRedirect(StatusCode),

    #[error("session not established, login ended at {0}")]
    SessionNotEstablished(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("Unexpected response format: {0}")]
    UpstreamFormat(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExportError {
    pub fn filesystem(path: &Path, source: std::io::Error) -> Self {
        ExportError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        ExportError::UpstreamFormat(msg.into())
    }

    /// Transport-level failures are the only ones worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::Network(_))
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::UpstreamFormat(err.to_string())
    }
}

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTime {
    pub local: String,
    pub gmt: String,
}

/// One recorded exercise session. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub start_time: StartTime,
    #[serde(rename = "type")]
    pub activity_type: String,
    /// Meters. Some activities (e.g. strength sessions) report none.
    pub distance: Option<f64>,
}

/// The two file formats kept for every activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Gpx,
    Tcx,
}

impl ExportFormat {
    /// Download order. If an earlier format fails the later one is not tried.
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Gpx, ExportFormat::Tcx];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::Tcx => "tcx",
        }
    }

    /// Path relative to the output root, e.g. `gpx/activity_42.gpx`.
    pub fn relative_path(&self, activity_id: u64) -> String {
        let ext = self.as_str();
        format!("{ext}/activity_{activity_id}.{ext}")
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
