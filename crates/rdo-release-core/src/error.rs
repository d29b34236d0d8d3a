use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("status store unavailable at {path}: {reason}")]
    StoreUnavailable { path: String, reason: String },

    #[error("status store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("gerrit query failed: {0}")]
    Gerrit(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("'{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("'{0}' not found on PATH")]
    ToolNotFound(String),

    #[error("invalid version label '{0}'")]
    InvalidEvr(String),

    #[error("invalid package status '{0}'")]
    InvalidStatus(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("another run holds the lock {path} (pid {pid})")]
    AlreadyRunning { path: String, pid: u32 },

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReleaseError {
    /// Errors that must abort the whole run rather than one package.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::Store(_) | Self::AlreadyRunning { .. }
        )
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReleaseError>;
