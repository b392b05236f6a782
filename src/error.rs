// Error type shared by the session, API and adapter layers. The binary
// and the menu loop wrap these in `anyhow` like the rest of the CLI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("session could not be initialized: {0}")]
    Init(String),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("login did not complete: {0}")]
    LoginIncomplete(String),

    #[error("token request failed: {0}")]
    Token(String),

    #[error("listing failed: {0}")]
    List(String),

    #[error("upload rejected: {status} - {body}")]
    UploadRejected { status: u16, body: String },

    #[error("failed to fetch file metadata: {0}")]
    MetadataFetch(String),

    #[error("failed to download file: {0}")]
    ContentFetch(String),

    #[error("failed to save {name}: {source}")]
    Save {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DriveError>;
