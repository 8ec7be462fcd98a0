// Error types shared by the library modules. The binary wraps these in
// `anyhow` at its boundary; inside the crate every fallible call returns
// `crate::error::Result`.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Environment variable {0} not found. Please set it using `lcli configure`.")]
    MissingCredential(String),

    #[error("{0} not found or you may not have permissions to access it")]
    NotFound(String),

    #[error("Request to the Gemini API failed: {0}")]
    RemoteCall(#[from] reqwest::Error),

    #[error("Gemini API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("The prompt was blocked by the service: {0}")]
    Blocked(String),

    #[error("Unsupported media type for {0}")]
    UnsupportedMediaType(String),

    #[error("Interrupted by user")]
    UserAbort,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected response body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not read input: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),

    #[error("Could not read dotfile: {0}")]
    Dotenv(#[from] dotenvy::Error),
}
