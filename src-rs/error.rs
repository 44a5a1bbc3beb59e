use thiserror::Error;

/// Message shown to the user for every collaborator failure.
pub const GENERIC_ANALYSIS_ERROR: &str = "Failed to analyze image. Please try again.";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("`{program}` exited with status {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("no response text received from the model")]
    EmptyResponse,

    #[error("model reported an error: {0}")]
    Remote(String),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InferenceError {
    /// Every collaborator failure collapses into the same user-facing text.
    pub fn user_message(&self) -> &'static str {
        GENERIC_ANALYSIS_ERROR
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("failed to read image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
