use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Faults talking to the WebDriver endpoint.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("webdriver request failed: {0}")]
    Transport(String),

    #[error("webdriver HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("webdriver error {kind}: {message}")]
    Protocol { kind: String, message: String },

    #[error("webdriver response unreadable: {0}")]
    Decode(String),

    #[error("webdriver unavailable: {0}")]
    Unavailable(String),
}

impl BrowserError {
    /// Errors that mean "the element is not there (any more)".
    pub fn is_missing_element(&self) -> bool {
        matches!(
            self,
            BrowserError::Protocol { kind, .. }
                if kind == "no such element" || kind == "stale element reference"
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read row-store {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    #[error("failed to write row-store {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },

    #[error("failed to commit row-store {path}: {source}")]
    Commit { path: PathBuf, source: io::Error },
}

/// Failures of the analysis collaborator. Callers turn these into the
/// stored error text instead of propagating them.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Transport(String),

    #[error("analysis HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analysis response malformed: {0}")]
    Malformed(String),
}

/// Failure of a single record operation.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not load {url}")]
    Navigation { url: String },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
