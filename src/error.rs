use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RoundTripError {
    #[error("invalid archive url: {0}")]
    InvalidUrl(String),

    #[error("archive url has no file name: {0}")]
    MissingArchiveName(String),

    #[error("job catalog is empty")]
    EmptyCatalog,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("download request failed: {0}")]
    Http(String),

    #[error("server returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("grid tool failed: {0}")]
    GridTool(String),

    #[error("multiple grids in file \"{path}\" ({count}), refusing to read")]
    TooManyGrids { path: String, count: usize },

    #[error("no grids found in \"{0}\"")]
    EmptyGridFile(String),

    #[error("source file \"{0}\" is empty")]
    EmptySource(String),

    #[error("written file \"{0}\" is empty")]
    EmptyOutput(String),

    #[error("grid fingerprints are identical: {0}")]
    FingerprintCollision(String),

    #[error("download of {archive} panicked: {reason}")]
    FetchPanicked { archive: String, reason: String },

    #[error("fetch worker exited before reporting {0}")]
    WorkerLost(String),

    #[error("no .vdb files found in {0}")]
    NoLocalGrids(String),
}
