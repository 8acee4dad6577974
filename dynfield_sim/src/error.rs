use std::path::PathBuf;

use dynfield::ConnectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("architecture wiring failed: {0}")]
    Wiring(#[from] ConnectError),

    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}
