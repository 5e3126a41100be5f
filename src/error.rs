//! Error types for fetching and assembling.

use thiserror::Error;

/// A request that did not yield a usable body.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing {0}")]
    MissingField(String),
}

/// Errors raised while building or writing the archive.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("metadata must be set before the first section is added")]
    MetadataLocked,

    #[error("archive has no sections")]
    Empty,
}
