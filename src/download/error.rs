use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::base_system::path::PathError;
use crate::hash::HashMethod;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("empty url")]
    EmptyUrl,
    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("resource unreachable: {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("TLS verification failed for {url}: {source}")]
    Tls {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gave up on {url} after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("stream interrupted after {received} bytes: {source}")]
    Stream {
        received: u64,
        #[source]
        source: io::Error,
    },
    #[error("{method} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        method: HashMethod,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
