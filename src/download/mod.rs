//! Download-and-verify workflow.
//!
//! Submodules:
//! - `models`: request, transient state, progress snapshot, block sizing / ETA math
//! - `http`: client construction, HEAD check, retrying streaming GET
//! - `progress`: callback + CLI progress bar
//! - `downloader`: buffered transfer, digest check, write-or-clean-up
//!
//! The public entry points never fail loudly: every error is logged and
//! reported as `false`.

pub mod downloader;
pub mod error;
pub mod http;
pub mod models;
pub mod progress;

use std::path::Path;

use tracing::{debug, error, info};

pub use downloader::Downloader;
pub use error::DownloadError;
pub use http::HeadOutcome;
pub use models::{DownloadRequest, DownloadStatus, ProgressSnapshot};

/// Download `url` to `outfile`, optionally checking an MD5 `expected_digest`.
///
/// Returns `true` only when the file was written (and verified, if a digest
/// was given). On a failed check `outfile` is removed even if it existed
/// before the call.
pub fn download(url: &str, outfile: impl AsRef<Path>, expected_digest: Option<&str>) -> bool {
    download_with(DownloadRequest::new(url, outfile).with_digest(expected_digest))
}

pub fn download_with(request: DownloadRequest) -> bool {
    let url = request.url.clone();
    match try_download_with(request) {
        Ok(_) => true,
        Err(err) => {
            error!("download failed: {url}: {err}");
            false
        }
    }
}

/// HEAD check, then [`Downloader::try_download`]. A failed check leaves the
/// filesystem untouched.
pub fn try_download_with(request: DownloadRequest) -> Result<u64, DownloadError> {
    if request.url.trim().is_empty() {
        return Err(DownloadError::EmptyUrl);
    }
    info!(
        url = %request.url,
        outfile = %request.outfile.display(),
        digest = ?request.expected_digest,
        "downloading"
    );

    let client = http::build_client(request.timeout)?;
    http::head_check(&client, &request.url)?;
    debug!("processing download request");

    Downloader::with_client(request, client).try_download()
}
