//! Buffered download with adaptive read sizes and digest verification.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use reqwest::blocking::Client;
use tracing::{debug, error, info};

use super::error::DownloadError;
use super::http;
use super::models::{DownloadRequest, DownloadState, ProgressSnapshot};
use super::progress::{ProgressCallback, ProgressReporter};
use crate::base_system::path::{ensure_path, remove_if_exists};
use crate::hash::digests_match;

pub struct Downloader {
    request: DownloadRequest,
    client: Client,
    progress: Option<ProgressCallback>,
    show_bar: bool,
}

impl Downloader {
    pub fn new(request: DownloadRequest) -> Result<Self, DownloadError> {
        let client = http::build_client(request.timeout)?;
        Ok(Self::with_client(request, client))
    }

    pub fn with_client(request: DownloadRequest, client: Client) -> Self {
        Self {
            request,
            client,
            progress: None,
            show_bar: true,
        }
    }

    pub fn with_progress<F>(mut self, cb: F) -> Self
    where
        F: FnMut(&ProgressSnapshot) + Send + 'static,
    {
        self.progress = Some(Box::new(cb));
        self
    }

    /// No terminal progress bar; callbacks still fire.
    pub fn quiet(mut self) -> Self {
        self.show_bar = false;
        self
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Fetch the whole body into memory. Nothing touches the disk.
    pub fn download_to_memory(&mut self) -> Result<Vec<u8>, DownloadError> {
        let url = self.request.url.as_str();
        if url.trim().is_empty() {
            return Err(DownloadError::EmptyUrl);
        }

        let mut resp = http::open_stream(&self.client, url, self.request.max_retries)?;
        debug!("resource URL: {url}");

        let content_length = http::content_length(&resp);
        if content_length.is_none() {
            debug!("content-length not in headers; no ETA or percentage");
        }

        let mut state = DownloadState::new(content_length, self.request.block_size);
        let mut reporter =
            ProgressReporter::new(url, content_length, self.show_bar, self.progress.take());

        let mut chunk = Vec::with_capacity(state.block_size());
        loop {
            chunk.clear();
            let started = Instant::now();
            (&mut resp)
                .take(state.block_size() as u64)
                .read_to_end(&mut chunk)
                .map_err(|source| DownloadError::Stream {
                    // bytes of the failed read are left in `chunk`
                    received: state.received() + chunk.len() as u64,
                    source,
                })?;
            let elapsed = started.elapsed();
            if chunk.is_empty() {
                break;
            }
            state.push_chunk(&chunk, elapsed);
            reporter.update(&state);
        }

        reporter.finish(&state);
        debug!(bytes = state.received(), "download complete");
        Ok(state.into_buffer())
    }

    fn verify(&self, data: &[u8]) -> Result<(), DownloadError> {
        let Some(expected) = self.request.expected_digest.as_deref() else {
            debug!("no hash to verify");
            return Ok(());
        };
        let method = self.request.hash_method;
        debug!(%method, "checking file hash against {expected}");
        let actual = method.digest_hex(data);
        if digests_match(&actual, expected) {
            debug!("file hash verified");
            return Ok(());
        }
        Err(DownloadError::DigestMismatch {
            method,
            expected: expected.to_string(),
            actual,
        })
    }

    /// Download, verify and write. On any failure the target file is removed.
    /// Returns the number of bytes written.
    pub fn try_download(&mut self) -> Result<u64, DownloadError> {
        let outfile = ensure_path(&self.request.outfile, false)?;
        let result = self
            .download_to_memory()
            .and_then(|data| self.verify(&data).map(|()| data))
            .and_then(|data| write_file(&outfile, &data));

        if result.is_err() && !remove_if_exists(&outfile) {
            debug!("left {} in place: removal failed", outfile.display());
        }
        result
    }

    /// [`Downloader::try_download`] collapsed to success/failure; the reason
    /// goes to the log.
    pub fn download(mut self) -> bool {
        match self.try_download() {
            Ok(bytes) => {
                info!(bytes, "saved {}", self.request.outfile.display());
                true
            }
            Err(err) => {
                error!("download of {} failed: {err}", self.request.url);
                false
            }
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<u64, DownloadError> {
    debug!("writing to file {}", path.display());
    fs::write(path, data).map_err(|source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(data.len() as u64)
}
