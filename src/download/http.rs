//! HTTP plumbing for the download workflow: client construction, the HEAD
//! reachability check and the retrying streaming GET.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use super::error::DownloadError;

pub const HEAD_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT_VALUE: &str = "Mozilla/5.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    Reachable(StatusCode),
    /// 405: the server refuses HEAD; assumed to serve GET.
    MethodNotAllowed,
}

/// Client that verifies certificates against the bundled webpki roots.
pub fn build_client(timeout: Option<Duration>) -> Result<Client, DownloadError> {
    // Built without the gzip feature: ask for identity so the bytes hashed are
    // the bytes served.
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .use_rustls_tls()
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(DownloadError::Client)
}

/// Cheap existence check. Any 4xx/5xx except 405 means "do not bother".
pub fn head_check(client: &Client, url: &str) -> Result<HeadOutcome, DownloadError> {
    let resp = client
        .head(url)
        .timeout(HEAD_TIMEOUT)
        .send()
        .map_err(|err| DownloadError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

    let status = resp.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        debug!("HEAD not allowed by {url}, assuming GET works");
        return Ok(HeadOutcome::MethodNotAllowed);
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(DownloadError::Unreachable {
            url: url.to_string(),
            reason: status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
        });
    }
    Ok(HeadOutcome::Reachable(status))
}

/// GET `url`, retrying connection failures and timeouts `max_retries` times.
/// TLS failures are not retried.
pub fn open_stream(client: &Client, url: &str, max_retries: u32) -> Result<Response, DownloadError> {
    let attempts = max_retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        debug!(attempt, "url for request: {url}");
        let err = match client.get(url).send() {
            Ok(resp) => {
                let status = resp.status();
                if !status.is_success() {
                    return Err(DownloadError::Status {
                        url: url.to_string(),
                        status,
                    });
                }
                return Ok(resp);
            }
            Err(err) => err,
        };

        if is_tls_error(&err) {
            return Err(DownloadError::Tls {
                url: url.to_string(),
                source: err,
            });
        }
        if !(err.is_connect() || err.is_timeout()) {
            return Err(DownloadError::Transport {
                url: url.to_string(),
                source: err,
            });
        }
        if attempt >= attempts {
            return Err(DownloadError::RetriesExhausted {
                url: url.to_string(),
                attempts,
                source: err,
            });
        }
        warn!(attempt, attempts, "request to {url} failed, retrying: {err}");
    }
}

pub fn content_length(resp: &Response) -> Option<u64> {
    let length = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    debug!("got content length of: {length:?}");
    length
}

/// A rustls failure somewhere in the source chain, either directly or
/// wrapped in the `io::Error` the TLS stream reports it through.
fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>()
            && io_err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
        {
            return true;
        }
        source = e.source();
    }
    false
}
