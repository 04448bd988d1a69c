//! Text sharing through glot.io snippets.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

pub const SNIPPETS_URL: &str = "https://snippets.glot.io/snippets";
pub const DEFAULT_LANGUAGE: &str = "lua";

const SNIPPETS_HOST: &str = "https://snippets.glot.io";
const PUBLIC_HOST: &str = "https://glot.io";

#[derive(Debug, Error)]
pub enum PasteError {
    #[error("init http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to post content: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to post content; reason: {reason} ({status})")]
    Rejected { status: StatusCode, reason: String },
    #[error("unexpected response: {0}")]
    Response(#[source] reqwest::Error),
}

/// One file of a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasteContent {
    #[serde(rename = "name")]
    pub filename: String,
    pub content: String,
}

impl PasteContent {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct NewSnippet<'a> {
    language: &'a str,
    title: &'a str,
    public: bool,
    files: &'a [PasteContent],
}

#[derive(Debug, Deserialize)]
struct SnippetCreated {
    url: String,
}

pub struct PasteClient {
    client: Client,
    endpoint: String,
}

impl PasteClient {
    pub fn new() -> Result<Self, PasteError> {
        Self::with_endpoint(SNIPPETS_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, PasteError> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(PasteError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Create a snippet and return its public URL.
    pub fn create_new_paste(
        &self,
        title: &str,
        files: &[PasteContent],
        public: bool,
        language: Option<&str>,
    ) -> Result<String, PasteError> {
        let payload = NewSnippet {
            language: language.unwrap_or(DEFAULT_LANGUAGE),
            title,
            public,
            files,
        };
        debug!(title, files = files.len(), public, "posting snippet");

        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, concat!("elib/", env!("CARGO_PKG_VERSION")))
            .json(&payload)
            .send()
            .map_err(PasteError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown").to_string();
            error!("failed to post content; reason: {reason}");
            return Err(PasteError::Rejected { status, reason });
        }

        let created: SnippetCreated = resp.json().map_err(PasteError::Response)?;
        Ok(public_url(&created.url))
    }
}

fn public_url(url: &str) -> String {
    url.replace(SNIPPETS_HOST, PUBLIC_HOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_url_points_at_public_host() {
        assert_eq!(
            public_url("https://snippets.glot.io/snippets/abc123"),
            "https://glot.io/snippets/abc123"
        );
        assert_eq!(public_url("https://glot.io/x"), "https://glot.io/x");
    }

    #[test]
    fn payload_shape() {
        let files = [PasteContent::new("main.lua", "print(1)")];
        let payload = NewSnippet {
            language: DEFAULT_LANGUAGE,
            title: "t",
            public: false,
            files: &files,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "language": "lua",
                "title": "t",
                "public": false,
                "files": [{"name": "main.lua", "content": "print(1)"}]
            })
        );
    }
}
