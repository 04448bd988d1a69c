//! Text to MP3 through the Google Translate speech endpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{REFERER, USER_AGENT};
use thiserror::Error;
use tracing::{debug, error};

use crate::base_system::path::{PathError, ensure_path};

pub const TTS_URL: &str = "https://translate.google.com/translate_tts";
pub const DEFAULT_LANG: &str = "en";
/// The endpoint rejects longer inputs.
pub const MAX_CHUNK_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("nothing to say")]
    EmptyText,
    #[error("\"{0}\" already exists")]
    FileExists(PathBuf),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("init http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("speech request failed for chunk {index}: {source}")]
    Request {
        index: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct TtsClient {
    client: Client,
    endpoint: String,
    lang: String,
}

impl TtsClient {
    pub fn new() -> Result<Self, TtsError> {
        Self::with_endpoint(TTS_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, TtsError> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(TtsError::Client)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            lang: DEFAULT_LANG.to_string(),
        })
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Encode `text` to an MP3 at `file_path` and return its absolute path.
    pub fn text_to_speech(
        &self,
        text: &str,
        file_path: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<PathBuf, TtsError> {
        debug!("{text}\n->{}", file_path.as_ref().display());
        let file_path = ensure_path(file_path, false)?;
        if file_path.exists() && !overwrite {
            error!("\"{}\" already exists", file_path.display());
            return Err(TtsError::FileExists(file_path));
        }

        let chunks = split_text(text);
        if chunks.is_empty() {
            return Err(TtsError::EmptyText);
        }

        debug!(chunks = chunks.len(), "encoding text");
        let mut audio = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            audio.extend_from_slice(&self.fetch_chunk(chunk, index, chunks.len())?);
        }

        debug!("saving MP3 file");
        fs::write(&file_path, &audio).map_err(|source| TtsError::Write {
            path: file_path.clone(),
            source,
        })?;
        Ok(file_path)
    }

    fn fetch_chunk(&self, chunk: &str, index: usize, total: usize) -> Result<Vec<u8>, TtsError> {
        let request_err = |source| TtsError::Request { index, source };
        let total = total.to_string();
        let idx = index.to_string();
        let textlen = chunk.chars().count().to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .header(USER_AGENT, "Mozilla/5.0")
            .header(REFERER, "http://translate.google.com/")
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", self.lang.as_str()),
                ("client", "tw-ob"),
                ("total", total.as_str()),
                ("idx", idx.as_str()),
                ("textlen", textlen.as_str()),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(request_err)?;
        let bytes = resp.bytes().map_err(request_err)?;
        Ok(bytes.to_vec())
    }
}

/// Word-boundary chunks of at most [`MAX_CHUNK_CHARS`] characters; blank
/// input gives no chunks.
pub fn split_text(text: &str) -> Vec<String> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return Vec::new();
    }
    let options = textwrap::Options::new(MAX_CHUNK_CHARS).break_words(true);
    textwrap::wrap(&cleaned, options)
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("  hello\n world "), vec!["hello world".to_string()]);
        assert!(split_text(" \n\t").is_empty());
    }

    #[test]
    fn long_text_splits_on_words() {
        let text = "word ".repeat(60);
        let chunks = split_text(&text);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_CHUNK_CHARS);
            assert!(chunk.split(' ').all(|w| w == "word"));
        }
        assert_eq!(chunks.join(" "), text.trim_end());
    }

    #[test]
    fn overlong_word_is_broken() {
        let text = "x".repeat(250);
        let chunks = split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("speech.mp3");
        fs::write(&out, b"old").unwrap();
        let client = TtsClient::with_endpoint("http://127.0.0.1:9/unused").unwrap();
        assert!(matches!(
            client.text_to_speech("hi", &out, false),
            Err(TtsError::FileExists(_))
        ));
        assert!(matches!(
            client.text_to_speech("   ", &out, true),
            Err(TtsError::EmptyText)
        ));
        assert_eq!(fs::read(&out).unwrap(), b"old");
    }
}
