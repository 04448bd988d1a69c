//! GitHub release lookup and asset download.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, error};

use crate::download::{self, DownloadRequest, Downloader};

pub const GITHUB_API: &str = "https://api.github.com";
const API_TIMEOUT: Duration = Duration::from_secs(5);

static RE_HEX: OnceLock<Regex> = OnceLock::new();

fn re_hex() -> &'static Regex {
    RE_HEX.get_or_init(|| Regex::new(r"\b[0-9a-fA-F]{32,128}\b").expect("compile RE_HEX"))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub state: String,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Asset({}), {} bytes, {}, {}",
            self.name, self.size, self.state, self.browser_download_url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LatestVersion({}), {} assets", self.tag_name, self.assets.len())
    }
}

impl Release {
    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// MD5 published next to `asset` as `<name>.md5`, if there is one.
    pub fn hexdigest_for(&self, asset: &Asset) -> Option<String> {
        let sidecar = self.asset(&format!("{}.md5", asset.name))?;
        debug!("fetching digest from {}", sidecar.browser_download_url);
        let request = DownloadRequest::new(&sidecar.browser_download_url, &sidecar.name);
        let fetched = Downloader::new(request).and_then(|d| d.quiet().download_to_memory());
        match fetched {
            Ok(data) => extract_hexdigest(&data),
            Err(err) => {
                error!("unable to fetch {}: {err}", sidecar.name);
                None
            }
        }
    }

    /// Download `asset` to `outfile`, checked against its `.md5` sidecar
    /// when the release has one.
    pub fn download_asset(&self, asset: &Asset, outfile: impl AsRef<Path>) -> bool {
        let hexdigest = self.hexdigest_for(asset);
        download::download(&asset.browser_download_url, outfile, hexdigest.as_deref())
    }
}

/// First hex token of a digest file, which may be UTF-16 (with BOM) or UTF-8.
pub fn extract_hexdigest(data: &[u8]) -> Option<String> {
    let text = decode_text(data);
    re_hex()
        .find(&text)
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn decode_text(data: &[u8]) -> String {
    let utf16 = |body: &[u8], from: fn([u8; 2]) -> u16| {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| from([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    };
    match data {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

pub struct GithubClient {
    client: Client,
    api_base: String,
}

impl GithubClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_api_base(GITHUB_API)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(API_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Latest release of `repo` ("owner/name"). Failures are logged and
    /// give `None`.
    pub fn latest_release(&self, repo: &str) -> Option<Release> {
        debug!("obtaining latest version for \"{repo}\"");
        let url = format!("{}/repos/{repo}/releases/latest", self.api_base);
        let resp = match self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("elib/", env!("CARGO_PKG_VERSION")))
            .send()
        {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => {
                error!("request timed out: {url}");
                return None;
            }
            Err(err) => {
                error!("request failed: {err}");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            error!(
                "request failed: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            );
            return None;
        }

        match resp.json::<Release>() {
            Ok(release) => Some(release),
            Err(err) => {
                error!("parse latest release json: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_from_api_json() {
        let json = r#"{
            "tag_name": "v1.2.0",
            "body": "notes",
            "draft": false,
            "assets": [
                {"name": "tool.exe", "browser_download_url": "https://x/tool.exe",
                 "size": 1024, "state": "uploaded", "id": 7},
                {"name": "tool.exe.md5", "browser_download_url": "https://x/tool.exe.md5",
                 "size": 70, "state": "uploaded"}
            ]
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v1.2.0");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.to_string(), "LatestVersion(v1.2.0), 2 assets");
        assert_eq!(release.asset("tool.exe").unwrap().size, 1024);
        assert!(release.asset("missing").is_none());
    }

    #[test]
    fn no_sidecar_means_no_digest() {
        let release = Release {
            tag_name: "1.0".into(),
            body: None,
            assets: vec![Asset {
                name: "tool.exe".into(),
                browser_download_url: "http://127.0.0.1:9/tool.exe".into(),
                size: 0,
                state: "uploaded".into(),
            }],
        };
        assert_eq!(release.hexdigest_for(&release.assets[0]), None);
    }

    #[test]
    fn hexdigest_utf8_and_utf16() {
        let digest = "b1946ac92492d2347c6235b4d2611184";
        assert_eq!(
            extract_hexdigest(format!("{digest}  tool.exe\n").as_bytes()).as_deref(),
            Some(digest)
        );
        assert_eq!(
            extract_hexdigest(digest.to_uppercase().as_bytes()).as_deref(),
            Some(digest)
        );

        let mut le = vec![0xFF, 0xFE];
        for unit in format!("{digest}\r\n").encode_utf16() {
            le.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(extract_hexdigest(&le).as_deref(), Some(digest));

        let mut be = vec![0xFE, 0xFF];
        for unit in digest.encode_utf16() {
            be.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(extract_hexdigest(&be).as_deref(), Some(digest));

        assert_eq!(extract_hexdigest(b"not a digest"), None);
    }
}
