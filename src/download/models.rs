use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::hash::HashMethod;

/// Upper bound for the adaptive read size.
pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 4096 * 4;
pub const DEFAULT_RETRIES: u32 = 3;

const UNKNOWN_ETA: &str = "--:--";
const UNKNOWN_PERCENT: &str = "-.-%";

/// What to fetch, where to put it and how to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub outfile: PathBuf,
    pub expected_digest: Option<String>,
    pub hash_method: HashMethod,
    pub max_retries: u32,
    pub block_size: usize,
    /// Whole-request timeout for the GET; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, outfile: impl AsRef<Path>) -> Self {
        Self {
            url: url.into(),
            outfile: outfile.as_ref().to_path_buf(),
            expected_digest: None,
            hash_method: HashMethod::default(),
            max_retries: DEFAULT_RETRIES,
            block_size: DEFAULT_BLOCK_SIZE,
            timeout: None,
        }
    }

    pub fn with_digest(mut self, digest: Option<&str>) -> Self {
        self.expected_digest = digest.map(str::to_string);
        self
    }

    pub fn with_hash_method(mut self, method: HashMethod) -> Self {
        self.hash_method = method;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.clamp(1, MAX_BLOCK_SIZE);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: Option<u64>,
    pub downloaded: u64,
    pub status: DownloadStatus,
    pub percent_complete: String,
    pub time_left: String,
}

/// Transient state of one transfer. `received` always equals `buffer.len()`.
#[derive(Debug)]
pub struct DownloadState {
    buffer: Vec<u8>,
    received: u64,
    content_length: Option<u64>,
    block_size: usize,
    started: Instant,
}

impl DownloadState {
    pub fn new(content_length: Option<u64>, block_size: usize) -> Self {
        let capacity = content_length
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
            .min(64 * MAX_BLOCK_SIZE);
        Self {
            buffer: Vec::with_capacity(capacity),
            received: 0,
            content_length,
            block_size: block_size.max(1),
            started: Instant::now(),
        }
    }

    /// Append a chunk that took `elapsed` to read and pick the next read size.
    pub fn push_chunk(&mut self, chunk: &[u8], elapsed: Duration) {
        self.buffer.extend_from_slice(chunk);
        self.received += chunk.len() as u64;
        self.block_size = best_block_size(elapsed, chunk.len());
        debug_assert_eq!(self.received, self.buffer.len() as u64);
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    pub fn snapshot(&self, status: DownloadStatus) -> ProgressSnapshot {
        let time_left = match status {
            DownloadStatus::Finished => "00:00".to_string(),
            DownloadStatus::Downloading => {
                calc_eta(self.started.elapsed(), self.content_length, self.received)
            }
        };
        ProgressSnapshot {
            total: self.content_length,
            downloaded: self.received,
            status,
            percent_complete: calc_progress_percent(self.received, self.content_length),
            time_left,
        }
    }
}

/// Next read size from the last chunk: its transfer rate, clamped to
/// `[chunk / 2, chunk * 2]` and never above [`MAX_BLOCK_SIZE`]. Chunks read in
/// under a millisecond jump straight to the upper bound.
pub fn best_block_size(elapsed: Duration, chunk: usize) -> usize {
    let chunk = chunk as f64;
    let new_min = (chunk / 2.0).max(1.0);
    let new_max = (chunk * 2.0).max(1.0).min(MAX_BLOCK_SIZE as f64);

    let secs = elapsed.as_secs_f64();
    if secs < 0.001 {
        return new_max as usize;
    }

    let rate = chunk / secs;
    if rate > new_max {
        return new_max as usize;
    }
    if rate < new_min {
        return new_min as usize;
    }
    rate as usize
}

/// `MM:SS` until completion, or `--:--` when it cannot be told or exceeds 99 minutes.
pub fn calc_eta(elapsed: Duration, total: Option<u64>, current: u64) -> String {
    let Some(total) = total else {
        return UNKNOWN_ETA.to_string();
    };
    let secs = elapsed.as_secs_f64();
    if current == 0 || secs < 0.001 {
        return UNKNOWN_ETA.to_string();
    }

    let rate = current as f64 / secs;
    let eta = (total.saturating_sub(current) as f64 / rate) as u64;
    let (mins, secs) = (eta / 60, eta % 60);
    if mins > 99 {
        return UNKNOWN_ETA.to_string();
    }
    format!("{mins:02}:{secs:02}")
}

pub fn calc_progress_percent(received: u64, total: Option<u64>) -> String {
    match total {
        None => UNKNOWN_PERCENT.to_string(),
        Some(0) => "100.0%".to_string(),
        Some(total) => format!("{:.1}%", received as f64 / total as f64 * 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_chunks_jump_to_upper_bound() {
        assert_eq!(best_block_size(Duration::ZERO, 1000), 2000);
        assert_eq!(best_block_size(Duration::from_micros(500), 1000), 2000);
        assert_eq!(best_block_size(Duration::ZERO, MAX_BLOCK_SIZE), MAX_BLOCK_SIZE);
        assert_eq!(best_block_size(Duration::ZERO, 0), 1);
    }

    #[test]
    fn block_size_follows_rate_within_bounds() {
        // 1000 bytes in 1s: rate 1000, inside [500, 2000].
        assert_eq!(best_block_size(Duration::from_secs(1), 1000), 1000);
        // 1000 bytes in 0.625s: rate 1600.
        assert_eq!(best_block_size(Duration::from_millis(625), 1000), 1600);
        // Slow: clamped to half.
        assert_eq!(best_block_size(Duration::from_secs(10), 1000), 500);
        // Fast: clamped to double.
        assert_eq!(best_block_size(Duration::from_millis(100), 1000), 2000);
        // Double would pass 4 MiB.
        assert_eq!(
            best_block_size(Duration::from_millis(10), 3 * 1024 * 1024),
            MAX_BLOCK_SIZE
        );
    }

    #[test]
    fn eta_sentinels() {
        let second = Duration::from_secs(1);
        assert_eq!(calc_eta(second, None, 10), "--:--");
        assert_eq!(calc_eta(second, Some(100), 0), "--:--");
        assert_eq!(calc_eta(Duration::ZERO, Some(100), 10), "--:--");
        // 1 byte/s with 10_000 bytes left is over 99 minutes.
        assert_eq!(calc_eta(second, Some(10_001), 1), "--:--");
    }

    #[test]
    fn eta_formats_minutes_and_seconds() {
        // 10 bytes/s, 750 bytes left: 75s.
        assert_eq!(calc_eta(Duration::from_secs(2), Some(770), 20), "01:15");
        assert_eq!(calc_eta(Duration::from_secs(2), Some(20), 20), "00:00");
    }

    #[test]
    fn percent_display() {
        assert_eq!(calc_progress_percent(5, None), "-.-%");
        assert_eq!(calc_progress_percent(1, Some(3)), "33.3%");
        assert_eq!(calc_progress_percent(3, Some(3)), "100.0%");
        assert_eq!(calc_progress_percent(0, Some(0)), "100.0%");
    }

    #[test]
    fn state_keeps_received_in_step_with_buffer() {
        let mut state = DownloadState::new(Some(6), DEFAULT_BLOCK_SIZE);
        state.push_chunk(b"abc", Duration::ZERO);
        assert_eq!(state.received(), 3);
        assert_eq!(state.block_size(), 6);
        state.push_chunk(b"def", Duration::from_secs(1));
        assert_eq!(state.received(), state.buffer().len() as u64);
        assert_eq!(state.block_size(), 3);

        let snap = state.snapshot(DownloadStatus::Finished);
        assert_eq!(snap.downloaded, 6);
        assert_eq!(snap.percent_complete, "100.0%");
        assert_eq!(snap.time_left, "00:00");
        assert_eq!(state.into_buffer(), b"abcdef");
    }

    #[test]
    fn request_builder_defaults() {
        let req = DownloadRequest::new("http://example/5MB.zip", "./test")
            .with_digest(Some("C10201C7"))
            .with_block_size(0);
        assert_eq!(req.hash_method, HashMethod::Md5);
        assert_eq!(req.max_retries, 3);
        assert_eq!(req.block_size, 1);
        assert_eq!(req.expected_digest.as_deref(), Some("C10201C7"));
        assert_eq!(
            DownloadRequest::new("u", "o").block_size,
            DEFAULT_BLOCK_SIZE
        );
    }
}
