//! Progress reporting: an optional caller callback plus a CLI progress bar.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::{DownloadState, DownloadStatus, ProgressSnapshot};

pub type ProgressCallback = Box<dyn FnMut(&ProgressSnapshot) + Send>;

pub(crate) struct ProgressReporter {
    cb: Option<ProgressCallback>,
    bar: Option<ProgressBar>,
}

impl ProgressReporter {
    pub(crate) fn new(
        url: &str,
        total: Option<u64>,
        show_bar: bool,
        cb: Option<ProgressCallback>,
    ) -> Self {
        let bar = show_bar.then(|| make_bar(url, total));
        Self { cb, bar }
    }

    pub(crate) fn update(&mut self, state: &DownloadState) {
        self.emit(state, DownloadStatus::Downloading);
    }

    pub(crate) fn finish(&mut self, state: &DownloadState) {
        self.emit(state, DownloadStatus::Finished);
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn emit(&mut self, state: &DownloadState, status: DownloadStatus) {
        let snapshot = state.snapshot(status);
        if let Some(bar) = self.bar.as_ref() {
            bar.set_position(snapshot.downloaded);
        }
        if let Some(cb) = self.cb.as_mut() {
            cb(&snapshot);
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}

fn make_bar(url: &str, total: Option<u64>) -> ProgressBar {
    let (bar, template) = match total {
        Some(total) => (
            ProgressBar::new(total),
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ),
        None => (
            ProgressBar::new_spinner(),
            "{msg} {spinner} {bytes} ({bytes_per_sec})",
        ),
    };
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.set_style(
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar.set_message(format!("Downloading {url}"));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn callback_sees_every_chunk_and_the_finish() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut reporter = ProgressReporter::new(
            "http://example/file",
            Some(4),
            false,
            Some(Box::new(move |snap: &ProgressSnapshot| {
                sink.lock().unwrap().push(snap.clone());
            })),
        );

        let mut state = DownloadState::new(Some(4), 2);
        state.push_chunk(b"ab", Duration::ZERO);
        reporter.update(&state);
        state.push_chunk(b"cd", Duration::ZERO);
        reporter.update(&state);
        reporter.finish(&state);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].downloaded, 2);
        assert_eq!(seen[0].percent_complete, "50.0%");
        assert_eq!(seen[2].status, DownloadStatus::Finished);
        assert_eq!(seen[2].time_left, "00:00");
    }
}
