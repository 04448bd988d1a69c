//! Logging bootstrap.
//!
//! [`LogSystem`] is the one logging context of a process: created once at
//! start-up, torn down on drop (flushes the file writer and optionally zips
//! the log). Library code only emits `tracing` events and works unchanged when
//! no `LogSystem` exists.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024; // 10MB

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("unknown log level: {0}")]
    UnknownLevel(String),
    #[error("log level reload failed: {0}")]
    Reload(#[from] reload::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub console: bool,
    pub log_to_file: bool,
    /// Roll the file daily instead of archiving it when it grows too large.
    pub rotate_daily: bool,
    pub archive_on_exit: bool,
    pub logs_dir: PathBuf,
    pub file_stem: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            console: true,
            log_to_file: false,
            rotate_daily: false,
            archive_on_exit: false,
            logs_dir: PathBuf::from("logs"),
            file_stem: "elib".to_string(),
        }
    }
}

impl LogOptions {
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join(format!("{}.log", self.file_stem))
    }
}

/// Accepts the usual level spellings, including the `WARN`/`ERR`/`CRIT`
/// short forms. `CRITICAL` has no tracing counterpart and maps to `ERROR`.
pub fn parse_level(name: &str) -> Result<LevelFilter, LogError> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARNING" | "WARN" => Ok(LevelFilter::WARN),
        "ERROR" | "ERR" | "CRITICAL" | "CRIT" => Ok(LevelFilter::ERROR),
        "OFF" => Ok(LevelFilter::OFF),
        _ => Err(LogError::UnknownLevel(name.to_string())),
    }
}

type LevelSetter = Box<dyn Fn(LevelFilter) -> Result<(), reload::Error> + Send + Sync>;

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
    set_console_level: LevelSetter,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::ERROR
        };
        let (console_filter, console_handle) = reload::Layer::new(console_level);

        let console_writer: BoxMakeWriter = if options.console {
            BoxMakeWriter::new(io::stdout)
        } else {
            BoxMakeWriter::new(io::sink)
        };

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(options.use_color)
            .with_writer(console_writer)
            .with_filter(console_filter);

        let mut guard = None;
        let file_layer = if options.log_to_file {
            fs::create_dir_all(&options.logs_dir)?;
            let file_name = format!("{}.log", options.file_stem);
            let appender = if options.rotate_daily {
                rolling::daily(&options.logs_dir, &file_name)
            } else {
                archive_if_large(&options.log_file(), &options.logs_dir)?;
                rolling::never(&options.logs_dir, &file_name)
            };
            let (file_writer, file_guard) = non_blocking::NonBlockingBuilder::default()
                .lossy(false)
                .finish(appender);
            guard = Some(file_guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .with_filter(LevelFilter::DEBUG),
            )
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        let runtime = Arc::new(LogRuntime {
            logs_dir: options.logs_dir.clone(),
            latest_log: options.log_file(),
            guard: Mutex::new(guard),
            exit_called: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit && options.log_to_file && !options.rotate_daily,
        });

        runtime.install_signal_handler();
        runtime.install_panic_hook();

        if options.log_to_file {
            tracing::debug!("file logging to {}", options.log_file().display());
        }

        Ok(Self {
            runtime,
            set_console_level: Box::new(move |level| console_handle.reload(level)),
        })
    }

    /// Change console verbosity; the file layer keeps logging at DEBUG.
    pub fn set_console_level(&self, level: &str) -> Result<(), LogError> {
        let level = parse_level(level)?;
        (self.set_console_level)(level)?;
        Ok(())
    }

    pub fn safe_exit(&self) {
        self.runtime.safe_exit();
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    logs_dir: PathBuf,
    latest_log: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
    archive_on_exit: bool,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let _ = ctrlc::set_handler(move || {
            runtime.safe_exit();
            std::process::exit(130);
        });
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                error!("panic at {}:{}: {}", location.file(), location.line(), info);
            } else {
                error!("panic: {info}");
            }
            runtime.safe_exit();
            previous(info);
        }));
    }

    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }

        if self.archive_on_exit {
            if let Err(err) = archive_log_file(&self.latest_log, &self.logs_dir) {
                eprintln!("failed to archive log: {err}");
            }
        }
    }
}

fn archive_if_large(latest_log: &Path, logs_dir: &Path) -> Result<(), LogError> {
    if let Ok(meta) = fs::metadata(latest_log) {
        if meta.len() >= MAX_LOG_BYTES {
            archive_log_file(latest_log, logs_dir)?;
        }
    }
    Ok(())
}

/// Zip `latest_log` into `logs_dir/log_<timestamp>.zip` and remove it.
/// Empty logs are removed without an archive.
fn archive_log_file(latest_log: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    if !latest_log.exists() {
        return Ok(None);
    }
    let meta = fs::metadata(latest_log)?;
    if meta.len() == 0 {
        let _ = fs::remove_file(latest_log);
        return Ok(None);
    }

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let stem = latest_log
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("log");
    let archive_path = logs_dir.join(format!("{stem}_{timestamp}.zip"));

    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{stem}_{timestamp}.log"), options)?;

    let mut source = File::open(latest_log)?;
    io::copy(&mut source, &mut zip)?;
    zip.finish()?;
    drop(source);

    let _ = fs::remove_file(latest_log);

    info!("log archived to {}", archive_path.display());
    Ok(Some(archive_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("WARNING").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("Warn").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("ERR").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("crit").unwrap(), LevelFilter::ERROR);
        assert!(matches!(
            parse_level("loud"),
            Err(LogError::UnknownLevel(ref l)) if l == "loud"
        ));
    }

    #[test]
    fn default_log_file_location() {
        let opts = LogOptions::default();
        assert_eq!(opts.log_file(), PathBuf::from("logs").join("elib.log"));
    }

    #[test]
    fn archive_zips_and_removes_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("elib.log");
        fs::write(&log, "line one\nline two\n").unwrap();

        let archive = archive_log_file(&log, dir.path()).unwrap().unwrap();
        assert!(!log.exists());
        assert!(archive.file_name().unwrap().to_string_lossy().starts_with("elib_"));

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let mut content = String::new();
        zip.by_index(0).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "line one\nline two\n");
    }

    #[test]
    fn empty_or_missing_logs_are_not_archived() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("elib.log");
        assert!(archive_log_file(&log, dir.path()).unwrap().is_none());
        fs::write(&log, "").unwrap();
        assert!(archive_log_file(&log, dir.path()).unwrap().is_none());
        assert!(!log.exists());
    }

    #[test]
    fn small_logs_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("elib.log");
        fs::write(&log, "tiny").unwrap();
        archive_if_large(&log, dir.path()).unwrap();
        assert!(log.exists());
    }
}
