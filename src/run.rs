//! Run external commands and capture their output.

use std::collections::HashMap;
use std::env::consts::EXE_SUFFIX;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("failed to start {exe}: {source}")]
    Spawn {
        exe: String,
        #[source]
        source: io::Error,
    },
    #[error("command failed: {exe} -> {code}")]
    Failed {
        exe: String,
        code: i32,
        output: String,
    },
}

/// Resolves executable names to paths, remembering what it found.
#[derive(Debug, Default)]
pub struct ExecutableFinder {
    paths: Vec<PathBuf>,
    known: HashMap<String, PathBuf>,
}

impl ExecutableFinder {
    /// Search `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Search only `paths`.
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            known: HashMap::new(),
        }
    }

    pub fn find(&mut self, executable: &str) -> Option<PathBuf> {
        let executable = with_exe_suffix(executable);
        if let Some(found) = self.known.get(&executable) {
            return Some(found.clone());
        }

        debug!("looking for executable: {executable}");
        let as_path = Path::new(&executable);
        let found = if as_path.is_file() {
            std::path::absolute(as_path).ok()
        } else if self.paths.is_empty() {
            which::which(&executable).ok()
        } else {
            let joined: OsString = std::env::join_paths(&self.paths).ok()?;
            let cwd = std::env::current_dir().ok()?;
            which::which_in(&executable, Some(joined), cwd).ok()
        };

        match &found {
            Some(path) => {
                debug!("{executable} -> {}", path.display());
                self.known.insert(executable, path.clone());
            }
            None => debug!("{executable} -> not found"),
        }
        found
    }
}

fn with_exe_suffix(executable: &str) -> String {
    if EXE_SUFFIX.is_empty() || executable.ends_with(EXE_SUFFIX) {
        executable.to_string()
    } else {
        format!("{executable}{EXE_SUFFIX}")
    }
}

/// `None` when `line` contains any of `filters`.
pub fn filter_line<'a>(line: &'a str, filters: &[String]) -> Option<&'a str> {
    if filters.iter().any(|f| line.contains(f.as_str())) {
        None
    } else {
        Some(line)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: PathBuf,
    /// Log the output at debug level only.
    pub mute: bool,
    /// Output lines containing any of these are dropped.
    pub filters: Vec<String>,
    /// Return a non-zero exit code as `Ok` instead of `RunError::Failed`.
    pub failure_ok: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            mute: false,
            filters: Vec::new(),
            failure_ok: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub output: String,
    pub code: i32,
}

/// Run `cmd` (program and arguments separated by whitespace) and collect
/// stdout followed by stderr, minus filtered lines.
pub fn run(
    finder: &mut ExecutableFinder,
    cmd: &str,
    options: &RunOptions,
) -> Result<RunOutput, RunError> {
    let mut parts = cmd.split_whitespace();
    let program = parts.next().ok_or(RunError::EmptyCommand)?;
    let args: Vec<&str> = parts.collect();

    let exe = finder
        .find(program)
        .ok_or_else(|| RunError::NotFound(program.to_string()))?;
    let exe_short = exe
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());

    let display_cmd = std::iter::once(format!("\"{}\"", exe.display()))
        .chain(args.iter().map(|a| a.to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    if options.mute {
        debug!("RUNNING: {display_cmd}");
    } else {
        info!("RUNNING: {display_cmd}");
    }

    let output = Command::new(&exe)
        .args(&args)
        .current_dir(&options.cwd)
        .output()
        .map_err(|source| RunError::Spawn {
            exe: exe_short.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let result = stdout
        .lines()
        .chain(stderr.lines())
        .filter_map(|line| filter_line(line, &options.filters))
        .collect::<Vec<_>>()
        .join("\n");
    // Killed by a signal: no code.
    let code = output.status.code().unwrap_or(-1);

    if code != 0 {
        error!("command failed: {exe_short} -> {code}");
        if !result.is_empty() {
            error!("{exe_short} error:\n{result}");
        }
        if !options.failure_ok {
            return Err(RunError::Failed {
                exe: exe_short,
                code,
                output: result,
            });
        }
    } else if options.mute {
        debug!("{exe_short} -> {code}");
    } else {
        if !result.is_empty() {
            info!("{result}");
        }
        info!("{exe_short} -> {code}");
    }

    Ok(RunOutput {
        output: result,
        code,
    })
}
