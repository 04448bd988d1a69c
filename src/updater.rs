//! In-place executable updates from GitHub releases.
//!
//! The newest release's first `.exe` asset is downloaded as `update` next to
//! the running executable. On Windows a hidden batch script swaps the files
//! once this process has exited; elsewhere the file is moved into place
//! directly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use semver::Version;
use tracing::{debug, error, info};

use crate::github::{GithubClient, Release};

pub const STAGED_NAME: &str = "update";
pub const UPDATE_BAT: &str = "update.bat";
pub const UPDATE_VBS: &str = "update.vbs";

/// Runs its first argument without a console window.
pub const VBS_LAUNCHER: &str =
    "CreateObject(\"Wscript.Shell\").Run \"\"\"\" & WScript.Arguments(0) & \"\"\"\", 0, False";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    NoRelease,
    NoAsset,
    DownloadFailed,
    /// New executable in place (non-Windows only; Windows exits instead).
    Installed(PathBuf),
}

pub struct Updater {
    repo: String,
    current_version: String,
    local_executable: PathBuf,
    github: Option<GithubClient>,
}

impl Updater {
    pub fn new(
        repo: impl Into<String>,
        current_version: impl Into<String>,
        local_executable: impl AsRef<Path>,
    ) -> Result<Self> {
        let local_executable = std::path::absolute(local_executable.as_ref())
            .with_context(|| format!("resolve {}", local_executable.as_ref().display()))?;
        Ok(Self {
            repo: repo.into(),
            current_version: current_version.into(),
            local_executable,
            github: None,
        })
    }

    pub fn with_github(mut self, github: GithubClient) -> Self {
        self.github = Some(github);
        self
    }

    pub fn update(&self) -> Result<UpdateOutcome> {
        let default_client;
        let github = match &self.github {
            Some(client) => client,
            None => {
                default_client = GithubClient::new().context("init http client")?;
                &default_client
            }
        };
        let Some(release) = github.latest_release(&self.repo) else {
            error!("unable to obtain a release from Github");
            return Ok(UpdateOutcome::NoRelease);
        };
        debug!("latest release: {release}");

        let latest = parse_version(&release.tag_name)?;
        let current = parse_version(&self.current_version)?;
        debug!(%latest, %current, "comparing versions");
        if latest <= current {
            debug!("already up-to-date");
            return Ok(UpdateOutcome::UpToDate);
        }

        info!("new version found: {latest}");
        let staged = self.staged_path()?;
        match download_latest_release(&release, &staged) {
            Some(true) => {}
            Some(false) => return Ok(UpdateOutcome::DownloadFailed),
            None => return Ok(UpdateOutcome::NoAsset),
        }

        self.install(&staged)
    }

    fn staged_path(&self) -> Result<PathBuf> {
        let dir = self
            .local_executable
            .parent()
            .ok_or_else(|| anyhow!("cannot determine executable directory"))?;
        Ok(dir.join(STAGED_NAME))
    }

    #[cfg(windows)]
    fn install(&self, staged: &Path) -> Result<UpdateOutcome> {
        info!("installing latest version");
        debug!("local executable: \"{}\"", self.local_executable.display());
        let dir = staged
            .parent()
            .ok_or_else(|| anyhow!("cannot determine executable directory"))?;
        let exe_name = self
            .local_executable
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("invalid exe name"))?;

        write_scripts(dir, exe_name)?;
        debug!("starting update batch file");
        std::process::Command::new("wscript.exe")
            .args([UPDATE_VBS, UPDATE_BAT])
            .current_dir(dir)
            .spawn()
            .context("spawn wscript.exe")?;
        std::process::exit(0);
    }

    #[cfg(not(windows))]
    fn install(&self, staged: &Path) -> Result<UpdateOutcome> {
        info!("installing latest version");
        let installed = apply_update(staged, &self.local_executable)?;
        info!("update installed: {}", installed.display());
        Ok(UpdateOutcome::Installed(installed))
    }
}

/// `None` when the release carries no `.exe` asset.
fn download_latest_release(release: &Release, outfile: &Path) -> Option<bool> {
    debug!("downloading latest release");
    let Some(asset) = release.assets.iter().find(|a| a.name.ends_with(".exe")) else {
        error!("no executable asset found");
        return None;
    };
    debug!("executable asset found: {}", asset.name);
    Some(release.download_asset(asset, outfile))
}

/// Semver with a leading `v` dropped and missing minor/patch filled with 0.
/// Components past the third (`1.2.3.4`) become build metadata (`1.2.3+4`).
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let core_end = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, suffix) = bare.split_at(core_end);
    let parts: Vec<&str> = core.split('.').collect();
    let normalized = match parts.len() {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        3 => bare.to_string(),
        _ => {
            let (pre, build) = match suffix.split_once('+') {
                Some((pre, build)) => (pre, format!("{}.{build}", parts[3..].join("."))),
                None => (suffix, parts[3..].join(".")),
            };
            format!("{}{pre}+{build}", parts[..3].join("."))
        }
    };
    Version::parse(&normalized).with_context(|| format!("invalid version: {raw}"))
}

/// Batch script that waits for the old process, swaps in the staged file,
/// restarts it, then removes both scripts.
pub fn update_bat(exe_name: &str) -> String {
    [
        "@echo off".to_string(),
        "echo Updating to latest version...".to_string(),
        "ping 127.0.0.1 -n 5 -w 1000 > NUL".to_string(),
        format!("move /Y \"{STAGED_NAME}\" \"{exe_name}\" > NUL"),
        "echo restarting...".to_string(),
        format!("start \"\" \"{exe_name}\""),
        format!("DEL {UPDATE_VBS}"),
        "DEL \"%~f0\"".to_string(),
    ]
    .join("\r\n")
}

pub fn write_scripts(dir: &Path, exe_name: &str) -> Result<()> {
    debug!("write bat file");
    let bat = dir.join(UPDATE_BAT);
    fs::write(&bat, update_bat(exe_name)).with_context(|| format!("write {}", bat.display()))?;
    debug!("write vbs script");
    let vbs = dir.join(UPDATE_VBS);
    fs::write(&vbs, VBS_LAUNCHER).with_context(|| format!("write {}", vbs.display()))?;
    Ok(())
}

/// Move `staged` over `local_exe` and make it executable.
pub fn apply_update(staged: &Path, local_exe: &Path) -> Result<PathBuf> {
    if local_exe.exists() {
        fs::remove_file(local_exe).with_context(|| format!("remove {}", local_exe.display()))?;
    }
    fs::rename(staged, local_exe).context("move new executable")?;

    // chmod 755 best-effort
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perm = fs::metadata(local_exe)?.permissions();
        perm.set_mode(0o755);
        let _ = fs::set_permissions(local_exe, perm);
    }

    Ok(local_exe.to_path_buf())
}
