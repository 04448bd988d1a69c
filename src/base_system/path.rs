//! Path assertions and best-effort cleanup.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("not a file: {0}")]
    NotAFile(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

fn absolute(path: &Path) -> Result<PathBuf, PathError> {
    std::path::absolute(path).map_err(|source| PathError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Absolute form of `path`; fails with `NotFound` when `must_exist` and it is missing.
pub fn ensure_path(path: impl AsRef<Path>, must_exist: bool) -> Result<PathBuf, PathError> {
    let path = absolute(path.as_ref())?;
    if must_exist && !path.exists() {
        return Err(PathError::NotFound(path));
    }
    Ok(path)
}

pub fn ensure_file(path: impl AsRef<Path>, must_exist: bool) -> Result<PathBuf, PathError> {
    let path = ensure_path(path, must_exist)?;
    if path.exists() && !path.is_file() {
        return Err(PathError::NotAFile(path));
    }
    Ok(path)
}

/// Like [`ensure_path`] for directories. `create` implies `must_exist = false`
/// and creates the directory (with parents) when it is missing.
pub fn ensure_dir(
    path: impl AsRef<Path>,
    must_exist: bool,
    create: bool,
) -> Result<PathBuf, PathError> {
    let must_exist = if create { false } else { must_exist };
    let path = ensure_path(path, must_exist)?;
    if path.exists() {
        if !path.is_dir() {
            return Err(PathError::NotADirectory(path));
        }
    } else if create {
        debug!("creating directory: {}", path.display());
        fs::create_dir_all(&path).map_err(|source| PathError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(path)
}

/// Delete `path` if present. Errors are swallowed; returns whether the path is gone.
pub fn remove_if_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if !path.exists() {
        return true;
    }
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            debug!("could not remove {}: {err}", path.display());
            false
        }
    }
}

pub fn is_empty_dir(path: impl AsRef<Path>) -> io::Result<bool> {
    let path = path.as_ref();
    let mut entries = fs::read_dir(path)?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_path_absolutizes() {
        let p = ensure_path("some/relative/thing", false).unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("some/relative/thing"));
    }

    #[test]
    fn ensure_path_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            ensure_path(&missing, true),
            Err(PathError::NotFound(_))
        ));
        assert!(ensure_path(&missing, false).is_ok());
    }

    #[test]
    fn ensure_file_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ensure_file(dir.path(), true),
            Err(PathError::NotAFile(_))
        ));
        let file = dir.path().join("f.txt");
        fs::write(&file, "x").unwrap();
        assert_eq!(ensure_file(&file, true).unwrap(), file);
    }

    #[test]
    fn ensure_dir_rejects_files_and_creates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            ensure_dir(&file, true, false),
            Err(PathError::NotADirectory(_))
        ));

        let nested = dir.path().join("a").join("b");
        assert!(matches!(
            ensure_dir(&nested, true, false),
            Err(PathError::NotFound(_))
        ));
        let created = ensure_dir(&nested, true, true).unwrap();
        assert!(created.is_dir());
        assert!(is_empty_dir(&created).unwrap());
    }

    #[test]
    fn remove_if_exists_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gone.bin");
        assert!(remove_if_exists(&file));
        fs::write(&file, b"data").unwrap();
        assert!(remove_if_exists(&file));
        assert!(!file.exists());
        assert!(is_empty_dir(dir.path()).unwrap());
    }
}
