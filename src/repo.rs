//! Thin wrapper over the `git` command line for one working tree.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),
    #[error("failed to run git: {0}")]
    Spawn(#[source] io::Error),
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },
    #[error("already stashed")]
    AlreadyStashed,
    #[error("no stash to pop")]
    NoStash,
    #[error("cannot stash; index is not empty")]
    IndexNotEmpty,
    #[error("cannot stash; there are untracked files")]
    UntrackedFiles,
    #[error("empty commit message")]
    EmptyCommitMessage,
    #[error("empty commit")]
    EmptyCommit,
    #[error("cannot use \"new_message\" and \"append_to_msg\" together")]
    ConflictingMessages,
    #[error("missing either \"new_message\" or \"append_to_msg\"")]
    MissingMessage,
    #[error("cannot amend the first commit")]
    NoParentCommit,
    #[error("repository is dirty; cannot {0}")]
    Dirty(String),
    #[error("unknown reference: {0}")]
    UnknownReference(String),
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),
    #[error("branch already exists: {0}")]
    BranchExists(String),
}

pub struct Repo {
    workdir: PathBuf,
    stashed: bool,
}

impl Repo {
    /// Open the repository rooted at `workdir` (it must contain `.git`).
    pub fn open(workdir: impl AsRef<Path>) -> Result<Self, RepoError> {
        let workdir = workdir.as_ref().to_path_buf();
        Self::ensure(&workdir)?;
        Ok(Self {
            workdir,
            stashed: false,
        })
    }

    /// `git init` in `workdir` and open it.
    pub fn init(workdir: impl AsRef<Path>) -> Result<Self, RepoError> {
        let workdir = workdir.as_ref().to_path_buf();
        let repo = Self {
            workdir,
            stashed: false,
        };
        repo.git(["init", "--quiet"])?;
        Ok(repo)
    }

    pub fn ensure(workdir: &Path) -> Result<(), RepoError> {
        debug!("checking repository");
        if !workdir.join(".git").exists() {
            error!("this command is meant to be ran in a Git repository.");
            return Err(RepoError::NotARepository(workdir.to_path_buf()));
        }
        debug!("repository check succeeded");
        Ok(())
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn raw<I, S>(&self, args: I) -> Result<(String, Output), RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let joined = args
            .iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        let output = Command::new("git")
            .args(&args)
            .current_dir(&self.workdir)
            .output()
            .map_err(RepoError::Spawn)?;
        Ok((joined, output))
    }

    /// Run git, returning trimmed stdout or the stderr of a failure.
    fn git<I, S>(&self, args: I) -> Result<String, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (joined, output) = self.raw(args)?;
        if !output.status.success() {
            return Err(RepoError::Command {
                args: joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    fn git_lines<I, S>(&self, args: I) -> Result<Vec<String>, RepoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self
            .git(args)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn current_branch(&self) -> Result<String, RepoError> {
        self.git(["symbolic-ref", "--short", "HEAD"])
    }

    pub fn tag(&self, tag: &str, overwrite: bool) -> Result<(), RepoError> {
        debug!("tagging repo: {tag}");
        match self.git(["tag", tag]) {
            Err(RepoError::Command { stderr, .. }) if overwrite && stderr.contains("already exists") => {
                self.remove_tag(tag)?;
                self.git(["tag", tag]).map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    pub fn remove_tag(&self, tag: &str) -> Result<(), RepoError> {
        debug!("removing tag: {tag}");
        self.git(["tag", "-d", tag]).map(|_| ())
    }

    /// Highest tag in version order.
    pub fn latest_tag(&self) -> Result<Option<String>, RepoError> {
        Ok(self
            .git_lines(["tag", "--list", "--sort=v:refname"])?
            .pop())
    }

    /// Tag pointing at HEAD, if any.
    pub fn current_tag(&self) -> Result<Option<String>, RepoError> {
        Ok(self
            .git_lines(["tag", "--points-at", "HEAD"])?
            .into_iter()
            .next())
    }

    pub fn is_on_tag(&self) -> Result<bool, RepoError> {
        Ok(self.current_tag()?.is_some())
    }

    pub fn latest_commit_sha(&self) -> Result<String, RepoError> {
        self.git(["rev-parse", "HEAD"])
    }

    pub fn last_commit_msg(&self) -> Result<String, RepoError> {
        self.git(["log", "-1", "--format=%B"])
    }

    pub fn untracked_files(&self) -> Result<Vec<String>, RepoError> {
        self.git_lines(["ls-files", "--others", "--exclude-standard"])
    }

    pub fn status(&self) -> Result<String, RepoError> {
        self.git(["status"])
    }

    pub fn staged_files(&self) -> Result<Vec<String>, RepoError> {
        self.git_lines(["diff", "--cached", "--name-only"])
    }

    pub fn index_is_empty(&self) -> Result<bool, RepoError> {
        Ok(self.staged_files()?.is_empty())
    }

    pub fn changed_files(&self) -> Result<Vec<String>, RepoError> {
        self.git_lines(["diff", "--name-only"])
    }

    /// Unstage everything; the working tree is untouched.
    pub fn reset_index(&self) -> Result<(), RepoError> {
        debug!("resetting changes");
        self.git(["reset", "--quiet"]).map(|_| ())
    }

    pub fn stage_all(&self) -> Result<(), RepoError> {
        debug!("staging all files");
        self.git(["add", "-A"]).map(|_| ())
    }

    pub fn stage_modified(&self) -> Result<(), RepoError> {
        debug!("staging modified files");
        self.git(["add", "-u"]).map(|_| ())
    }

    pub fn stage_subset<S: AsRef<str>>(&self, files: &[S]) -> Result<(), RepoError> {
        let files: Vec<&str> = files.iter().map(AsRef::as_ref).collect();
        debug!("staging files: {files:?}");
        let args = ["add", "-A", "--"].into_iter().chain(files);
        self.git(args).map(|_| ())
    }

    pub fn stash(&mut self, stash_name: &str) -> Result<(), RepoError> {
        if self.stashed {
            return Err(RepoError::AlreadyStashed);
        }
        if !self.index_is_empty()? {
            return Err(RepoError::IndexNotEmpty);
        }
        if !self.untracked_files()?.is_empty() {
            return Err(RepoError::UntrackedFiles);
        }
        if self.changed_files()?.is_empty() {
            debug!("no changes to stash");
            return Ok(());
        }
        debug!("stashing changes");
        self.git(["stash", "push", "-u", "-k", "-m", stash_name])?;
        self.stashed = true;
        Ok(())
    }

    /// Pop the stash made by [`Repo::stash`].
    pub fn unstash(&mut self) -> Result<(), RepoError> {
        if !self.stashed {
            return Err(RepoError::NoStash);
        }
        debug!("popping stash");
        self.git(["stash", "pop"])?;
        self.stashed = false;
        Ok(())
    }

    /// Commit staged changes. Without `files_to_add` everything is staged
    /// first; with it, the index is reset and only those files are staged.
    pub fn commit<S: AsRef<str>>(
        &self,
        message: &str,
        files_to_add: Option<&[S]>,
        allow_empty: bool,
    ) -> Result<(), RepoError> {
        if message.trim().is_empty() {
            return Err(RepoError::EmptyCommitMessage);
        }
        let message = if std::env::var_os("APPVEYOR").is_some() {
            add_skip_ci(message)
        } else {
            message.to_string()
        };
        debug!("committing with message: {message}");

        match files_to_add.filter(|f| !f.is_empty()) {
            None => self.stage_all()?,
            Some(files) => {
                if self.has_head() {
                    self.reset_index()?;
                }
                self.stage_subset(files)?;
            }
        }

        if self.index_is_empty()? && !allow_empty {
            return Err(RepoError::EmptyCommit);
        }

        let mut args = vec!["commit", "--quiet", "-m", message.as_str()];
        if allow_empty {
            args.push("--allow-empty");
        }
        self.git(args).map(|_| ())
    }

    /// Rewrite the last commit, keeping the tag on HEAD (if any) on the new commit.
    pub fn amend_commit<S: AsRef<str>>(
        &self,
        append_to_msg: Option<&str>,
        new_message: Option<&str>,
        files_to_add: Option<&[S]>,
    ) -> Result<(), RepoError> {
        if append_to_msg.is_some() && new_message.is_some() {
            return Err(RepoError::ConflictingMessages);
        }
        let previous = self.last_commit_msg()?;
        let mut message = amend_message(append_to_msg, new_message, &previous)?;
        if std::env::var_os("APPVEYOR").is_some() {
            message.push_str(" [skip ci]");
        }
        if self.git(["rev-parse", "--verify", "--quiet", "HEAD~1"]).is_err() {
            return Err(RepoError::NoParentCommit);
        }

        debug!("amending commit with new message: {message}");
        let latest_tag = self.current_tag()?;
        if let Some(tag) = &latest_tag {
            self.remove_tag(tag)?;
        }

        match files_to_add.filter(|f| !f.is_empty()) {
            Some(files) => self.stage_subset(files)?,
            None => self.stage_all()?,
        }
        self.git(["commit", "--quiet", "--amend", "--no-verify", "-m", message.as_str()])?;

        if let Some(tag) = &latest_tag {
            debug!("resetting tag: {tag}");
            self.tag(tag, false)?;
        }
        Ok(())
    }

    pub fn merge(&self, ref_name: &str) -> Result<(), RepoError> {
        if self.is_dirty(false)? {
            return Err(RepoError::Dirty(format!("merge \"{ref_name}\"")));
        }
        debug!("merging {ref_name} into {}", self.current_branch()?);
        self.git(["merge", "--quiet", ref_name]).map(|_| ())
    }

    pub fn push(&self) -> Result<(), RepoError> {
        debug!("pushing repo to origin");
        self.git(["push"])?;
        self.push_tags()
    }

    pub fn push_tags(&self) -> Result<(), RepoError> {
        debug!("pushing tags to origin");
        self.git(["push", "--tags"]).map(|_| ())
    }

    pub fn list_branches(&self) -> Result<Vec<String>, RepoError> {
        self.git_lines(["for-each-ref", "--format=%(refname:short)", "refs/heads"])
    }

    /// Switch to an existing local branch. Refuses when anything is staged,
    /// modified or untracked.
    pub fn checkout(&self, reference: &str) -> Result<(), RepoError> {
        if !self.index_is_empty()? || self.is_dirty(true)? {
            return Err(RepoError::Dirty(format!("checkout \"{reference}\"")));
        }
        if !self.list_branches()?.iter().any(|b| b == reference) {
            return Err(RepoError::UnknownReference(reference.to_string()));
        }
        debug!("checking out: {reference}");
        self.git(["checkout", "--quiet", reference]).map(|_| ())
    }

    pub fn create_branch(&self, branch_name: &str) -> Result<(), RepoError> {
        debug!("creating branch: {branch_name}");
        if self
            .git(["check-ref-format", "--branch", branch_name])
            .is_err()
        {
            return Err(RepoError::InvalidBranchName(branch_name.to_string()));
        }
        if self.list_branches()?.iter().any(|b| b == branch_name) {
            return Err(RepoError::BranchExists(branch_name.to_string()));
        }
        self.git(["branch", branch_name]).map(|_| ())
    }

    pub fn create_branch_and_checkout(&self, branch_name: &str) -> Result<(), RepoError> {
        self.create_branch(branch_name)?;
        self.checkout(branch_name)
    }

    /// True when something is staged or modified (or, with `untracked`, untracked).
    pub fn is_dirty(&self, untracked: bool) -> Result<bool, RepoError> {
        let mut dirty = false;
        if !self.index_is_empty()? {
            error!("index is not empty");
            dirty = true;
        }
        let changed = self.changed_files()?;
        if !changed.is_empty() {
            error!("repo has {} modified files: {changed:?}", changed.len());
            dirty = true;
        }
        if untracked && !dirty {
            dirty = !self.untracked_files()?.is_empty();
        }
        Ok(dirty)
    }

    fn has_head(&self) -> bool {
        self.git(["rev-parse", "--verify", "--quiet", "HEAD"]).is_ok()
    }
}

fn add_skip_ci(message: &str) -> String {
    match message.find('\n') {
        None => format!("{message} [skip ci]"),
        Some(idx) => format!("{} [skip ci]{}", &message[..idx], &message[idx..]),
    }
}

fn amend_message(
    append_to_msg: Option<&str>,
    new_message: Option<&str>,
    previous: &str,
) -> Result<String, RepoError> {
    if let Some(append) = append_to_msg {
        let mut last = previous.trim_end().to_string();
        if last.contains(append) {
            return Ok(last);
        }
        if !last.contains("\n\n") {
            last.push('\n');
        }
        return Ok(format!("{last}\n{append}"));
    }
    new_message
        .map(str::to_string)
        .ok_or(RepoError::MissingMessage)
}
