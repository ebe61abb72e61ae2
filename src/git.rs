// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git workflow helpers.
//!
//! Small commands for a review-driven branch workflow: every round of review
//! gets its own suffixed copy of a feature branch (`topic`, `topic-2`,
//! `topic-3`, ...), and once the series lands all of them are reaped at once.
//!
//! Repository inspection is done through libgit2. Anything that changes the
//! repository or talks to a remote goes through the `git` binary, so user
//! hooks and credentials behave as usual. Every such invocation is echoed to
//! stdout prefixed with `+`, the way `sh -x` does it.

pub mod branch;
pub mod rebase;

use crate::process::{echo_command, syscall_interactive, syscall_non_interactive, ProcessError};

use git2::{Oid, Repository, StatusOptions};
use regex::Regex;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

/// Repository the git helpers operate on.
pub struct GitRepo {
    repository: Repository,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
}

impl GitRepo {
    /// Open repository containing target path.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if no repository contains path.
    /// - Return [`GitError::Bare`] if repository has no working tree.
    /// - Return [`GitError::NoHead`] if HEAD does not point to a commit.
    #[instrument(skip(path), level = "debug")]
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let repository = Repository::discover(path.as_ref())?;
        let workdir = repository.workdir().ok_or(GitError::Bare)?.to_path_buf();

        // INVARIANT: HEAD must resolve to a commit.
        if repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
            .is_none()
        {
            return Err(GitError::NoHead);
        }

        debug!("opened repository at {:?}", workdir.display());
        Ok(Self {
            repository,
            workdir,
            env: BTreeMap::new(),
        })
    }

    /// Set environment variable for every `git` process spawned.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Path to working tree.
    pub fn workdir(&self) -> &Path {
        self.workdir.as_path()
    }

    /// Check that no tracked file has been modified.
    ///
    /// Untracked files and submodules do not count.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if status cannot be determined.
    pub fn is_clean(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .exclude_submodules(true);

        Ok(self.repository.statuses(Some(&mut opts))?.is_empty())
    }

    /// Fail unless working tree is clean.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Dirty`] if working tree has changes.
    pub fn ensure_clean(&self) -> Result<()> {
        if !self.is_clean()? {
            return Err(GitError::Dirty);
        }

        Ok(())
    }

    /// Names of every local branch, sorted.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if branches cannot be listed.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for branch in self.repository.branches(Some(git2::BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();

        Ok(names)
    }

    /// Resolve revision to the commit it names.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if revision does not name a commit.
    pub fn rev_parse(&self, spec: impl AsRef<str>) -> Result<Oid> {
        Ok(self
            .repository
            .revparse_single(spec.as_ref())?
            .peel_to_commit()?
            .id())
    }

    /// Check whether revision names a commit.
    pub fn resolves(&self, spec: impl AsRef<str>) -> bool {
        self.rev_parse(spec).is_ok()
    }

    /// Find best common ancestor of two revisions.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Git2`] if either revision is unknown, or they
    ///   share no history.
    pub fn merge_base(&self, one: impl AsRef<str>, two: impl AsRef<str>) -> Result<Oid> {
        let one = self.rev_parse(one)?;
        let two = self.rev_parse(two)?;
        Ok(self.repository.merge_base(one, two)?)
    }

    /// Determine default branch of remote.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Process`] if remote cannot be queried.
    /// - Return [`GitError::NoDefaultBranch`] if remote reports no HEAD branch.
    pub fn default_branch(&self, remote: impl AsRef<str>) -> Result<String> {
        let show = self.gitcall_non_interactive(["remote", "show", remote.as_ref()])?;
        let branch = parse_default_branch(&show).ok_or(GitError::NoDefaultBranch)?;
        debug!("figured out default branch is {branch}");
        Ok(branch)
    }

    /// Use `onto` if given, otherwise the default branch of remote.
    ///
    /// # Errors
    ///
    /// - Return errors of [`GitRepo::default_branch`].
    pub fn onto_or_default(&self, onto: Option<String>, remote: impl AsRef<str>) -> Result<String> {
        match onto {
            Some(onto) => Ok(onto),
            None => self.default_branch(remote),
        }
    }

    /// Run `git` with inherited stdio inside working tree.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Process`] if git cannot be run or fails.
    pub fn gitcall_interactive(
        &self,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<()> {
        let args = self.echo(args);
        Ok(syscall_interactive(&mut self.git(&args))?)
    }

    /// Run `git` inside working tree, collecting its stdout.
    ///
    /// # Errors
    ///
    /// - Return [`GitError::Process`] with stderr if git cannot be run or
    ///   fails.
    pub fn gitcall_non_interactive(
        &self,
        args: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<String> {
        let args = self.echo(args);
        Ok(syscall_non_interactive(&mut self.git(&args))?)
    }

    fn echo(&self, args: impl IntoIterator<Item = impl AsRef<str>>) -> Vec<String> {
        let args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_string())
            .collect::<Vec<_>>();
        echo_command(std::iter::once("git").chain(args.iter().map(String::as_str)));
        args
    }

    fn git(&self, args: &[String]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir)
            .args(args)
            .envs(&self.env);
        cmd
    }
}

/// Extract default branch from `git remote show` output.
pub fn parse_default_branch(show: &str) -> Option<String> {
    let pattern = Regex::new(r"(?m)^\s*HEAD branch: (.*)$").ok()?;
    pattern
        .captures(show)
        .and_then(|caps| caps.get(1))
        .map(|name| name.as_str().trim().to_string())
}

/// Git helper error types.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Libgit2 operation failed.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// External git process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Repository has no working tree.
    #[error("repository has no working tree")]
    Bare,

    /// HEAD does not resolve.
    #[error("HEAD does not point to a commit")]
    NoHead,

    /// Tracked files have changes.
    #[error("changes in working directory; aborting")]
    Dirty,

    /// Remote did not report a HEAD branch.
    #[error("could not figure out default branch name")]
    NoDefaultBranch,

    /// Nothing matched the branch to reap.
    #[error("no branches to delete")]
    NoVictims,

    /// Reaped branch was not fully merged.
    #[error("{branch} still contained commits after rebasing {onto}")]
    StillContained { branch: String, onto: String },

    /// Branch to increment does not exist locally.
    #[error("branch {branch} does not exist")]
    BranchMissing { branch: String },

    /// Newest local branch and remote branch point at different commits.
    #[error("branch {branch} is not at the same commit as upstream {upstream}")]
    Diverged { branch: String, upstream: String },

    /// More than a base and a head given.
    #[error("at most 2 ref arguments allowed")]
    TooManyRefs,
}

/// Friendly result alias :3
pub type Result<T, E = GitError> = std::result::Result<T, E>;
