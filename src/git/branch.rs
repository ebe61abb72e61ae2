// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Suffixed branch series management.
//!
//! A series is a base branch `topic` plus its review iterations `topic-2`,
//! `topic-3`, and so on. [`increment`] starts the next iteration, and
//! [`cleanup`] reaps the whole series once it has been merged.

use crate::git::{GitError, GitRepo, Result};

use tracing::{debug, instrument, warn};

/// Options for reaping a branch series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Branch series to reap, optionally in `fork:branch` form.
    pub branch: String,

    /// Remote to compare against.
    pub remote: String,

    /// Branch the series was merged into, default branch of remote if unset.
    pub onto: Option<String>,

    /// Only report what would be deleted.
    pub dry_run: bool,
}

/// Reap every branch of a series once it has been merged.
///
/// The newest branch is rebased onto the merge target, and only deleted if
/// nothing is left on top of it afterwards. Older iterations are deleted
/// without question.
///
/// # Errors
///
/// - Return [`GitError::Dirty`] if working tree has changes.
/// - Return [`GitError::NoVictims`] if no branch belongs to series.
/// - Return [`GitError::StillContained`] if newest branch was not merged.
/// - Return [`GitError::Process`] if a git command fails.
#[instrument(skip(repo, opts), level = "debug")]
pub fn cleanup(repo: &GitRepo, opts: CleanupOptions) -> Result<()> {
    repo.ensure_clean()?;
    let onto = repo.onto_or_default(opts.onto, &opts.remote)?;
    let base = strip_fork(&opts.branch);

    let victims = reap_candidates(base, repo.local_branches()?);
    println!("going to delete {victims:?}");

    if opts.dry_run {
        println!("exiting due to --dry-run");
        return Ok(());
    }

    let Some((newest, older)) = victims.split_first() else {
        return Err(GitError::NoVictims);
    };

    for branch in older {
        force_delete(repo, branch)?;
    }
    delete_merged(repo, newest, &opts.remote, &onto)?;

    Ok(())
}

fn force_delete(repo: &GitRepo, branch: &str) -> Result<()> {
    repo.gitcall_interactive(["branch", "--delete", "--force", branch])
}

fn delete_merged(repo: &GitRepo, branch: &str, remote: &str, onto: &str) -> Result<()> {
    let upstream = format!("{remote}/{onto}");
    repo.gitcall_interactive(["checkout", "--detach", branch])?;
    repo.gitcall_interactive(["pull", "--rebase", remote, onto])?;

    let ours = repo.rev_parse("HEAD")?;
    let theirs = repo.rev_parse(&upstream)?;
    repo.gitcall_interactive(["checkout", upstream.as_str()])?;

    if ours != theirs {
        return Err(GitError::StillContained {
            branch: branch.to_string(),
            onto: onto.to_string(),
        });
    }

    force_delete(repo, branch)
}

/// Start the next review iteration of a branch series.
///
/// Returns name of the newly created and checked out branch.
///
/// # Errors
///
/// - Return [`GitError::Dirty`] if working tree has changes.
/// - Return [`GitError::BranchMissing`] if base branch does not exist.
/// - Return [`GitError::Diverged`] if newest iteration does not match remote.
/// - Return [`GitError::Process`] if a git command fails.
#[instrument(skip(repo, branch, remote), level = "debug")]
pub fn increment(repo: &GitRepo, branch: impl AsRef<str>, remote: impl AsRef<str>) -> Result<String> {
    let branch = branch.as_ref();
    repo.ensure_clean()?;

    let listing = repo.gitcall_non_interactive(["ls-remote", remote.as_ref(), branch])?;
    let upstream = listing.split_whitespace().next().map(ToString::to_string);
    if upstream.is_none() {
        warn!("{branch} does not exist upstream");
    }

    if !repo.resolves(branch) {
        return Err(GitError::BranchMissing {
            branch: branch.to_string(),
        });
    }

    let (newest, next) = next_increment(branch, |name| repo.resolves(name));
    debug!("newest iteration is {newest}, next is {next}");

    if let Some(upstream) = upstream {
        let local = repo.rev_parse(&newest)?.to_string();
        if local != upstream {
            return Err(GitError::Diverged {
                branch: newest,
                upstream: branch.to_string(),
            });
        }
    }

    repo.gitcall_interactive(["checkout", "-b", next.as_str(), newest.as_str()])?;

    Ok(next)
}

/// Keep only branch name of a `fork:branch` argument.
pub fn strip_fork(branch: &str) -> &str {
    branch
        .split_once(':')
        .map(|(_, branch)| branch)
        .unwrap_or(branch)
}

/// Suffix number of branch within series, base branch being zero.
pub fn series_index(base: &str, branch: &str) -> Option<u64> {
    if branch == base {
        return Some(0);
    }

    let suffix = branch.strip_prefix(base)?.strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    suffix.parse().ok()
}

/// Select series members among branches, newest first.
pub fn reap_candidates(base: &str, branches: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut victims = branches
        .into_iter()
        .filter_map(|branch| series_index(base, &branch).map(|index| (index, branch)))
        .collect::<Vec<_>>();
    victims.sort_by(|a, b| b.0.cmp(&a.0));

    victims.into_iter().map(|(_, branch)| branch).collect()
}

/// Find newest existing iteration and name of the next free one.
pub fn next_increment(base: &str, exists: impl Fn(&str) -> bool) -> (String, String) {
    let mut newest = base.to_string();
    let mut counter = 2;
    loop {
        let candidate = format!("{base}-{counter}");
        if !exists(&candidate) {
            return (newest, candidate);
        }
        newest = candidate;
        counter += 1;
    }
}
