// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! History rewriting of the current feature branch.

use crate::{
    git::{GitError, GitRepo, Result},
    process::shell_join,
};

use tracing::instrument;

/// Bring current branch up to date by rebasing it onto its merge target.
///
/// # Errors
///
/// - Return [`GitError::NoDefaultBranch`] if merge target cannot be found.
/// - Return [`GitError::Process`] if pull fails.
#[instrument(skip(repo), level = "debug")]
pub fn reup(repo: &GitRepo, remote: &str, onto: Option<String>) -> Result<()> {
    let onto = repo.onto_or_default(onto, remote)?;
    repo.gitcall_interactive(["pull", "--rebase", remote, onto.as_str()])
}

/// Interactively rewrite current branch without moving its branch point.
///
/// # Errors
///
/// - Return [`GitError::NoDefaultBranch`] if merge target cannot be found.
/// - Return [`GitError::Git2`] if branch shares no history with its target.
/// - Return [`GitError::Process`] if rebase fails.
#[instrument(skip(repo), level = "debug")]
pub fn edit(repo: &GitRepo, remote: &str, onto: Option<String>) -> Result<()> {
    let onto = repo.onto_or_default(onto, remote)?;
    let merge_base = repo.merge_base(format!("{remote}/{onto}"), "HEAD")?;
    repo.gitcall_interactive(["rebase", "--interactive", merge_base.to_string().as_str()])
}

/// Options for rewriting commit dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetimeOptions {
    /// Print command instead of running it.
    pub dry_run: bool,

    /// Remote to find default branch of.
    pub remote: String,

    /// Branch the commits will be merged into.
    pub onto: Option<String>,

    /// Optional base and head, or just head.
    pub refs: Vec<String>,
}

/// Rewrite author and committer dates of a commit range to now.
///
/// # Errors
///
/// - Return [`GitError::TooManyRefs`] if more than two refs are given.
/// - Return [`GitError::Dirty`] if working tree has changes.
/// - Return [`GitError::Process`] if filter-branch fails.
#[instrument(skip(repo, opts), level = "debug")]
pub fn retime(repo: &GitRepo, opts: RetimeOptions, now: &str) -> Result<()> {
    let command = retime_command(repo, &opts, now)?;

    if opts.dry_run {
        println!("would run: {}", shell_join(&command));
        return Ok(());
    }

    repo.gitcall_interactive(command.iter().skip(1))
}

fn retime_command(repo: &GitRepo, opts: &RetimeOptions, now: &str) -> Result<Vec<String>> {
    if opts.refs.len() > 2 {
        return Err(GitError::TooManyRefs);
    }
    repo.ensure_clean()?;

    let head = opts.refs.last().cloned().unwrap_or_else(|| "HEAD".into());
    let base = match opts.refs.as_slice() {
        [base, _] => base.clone(),
        _ => {
            let onto = repo.onto_or_default(opts.onto.clone(), &opts.remote)?;
            repo.merge_base(format!("{}/{onto}", opts.remote), &head)?
                .to_string()
        }
    };

    Ok(filter_branch_command(&base, &head, now))
}

/// Build `git filter-branch` invocation setting every date in range to `now`.
pub fn filter_branch_command(base: &str, head: &str, now: &str) -> Vec<String> {
    vec![
        "git".into(),
        "filter-branch".into(),
        "--force".into(),
        "--env-filter".into(),
        format!("export GIT_AUTHOR_DATE=\"{now}\"\nexport GIT_COMMITTER_DATE=\"{now}\""),
        "--".into(),
        format!("{base}..{head}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filter_branch_sets_both_dates() {
        let now = "Sat, 17 Oct 2026 12:00:00 +0000";
        let command = filter_branch_command("abc123", "HEAD", now);
        assert_eq!(command[4], format!("export GIT_AUTHOR_DATE=\"{now}\"\nexport GIT_COMMITTER_DATE=\"{now}\""));
        assert_eq!(command.last().map(String::as_str), Some("abc123..HEAD"));
        assert_eq!(&command[..3], ["git", "filter-branch", "--force"]);
    }
}
