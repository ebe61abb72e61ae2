// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{RepoFixture, RepoKind};

use anyhow::Result;
use oddjobs::git::{
    branch::{cleanup, increment, CleanupOptions},
    rebase::{retime, RetimeOptions},
    GitError, GitRepo,
};
use pretty_assertions::assert_eq;
use std::fs::{create_dir_all, write};

#[test]
fn discover_from_subdirectory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("README.md", "hello")?;
    create_dir_all(dir.path().join("docs").join("deep"))?;

    let repo = GitRepo::discover(dir.path().join("docs").join("deep"))?;
    assert_eq!(repo.workdir().canonicalize()?, dir.path().canonicalize()?);

    Ok(())
}

#[test]
fn discover_requires_commit() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let _fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;

    let result = GitRepo::discover(dir.path());
    assert!(matches!(result, Err(GitError::NoHead)));

    Ok(())
}

#[test]
fn discover_rejects_bare() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Bare)?;
    fixture.stage_and_commit("README.md", "hello")?;

    let result = GitRepo::discover(dir.path());
    assert!(matches!(result, Err(GitError::Bare)));

    Ok(())
}

#[test]
fn untracked_files_keep_tree_clean() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("README.md", "hello")?;
    let repo = GitRepo::discover(dir.path())?;

    write(dir.path().join("scratch.txt"), "not tracked")?;
    assert!(repo.is_clean()?);

    write(dir.path().join("README.md"), "changed")?;
    assert!(!repo.is_clean()?);
    assert!(matches!(repo.ensure_clean(), Err(GitError::Dirty)));

    Ok(())
}

#[test]
fn local_branches_and_merge_base() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let first = fixture.stage_and_commit("a.txt", "a")?;
    fixture.branch("topic", first)?;
    fixture.branch("topic-2", first)?;
    let second = fixture.stage_and_commit("b.txt", "b")?;

    let repo = GitRepo::discover(dir.path())?;
    assert_eq!(repo.local_branches()?, vec!["main", "topic", "topic-2"]);
    assert_eq!(repo.merge_base("main", "topic")?, first);
    assert_eq!(repo.rev_parse("HEAD")?, second);
    assert!(!repo.resolves("topic-3"));

    Ok(())
}

#[test]
fn increment_without_upstream_branch() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;

    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let first = fixture.stage_and_commit("a.txt", "a")?;
    fixture.branch("topic", first)?;
    fixture.branch("topic-2", first)?;
    fixture.add_remote("origin", &remote)?;

    let repo = GitRepo::discover(dir.path())?;
    let created = increment(&repo, "topic", "origin")?;

    assert_eq!(created, "topic-3");
    assert_eq!(fixture.head_shorthand()?, "topic-3");
    assert_eq!(repo.rev_parse("topic-3")?, first);

    Ok(())
}

#[test]
fn increment_rejects_diverged_upstream() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;
    let theirs = remote.stage_and_commit("theirs.txt", "theirs")?;
    remote.branch("topic", theirs)?;

    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let ours = fixture.stage_and_commit("ours.txt", "ours")?;
    fixture.branch("topic", ours)?;
    fixture.add_remote("origin", &remote)?;

    let repo = GitRepo::discover(dir.path())?;
    let result = increment(&repo, "topic", "origin");
    assert!(matches!(result, Err(GitError::Diverged { branch, .. }) if branch == "topic"));

    Ok(())
}

#[test]
fn increment_requires_base_branch() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;

    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("a.txt", "a")?;
    fixture.add_remote("origin", &remote)?;

    let repo = GitRepo::discover(dir.path())?;
    let result = increment(&repo, "topic", "origin");
    assert!(matches!(result, Err(GitError::BranchMissing { .. })));

    Ok(())
}

#[test]
fn cleanup_dry_run_deletes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let first = fixture.stage_and_commit("a.txt", "a")?;
    fixture.branch("topic", first)?;
    fixture.branch("topic-2", first)?;

    let repo = GitRepo::discover(dir.path())?;
    cleanup(
        &repo,
        CleanupOptions {
            branch: "me:topic".into(),
            remote: "origin".into(),
            onto: Some("main".into()),
            dry_run: true,
        },
    )?;
    assert_eq!(repo.local_branches()?, vec!["main", "topic", "topic-2"]);

    Ok(())
}

#[test]
fn cleanup_reaps_merged_series() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;

    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let first = fixture.stage_and_commit("a.txt", "a")?;
    fixture.branch("topic", first)?;
    fixture.branch("topic-2", first)?;
    fixture.add_remote("origin", &remote)?;
    fixture.push("origin", "main")?;

    let repo = GitRepo::discover(dir.path())?.with_env("GIT_CONFIG_GLOBAL", "/dev/null");
    cleanup(
        &repo,
        CleanupOptions {
            branch: "topic".into(),
            remote: "origin".into(),
            onto: Some("main".into()),
            dry_run: false,
        },
    )?;
    assert_eq!(repo.local_branches()?, vec!["main"]);

    Ok(())
}

#[test]
fn cleanup_keeps_unmerged_branch() -> Result<()> {
    let remote_dir = tempfile::tempdir()?;
    let remote = RepoFixture::new(remote_dir.path(), RepoKind::Bare)?;

    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("a.txt", "a")?;
    fixture.add_remote("origin", &remote)?;
    fixture.push("origin", "main")?;
    let unmerged = fixture.stage_and_commit("b.txt", "b")?;
    fixture.branch("topic", unmerged)?;

    let repo = GitRepo::discover(dir.path())?.with_env("GIT_CONFIG_GLOBAL", "/dev/null");
    let result = cleanup(
        &repo,
        CleanupOptions {
            branch: "topic".into(),
            remote: "origin".into(),
            onto: Some("main".into()),
            dry_run: false,
        },
    );
    assert!(matches!(
        result,
        Err(GitError::StillContained { branch, onto }) if branch == "topic" && onto == "main"
    ));
    assert_eq!(repo.local_branches()?, vec!["main", "topic"]);
    assert_eq!(repo.rev_parse("topic")?, unmerged);

    Ok(())
}

#[test]
fn cleanup_without_victims() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("a.txt", "a")?;

    let repo = GitRepo::discover(dir.path())?;
    let result = cleanup(
        &repo,
        CleanupOptions {
            branch: "topic".into(),
            remote: "origin".into(),
            onto: Some("main".into()),
            dry_run: false,
        },
    );
    assert!(matches!(result, Err(GitError::NoVictims)));

    Ok(())
}

#[test]
fn retime_limits_refs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    fixture.stage_and_commit("a.txt", "a")?;

    let repo = GitRepo::discover(dir.path())?;
    let opts = RetimeOptions {
        dry_run: true,
        remote: "origin".into(),
        onto: Some("main".into()),
        refs: vec!["a".into(), "b".into(), "c".into()],
    };
    let result = retime(&repo, opts, "Sat, 17 Oct 2026 12:00:00 +0000");
    assert!(matches!(result, Err(GitError::TooManyRefs)));

    Ok(())
}

#[test]
fn retime_dry_run_with_explicit_range() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fixture = RepoFixture::new(dir.path(), RepoKind::Normal)?;
    let first = fixture.stage_and_commit("a.txt", "a")?;
    let second = fixture.stage_and_commit("b.txt", "b")?;

    let repo = GitRepo::discover(dir.path())?;
    let opts = RetimeOptions {
        dry_run: true,
        remote: "origin".into(),
        onto: None,
        refs: vec![first.to_string(), "HEAD".into()],
    };
    retime(&repo, opts, "Sat, 17 Oct 2026 12:00:00 +0000")?;
    assert_eq!(repo.rev_parse("HEAD")?, second);

    Ok(())
}
