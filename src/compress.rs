// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compress a file as small as possible.
//!
//! Every available compressor is run on the file at the same time, and only
//! the smallest result is kept.

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::OsString,
    fs::{metadata, remove_file},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// External compressor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compressor {
    /// Program to run.
    pub program: String,

    /// Arguments placed before the file to compress.
    pub args: Vec<String>,

    /// Extension the compressor appends to its output.
    pub extension: String,
}

impl Compressor {
    /// Compressor that keeps its input and uses maximum compression level.
    pub fn new(program: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["--keep".into(), "-9".into()],
            extension: extension.into(),
        }
    }

    /// Path compressor writes its output to.
    pub fn output_for(&self, path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".");
        name.push(&self.extension);
        PathBuf::from(name)
    }

    async fn run(&self, path: &Path) -> Option<u64> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!("{} exited with {status}", self.program);
                return None;
            }
            Err(err) => {
                warn!("failed to run {}: {err}", self.program);
                return None;
            }
        }

        match metadata(self.output_for(path)) {
            Ok(meta) => Some(meta.len()),
            Err(err) => {
                warn!("{} produced nothing: {err}", self.program);
                None
            }
        }
    }
}

/// Standard set of compressors, in order of preference on a tie.
pub fn default_compressors() -> Vec<Compressor> {
    vec![
        Compressor::new("bzip2", "bz2"),
        Compressor::new("gzip", "gz"),
        Compressor::new("xz", "xz"),
    ]
}

/// Compress file with every compressor, keeping only the smallest output.
///
/// Returns path of the winning output.
///
/// # Errors
///
/// - Return [`CompressError::NotAFile`] if path is not a regular file.
/// - Return [`CompressError::NoWinner`] if every compressor failed.
/// - Return [`CompressError::Remove`] if a losing output cannot be removed.
#[instrument(skip(path, compressors), level = "debug")]
pub async fn compress(path: impl AsRef<Path>, compressors: &[Compressor]) -> Result<PathBuf> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(CompressError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.green} {elapsed_precise} {msg}")?);
    bar.set_message(format!("compressing {}", path.display()));
    bar.enable_steady_tick(Duration::from_millis(100));

    let sizes = join_all(compressors.iter().map(|compressor| compressor.run(path))).await;
    bar.finish_and_clear();

    let Some(winner) = pick_smallest(&sizes) else {
        return Err(CompressError::NoWinner);
    };

    // INVARIANT: Only remove outputs this run produced.
    for (index, (compressor, size)) in compressors.iter().zip(&sizes).enumerate() {
        let output = compressor.output_for(path);
        if index == winner || size.is_none() || !output.exists() {
            continue;
        }

        debug!("remove loser {:?}", output.display());
        remove_file(&output).map_err(|source| CompressError::Remove { source, path: output })?;
    }

    Ok(compressors[winner].output_for(path))
}

/// Index of the smallest known size, earliest one on a tie.
pub fn pick_smallest(sizes: &[Option<u64>]) -> Option<usize> {
    sizes
        .iter()
        .enumerate()
        .filter_map(|(index, size)| size.map(|size| (size, index)))
        .min()
        .map(|(_, index)| index)
}

/// Compression error types.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// Input is not a regular file.
    #[error("{:?} is not a file to compress", path.display())]
    NotAFile { path: PathBuf },

    /// No compressor produced output.
    #[error("every compressor failed")]
    NoWinner,

    /// Losing output cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Progress template is invalid.
    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = CompressError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::fs::write;

    fn fake(content: &str, extension: &str) -> Compressor {
        Compressor {
            program: "sh".into(),
            args: vec!["-c".into(), format!("printf '{content}' > \"$0.{extension}\"")],
            extension: extension.into(),
        }
    }

    #[test_case(&[Some(30), Some(10), Some(20)], Some(1); "smallest wins")]
    #[test_case(&[Some(10), Some(10), Some(20)], Some(0); "tie goes to earlier")]
    #[test_case(&[None, Some(50), None], Some(1); "failures skipped")]
    #[test_case(&[None, None], None; "nothing worked")]
    #[test]
    fn choose_smallest(sizes: &[Option<u64>], expect: Option<usize>) {
        pretty_assertions::assert_eq!(pick_smallest(sizes), expect);
    }

    #[tokio::test]
    async fn keeps_only_smallest_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.txt");
        write(&path, "plain data")?;

        let compressors = [fake("xxxxxx", "big"), fake("xx", "small"), fake("xxxx", "mid")];
        let winner = compress(&path, &compressors).await?;

        assert_eq!(winner, dir.path().join("data.txt.small"));
        assert!(winner.exists());
        assert!(path.exists());
        assert!(!dir.path().join("data.txt.big").exists());
        assert!(!dir.path().join("data.txt.mid").exists());

        Ok(())
    }

    #[tokio::test]
    async fn failing_compressor_is_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.txt");
        write(&path, "plain data")?;

        let broken = Compressor {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 1".into()],
            extension: "broken".into(),
        };
        let winner = compress(&path, &[broken, fake("xxx", "ok")]).await?;
        assert_eq!(winner, dir.path().join("data.txt.ok"));

        Ok(())
    }

    #[tokio::test]
    async fn failed_compressor_leaves_existing_output_alone() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.txt");
        write(&path, "plain data")?;
        let previous = dir.path().join("data.txt.gz");
        write(&previous, "archive from last week")?;

        let refusing = Compressor {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 2".into()],
            extension: "gz".into(),
        };
        let winner = compress(&path, &[refusing, fake("xxx", "ok")]).await?;

        assert_eq!(winner, dir.path().join("data.txt.ok"));
        assert!(previous.exists());

        Ok(())
    }

    #[tokio::test]
    async fn rejects_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = compress(dir.path(), &default_compressors()).await;
        assert!(matches!(result, Err(CompressError::NotAFile { .. })));
        Ok(())
    }
}
