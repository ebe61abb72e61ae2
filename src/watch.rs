// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! File-change watcher.
//!
//! Scan a set of directories, compare what is there against what was seen on
//! the previous scan, and report every file that was added, modified, or
//! removed in between. Designed to be run from cron, with the report mailed to
//! whoever cares about the watched directories.
//!
//! # Database Layout
//!
//! Previous scan results are kept in a flat text file, one file per line:
//!
//! ```text
//! # hash|path|mtime
//! 5891b5b5...|/mnt/data/photo.jpg|1767225600.000000000
//! |/mnt/data/notes.txt|1767225660.250000000
//! ```
//!
//! The hash column is empty unless content hashing was requested. Blank lines
//! and lines starting with `#` are ignored. The whole file is rewritten after
//! every scan, sorted by path, so the last successful run always wins.

use crate::{hash::sha256_file, mail::Draft};

use glob::Pattern;
use ignore::WalkBuilder;
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::UNIX_EPOCH,
};
use tracing::{debug, instrument, warn};

/// Explanation heading every change report.
pub const REPORT_PREAMBLE: &str = "The following changes have been recorded on your server. + indicates an added file, - a removed file and M a modified file.";

/// What happened to a file since the previous scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Not seen before.
    New,

    /// Seen before, modification time differs.
    Modified,

    /// Seen before, but not during this scan.
    #[default]
    Removed,

    /// Seen before, modification time matches.
    Unchanged,
}

impl FileState {
    /// Report marker for state, if it counts as a change.
    pub fn marker(&self) -> Option<char> {
        match self {
            Self::New => Some('+'),
            Self::Modified => Some('M'),
            Self::Removed => Some('-'),
            Self::Unchanged => None,
        }
    }
}

/// Everything remembered about one watched file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Content hash, empty if unknown.
    pub hash: String,

    /// Modification time as recorded in database.
    pub modified: String,

    /// Classification from the current scan.
    pub state: FileState,
}

/// Table of watched files keyed by path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileTable {
    entries: BTreeMap<PathBuf, FileRecord>,
}

impl FileTable {
    /// Load table from database file.
    ///
    /// A missing database is treated as a first run.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::ReadDatabase`] if database cannot be read.
    /// - Return [`WatchError::MalformedEntry`] if a line is not well formed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => content.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no database at {:?}, first run", path.as_ref().display());
                Ok(Self::default())
            }
            Err(source) => Err(WatchError::ReadDatabase {
                source,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }

    /// Write table back to database file.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::WriteDatabase`] if database cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write(path.as_ref(), self.to_string()).map_err(|source| WatchError::WriteDatabase {
            source,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Look up record of a file.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileRecord> {
        self.entries.get(path.as_ref())
    }

    /// Scan directory tree, updating table with what was found.
    ///
    /// Unreadable directories and files are logged and skipped.
    #[instrument(skip(self, root, scanner), level = "debug")]
    pub fn scan(&mut self, root: impl AsRef<Path>, scanner: &Scanner) {
        let excludes = scanner.exclude.clone();
        let walker = WalkBuilder::new(root.as_ref())
            .standard_filters(false)
            .hidden(true)
            .follow_links(true)
            .filter_entry(move |entry| {
                !excludes
                    .iter()
                    .any(|pattern| pattern.matches_path(entry.path()))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("failed reading from directory {:?}: {err}", root.as_ref().display());
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            let path = entry.path();
            let modified = match modification_time(path) {
                Some(modified) => modified,
                None => {
                    warn!("failed to stat {:?}", path.display());
                    continue;
                }
            };

            self.observe(path, modified, scanner);
        }
    }

    fn observe(&mut self, path: &Path, modified: String, scanner: &Scanner) {
        match self.entries.get_mut(path) {
            Some(record) if record.modified == modified => {
                record.state = FileState::Unchanged;
            }
            Some(record) => {
                record.state = FileState::Modified;
                record.modified = modified;
                record.hash = scanner.hash_of(path);
            }
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    FileRecord {
                        hash: scanner.hash_of(path),
                        modified,
                        state: FileState::New,
                    },
                );
            }
        }
    }

    /// List every change in path order.
    pub fn changes(&self) -> Vec<(char, &Path)> {
        self.entries
            .iter()
            .filter_map(|(path, record)| record.state.marker().map(|mark| (mark, path.as_path())))
            .collect()
    }

    /// Render change report, or nothing if there were no changes.
    pub fn report(&self) -> Option<String> {
        let changes = self.changes();
        if changes.is_empty() {
            return None;
        }

        let mut report = format!("{REPORT_PREAMBLE}\n\n");
        for (mark, path) in changes {
            report.push_str(format!("{mark} {}\n", path.display()).as_str());
        }

        Some(report)
    }

    /// Wrap change report into notification mail, or nothing if unchanged.
    pub fn notification(
        &self,
        from: impl AsRef<str>,
        to: impl IntoIterator<Item = impl Into<String>>,
        subject: impl Into<String>,
    ) -> Option<Draft> {
        let body = self.report()?;
        Some(Draft {
            from: format!("Media Watch <{}>", from.as_ref()),
            to: to.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            body,
            ..Default::default()
        })
    }
}

impl FromStr for FileTable {
    type Err = WatchError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut entries = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // INVARIANT: Hash and mtime never contain '|', but path may.
            let Some((hash, path, modified)) = line
                .split_once('|')
                .and_then(|(hash, rest)| rest.rsplit_once('|').map(|(path, modified)| (hash, path, modified)))
            else {
                return Err(WatchError::MalformedEntry {
                    line: number + 1,
                    entry: line.to_string(),
                });
            };

            // INVARIANT: Every loaded file is presumed removed until seen.
            entries.insert(
                PathBuf::from(path),
                FileRecord {
                    hash: hash.to_string(),
                    modified: modified.to_string(),
                    state: FileState::Removed,
                },
            );
        }

        Ok(Self { entries })
    }
}

impl Display for FileTable {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (path, record) in &self.entries {
            if record.state == FileState::Removed {
                continue;
            }

            writeln!(fmt, "{}|{}|{}", record.hash, path.display(), record.modified)?;
        }

        Ok(())
    }
}

/// Scan options.
#[derive(Debug, Default, Clone)]
pub struct Scanner {
    /// Hash content of new and modified files.
    pub hash: bool,

    /// Skip paths matching any of these patterns.
    pub exclude: Vec<Pattern>,
}

impl Scanner {
    /// Construct new scanner.
    ///
    /// # Errors
    ///
    /// - Return [`WatchError::Pattern`] if an exclude pattern is invalid.
    pub fn new(hash: bool, exclude: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let exclude = exclude
            .into_iter()
            .map(|pattern| Pattern::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { hash, exclude })
    }

    fn hash_of(&self, path: &Path) -> String {
        if !self.hash {
            return String::new();
        }

        // INVARIANT: Unhashable file is not a critical error.
        match sha256_file(path) {
            Ok(hash) => hash,
            Err(err) => {
                warn!("failed to hash {:?}: {err}", path.display());
                String::new()
            }
        }
    }
}

fn modification_time(path: &Path) -> Option<String> {
    let modified = path.metadata().ok()?.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{}.{:09}", since.as_secs(), since.subsec_nanos()))
}

/// File-change watcher error types.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Database exists, but cannot be read.
    #[error("error loading database {:?}", path.display())]
    ReadDatabase {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Database cannot be written.
    #[error("failed to write to database {:?}", path.display())]
    WriteDatabase {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Database line is not `hash|path|mtime`.
    #[error("malformed database entry on line {line}: {entry:?}")]
    MalformedEntry { line: usize, entry: String },

    /// Exclude pattern is not a valid glob.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = WatchError> = std::result::Result<T, E>;
