// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Quick and dirty C undefined behaviour finder.
//!
//! Lines of C and C++ sources are matched against a few regular expressions
//! for idioms that commonly invoke undefined behaviour. There is no parsing
//! involved whatsoever, so expect plenty of false positives. Run it on a small
//! code base, or pipe it through `wc -l` on a large one for a coarse measure
//! of how worried to be.

use glob::Pattern;
use ignore::WalkBuilder;
use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Single suspicious line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// File the line belongs to.
    pub path: PathBuf,

    /// One-based line number.
    pub line: usize,

    /// Source line as written.
    pub source: String,

    /// What looks wrong about it.
    pub message: String,
}

impl Display for Finding {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{}:{}: {}", self.path.display(), self.line, self.source)?;
        write!(fmt, " {}", self.message)
    }
}

/// Line scanner holding the compiled patterns.
#[derive(Debug, Clone)]
pub struct Linter {
    undefined_shift: Regex,
    negate_self: Regex,
    modify_twice: Regex,
    sources: Vec<Pattern>,
}

impl Linter {
    /// Compile patterns.
    ///
    /// # Errors
    ///
    /// - Return [`CubError::Regex`] if a pattern fails to compile.
    /// - Return [`CubError::Pattern`] if a source glob fails to compile.
    pub fn new() -> Result<Self> {
        let sources = ["*.c", "*.cpp", "*.h", "*.hpp"]
            .into_iter()
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            undefined_shift: Regex::new(r"[^\d]1\s*<<\s*(\d+)")?,
            negate_self: Regex::new(r"([a-zA-Z_]\w*)\s*=\s*-\s*([a-zA-Z_]\w*)")?,
            modify_twice: Regex::new(concat!(
                r"\[\s*(?P<pre1>\+\+|--)?\s*(?P<id1>[a-zA-Z_]\w*)\s*(?P<post1>\+\+|--)?\s*\]",
                r"\s*=\s*(?P<pre2>\+\+|--)?\s*(?P<id2>[a-zA-Z_]\w*)\s*(?P<post2>\+\+|--)?",
            ))?,
            sources,
        })
    }

    /// Check one line, returning a message per suspicious idiom found.
    pub fn check_line(&self, line: &str) -> Vec<String> {
        let mut messages = Vec::new();

        if let Some(caps) = self.undefined_shift.captures(line) {
            // INVARIANT: Operand too large for u32 is definitely past sign bit.
            let operand = caps[1].parse::<u32>().unwrap_or(u32::MAX);
            if operand >= 31 {
                messages.push("potential undefined left shift".to_string());
            }
        }

        if let Some(caps) = self.negate_self.captures(line) {
            if caps[1] == caps[2] {
                messages.push("potential negation of INT_MIN".to_string());
            }
        }

        if let Some(caps) = self.modify_twice.captures(line) {
            let modified = ["pre1", "post1", "pre2", "post2"]
                .iter()
                .any(|name| caps.name(name).is_some());
            if modified && caps["id1"] == caps["id2"] {
                messages.push(format!(
                    "potential duplicate modification of {} within a sequence point",
                    &caps["id1"]
                ));
            }
        }

        messages
    }

    /// Scan every line of a file.
    ///
    /// # Errors
    ///
    /// - Return [`CubError::Read`] if file cannot be read.
    pub fn scan_file(&self, path: impl AsRef<Path>) -> Result<Vec<Finding>> {
        let path = path.as_ref();
        let bytes = read(path).map_err(|source| CubError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        let content = String::from_utf8_lossy(&bytes);

        let mut findings = Vec::new();
        for (number, line) in content.lines().enumerate() {
            for message in self.check_line(line) {
                findings.push(Finding {
                    path: path.to_path_buf(),
                    line: number + 1,
                    source: line.to_string(),
                    message,
                });
            }
        }

        Ok(findings)
    }

    /// Scan a file, or every C and C++ source below a directory.
    ///
    /// # Errors
    ///
    /// - Return [`CubError::Missing`] if path is neither file nor directory.
    /// - Return [`CubError::Read`] if a file given directly cannot be read.
    pub fn scan(&self, path: impl AsRef<Path>) -> Result<Vec<Finding>> {
        let path = path.as_ref();
        if path.is_file() {
            return self.scan_file(path);
        }

        if !path.is_dir() {
            return Err(CubError::Missing {
                path: path.to_path_buf(),
            });
        }

        let mut findings = Vec::new();
        let walker = WalkBuilder::new(path).standard_filters(false).build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("{err}");
                    continue;
                }
            };

            let is_source = entry.file_type().is_some_and(|kind| kind.is_file())
                && self
                    .sources
                    .iter()
                    .any(|pattern| pattern.matches(&entry.file_name().to_string_lossy()));
            if !is_source {
                continue;
            }

            debug!("scan {:?}", entry.path().display());
            match self.scan_file(entry.path()) {
                Ok(found) => findings.extend(found),
                Err(err) => warn!("{err}"),
            }
        }

        Ok(findings)
    }
}

/// Undefined behaviour finder error types.
#[derive(Debug, thiserror::Error)]
pub enum CubError {
    /// Path to scan does not exist.
    #[error("{} does not exist", path.display())]
    Missing { path: PathBuf },

    /// Source file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Pattern failed to compile.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Source glob failed to compile.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = CubError> = std::result::Result<T, E>;
