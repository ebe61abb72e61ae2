// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Minimum viable build system.
//!
//! A tiny make replacement that detects modification by content signature
//! instead of timestamps, and has no built-in recipes at all.
//!
//! # Build File Layout
//!
//! ```json
//! [
//!   {
//!     "target": "hello",
//!     "dependencies": ["hello.o"],
//!     "actions": ["cc -o hello hello.o"]
//!   },
//!   {
//!     "target": "hello.o",
//!     "dependencies": ["${SRC}/hello.c"],
//!     "actions": ["cc -c -o hello.o ${SRC}/hello.c"]
//!   }
//! ]
//! ```
//!
//! The first rule is the default target. Targets and dependencies undergo
//! shell expansion and are resolved against the build file's directory.
//!
//! # Signature Cache
//!
//! The SHA-256 of every dependency seen is kept in a cache file, one
//! `<hex digest> <path>` pair per line. A dependency whose digest differs
//! from the cached one forces its dependents to be rebuilt.

use crate::{hash::sha256_file, process::echo_command};

use mkdirp::mkdirp;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};
use tracing::{debug, instrument};

/// Build file name looked up when none is given.
pub const DEFAULT_BUILD_FILE: &str = "mvbs.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Recipe {
    target: String,
    dependencies: Vec<String>,
    actions: Vec<String>,
}

/// How to produce one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// File the rule produces.
    pub target: PathBuf,

    /// Files that must be up to date before the rule runs.
    pub dependencies: Vec<PathBuf>,

    /// Shell commands that produce the target.
    pub actions: Vec<String>,
}

/// Every rule of a build file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    root: PathBuf,
    default: Option<PathBuf>,
    rules: HashMap<PathBuf, Rule>,
}

impl RuleSet {
    /// Load rule set from build file.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::NoBuildFile`] if build file does not exist.
    /// - Return [`BuildError::Read`] if build file cannot be read.
    /// - Return parse errors of [`RuleSet::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref()).map_err(|source| BuildError::Read {
            source,
            path: path.as_ref().to_path_buf(),
        })?;

        let content = match read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(BuildError::NoBuildFile),
            Err(source) => return Err(BuildError::Read { source, path }),
        };

        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&content, root)
    }

    /// Parse build file content, resolving paths against `root`.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Parse`] if content is not JSON.
    /// - Return [`BuildError::NotAList`] if document is not a list.
    /// - Return [`BuildError::MalformedRecipe`] if a recipe is malformed.
    /// - Return [`BuildError::DuplicateTarget`] if two rules share a target.
    /// - Return [`BuildError::ShellExpansion`] if expansion fails.
    pub fn parse(content: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let Value::Array(items) = serde_json::from_str::<Value>(content)? else {
            return Err(BuildError::NotAList);
        };

        let mut set = Self {
            root,
            default: None,
            rules: HashMap::new(),
        };

        for item in items {
            let recipe: Recipe =
                serde_json::from_value(item.clone()).map_err(|_| BuildError::MalformedRecipe {
                    recipe: item.to_string(),
                })?;

            let rule = Rule {
                target: set.resolve(&recipe.target)?,
                dependencies: recipe
                    .dependencies
                    .iter()
                    .map(|dep| set.resolve(dep))
                    .collect::<Result<Vec<_>>>()?,
                actions: recipe.actions,
            };
            set.add(rule)?;
        }

        Ok(set)
    }

    fn add(&mut self, rule: Rule) -> Result<()> {
        if self.rules.contains_key(&rule.target) {
            return Err(BuildError::DuplicateTarget {
                target: rule.target,
            });
        }

        if self.default.is_none() {
            self.default = Some(rule.target.clone());
        }

        self.rules.insert(rule.target.clone(), rule);
        Ok(())
    }

    /// Expand a path and resolve it against build file directory.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::ShellExpansion`] if a variable is undefined.
    pub fn resolve(&self, path: impl AsRef<str>) -> Result<PathBuf> {
        let expanded = shellexpand::full(path.as_ref())?;
        Ok(self.root.join(expanded.as_ref()))
    }

    /// Target built when none is requested.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::NoRules`] if build file defines no rules.
    pub fn default_target(&self) -> Result<&Path> {
        self.default.as_deref().ok_or(BuildError::NoRules)
    }

    /// Look up rule producing target.
    pub fn rule(&self, target: impl AsRef<Path>) -> Option<&Rule> {
        self.rules.get(target.as_ref())
    }

    /// Bring target up to date.
    ///
    /// Dependencies are built first. The target is rebuilt if it does not
    /// exist, or if any dependency signature differs from the cached one.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::NoRule`] if target has no rule and no file.
    /// - Return [`BuildError::NotBuilt`] if a dependency recipe did not
    ///   produce its file.
    /// - Return [`BuildError::Cycle`] if target depends on itself.
    /// - Return [`BuildError::Failed`] if an action exits unsuccessfully.
    #[instrument(skip(self, target, signatures), level = "debug")]
    pub fn build(
        &self,
        target: impl AsRef<Path>,
        signatures: &mut Signatures,
        verbose: bool,
    ) -> Result<()> {
        let mut stack = Vec::new();
        self.build_inner(target.as_ref(), signatures, verbose, &mut stack)
    }

    fn build_inner(
        &self,
        target: &Path,
        signatures: &mut Signatures,
        verbose: bool,
        stack: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let Some(rule) = self.rules.get(target) else {
            if !target.exists() {
                return Err(BuildError::NoRule {
                    target: target.to_path_buf(),
                });
            }

            if verbose {
                println!("no rule for {}, but file exists", target.display());
            }
            return Ok(());
        };

        if stack.iter().any(|entry| entry == target) {
            return Err(BuildError::Cycle {
                target: target.to_path_buf(),
            });
        }
        stack.push(target.to_path_buf());

        let mut rebuild = !target.exists();
        let mut changed = Vec::new();
        for dependency in &rule.dependencies {
            self.build_inner(dependency, signatures, verbose, stack)?;

            let signature = sha256_file(dependency).map_err(|_| BuildError::NotBuilt {
                target: dependency.clone(),
            })?;

            if signatures.get(dependency) != Some(signature.as_str()) {
                debug!("signature of {:?} changed", dependency.display());
                changed.push((dependency.clone(), signature));
                rebuild = true;
            }
        }

        stack.pop();

        if rebuild {
            // INVARIANT: New signatures are only recorded once the target built.
            self.run(rule, verbose)?;
            for (dependency, signature) in changed {
                signatures.insert(dependency, signature);
            }
        } else if verbose {
            println!("{} does not need to be rebuilt", target.display());
        }

        Ok(())
    }

    fn run(&self, rule: &Rule, verbose: bool) -> Result<()> {
        for action in &rule.actions {
            if verbose {
                echo_command([action]);
            }

            let status = Command::new("sh")
                .arg("-c")
                .arg(action)
                .current_dir(&self.root)
                .status()
                .map_err(|source| BuildError::Spawn {
                    source,
                    action: action.clone(),
                })?;

            if !status.success() {
                return Err(BuildError::Failed {
                    target: rule.target.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Cache of dependency content signatures.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Signatures {
    entries: BTreeMap<PathBuf, String>,
}

impl Signatures {
    /// Load signature cache, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Cache`] if cache exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => Ok(content.parse()?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(BuildError::Cache {
                source,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }

    /// Write signature cache, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Cache`] if cache cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let to_error = |source| BuildError::Cache {
            source,
            path: path.to_path_buf(),
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp(parent).map_err(to_error)?;
        }

        write(path, self.to_string()).map_err(to_error)
    }

    /// Cached signature of a path.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.entries.get(path.as_ref()).map(String::as_str)
    }

    /// Record signature of a path.
    pub fn insert(&mut self, path: PathBuf, signature: String) {
        self.entries.insert(path, signature);
    }
}

impl FromStr for Signatures {
    type Err = std::convert::Infallible;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let entries = content
            .lines()
            .filter_map(|line| line.split_once(' '))
            .map(|(hash, path)| (PathBuf::from(path), hash.to_string()))
            .collect();

        Ok(Self { entries })
    }
}

impl Display for Signatures {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (path, hash) in &self.entries {
            writeln!(fmt, "{hash} {}", path.display())?;
        }

        Ok(())
    }
}

/// Build error types.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No build file at default location.
    #[error("no makefile found")]
    NoBuildFile,

    /// Build file cannot be read.
    #[error("failed to read build file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Build file is not valid JSON.
    #[error("failed to parse build file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Build file is valid JSON, but not a list.
    #[error("build file does not contain a list as expected")]
    NotAList,

    /// Recipe is missing fields or has wrong types.
    #[error("malformed recipe: {recipe}")]
    MalformedRecipe { recipe: String },

    /// Two recipes produce the same target.
    #[error("duplicate rules for target '{}'", target.display())]
    DuplicateTarget { target: PathBuf },

    /// Build file has no recipes at all.
    #[error("no rules defined")]
    NoRules,

    /// Target or dependency could not be expanded.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Nothing produces target, and it does not exist.
    #[error("no rule to build target '{}'", target.display())]
    NoRule { target: PathBuf },

    /// Dependency recipe ran, but file is still missing.
    #[error("recipe for target '{}' did not build it", target.display())]
    NotBuilt { target: PathBuf },

    /// Target depends on itself.
    #[error("dependency cycle through target '{}'", target.display())]
    Cycle { target: PathBuf },

    /// Action could not be started.
    #[error("failed to run action {action:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        action: String,
    },

    /// Action exited unsuccessfully.
    #[error("failed to build {}", target.display())]
    Failed { target: PathBuf },

    /// Signature cache cannot be read or written.
    #[error("failed to access signature cache {:?}", path.display())]
    Cache {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Never happens.
    #[error(transparent)]
    Infallible(#[from] std::convert::Infallible),
}

/// Friendly result alias :3
pub type Result<T, E = BuildError> = std::result::Result<T, E>;
