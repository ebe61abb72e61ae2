// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process helpers.
//!
//! Nearly every tool in this crate is a thin layer over some other program.
//! These helpers cover the three ways we talk to them: interactively (child
//! inherits our terminal), non-interactively (we collect stdout and treat a
//! non-zero status as failure), and as a plain capture where the caller
//! decides what the exit status means. Callers that need a working directory
//! or extra environment prepare a [`Command`] themselves and hand it over.

use std::{
    env,
    ffi::OsStr,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Captured result of a finished child process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Exit status, or -1 if the child was killed by a signal.
    pub code: i32,

    /// Everything the child wrote to stdout.
    pub stdout: String,

    /// Everything the child wrote to stderr.
    pub stderr: String,
}

impl Outcome {
    /// Child exited with status zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run prepared command with inherited stdio, blocking until it exits.
///
/// # Errors
///
/// - Return [`ProcessError::Spawn`] if command cannot be started.
/// - Return [`ProcessError::Failed`] if command exits unsuccessfully.
pub fn syscall_interactive(cmd: &mut Command) -> Result<()> {
    let status = cmd.status().map_err(|source| ProcessError::Spawn {
        source,
        program: program_of(cmd),
    })?;

    if !status.success() {
        return Err(ProcessError::Failed {
            program: program_of(cmd),
            message: format!("exited with {status}"),
        });
    }

    Ok(())
}

/// Run prepared command, collecting its stdout.
///
/// # Errors
///
/// - Return [`ProcessError::Spawn`] if command cannot be started.
/// - Return [`ProcessError::Failed`] with stderr, or stdout if stderr is
///   empty, if command exits unsuccessfully.
pub fn syscall_non_interactive(cmd: &mut Command) -> Result<String> {
    let outcome = capture_command(cmd)?;
    if !outcome.success() {
        let message = if outcome.stderr.trim().is_empty() {
            outcome.stdout
        } else {
            outcome.stderr
        };

        // INVARIANT: Chomp trailing newlines.
        return Err(ProcessError::Failed {
            program: program_of(cmd),
            message: message.trim_end_matches(['\r', '\n']).to_string(),
        });
    }

    Ok(outcome.stdout)
}

/// Run command capturing its output, regardless of exit status.
///
/// # Errors
///
/// - Return [`ProcessError::Spawn`] if command cannot be started.
pub fn capture(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Outcome> {
    capture_command(Command::new(cmd.as_ref()).args(args))
}

/// Run prepared command capturing its output, regardless of exit status.
///
/// Stdin is always closed.
///
/// # Errors
///
/// - Return [`ProcessError::Spawn`] if command cannot be started.
pub fn capture_command(cmd: &mut Command) -> Result<Outcome> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ProcessError::Spawn {
            source,
            program: program_of(cmd),
        })?;

    Ok(Outcome {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
        stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
    })
}

fn program_of(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Locate an executable program through `$PATH`.
///
/// Program names containing a slash are checked as-is.
pub fn which(program: impl AsRef<str>) -> Option<PathBuf> {
    let program = program.as_ref();
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let search = env::var_os("PATH")?;
    env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Print command about to be executed, prefixed with "+" like `sh -x`.
pub fn echo_command(args: impl IntoIterator<Item = impl AsRef<str>>) {
    println!("+ {}", shell_join(args));
}

/// Join arguments into one line a POSIX shell would split back the same way.
pub fn shell_join(args: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    args.into_iter()
        .map(|arg| shell_quote(arg.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single argument for a POSIX shell if it needs it.
pub fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        return arg.to_string();
    }

    format!("'{}'", arg.replace('\'', r#"'"'"'"#))
}

/// Process management error types.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Program could not be started at all.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Program ran, but exited unsuccessfully.
    #[error("command {program:?} failed:\n{message}")]
    Failed { program: String, message: String },
}

/// Friendly result alias :3
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;
