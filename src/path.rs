// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way. Also home to the few bits of
//! identity information (user name, host name) that several tools stamp into
//! their output.

use std::{env, fs::read_to_string, path::PathBuf};

/// Determine default absolute path to the configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/oddjobs/config.toml`. Does
/// not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("oddjobs").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the build signature cache.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/oddjobs/build-signatures`.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_signature_cache() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("oddjobs").join("build-signatures"))
        .ok_or(NoWayHome)
}

/// Default location of the current user's local mailbox.
pub fn default_mbox() -> PathBuf {
    PathBuf::from("/var/mail").join(current_user())
}

/// Login name of the current user.
///
/// Falls back to "nobody" when neither `$USER` nor `$LOGNAME` is set.
pub fn current_user() -> String {
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "nobody".into())
}

/// Host name of the current machine.
///
/// Falls back to "localhost" when the kernel refuses to tell us.
pub fn hostname() -> String {
    hostname_from(read_to_string("/proc/sys/kernel/hostname").ok())
}

fn hostname_from(raw: Option<String>) -> String {
    raw.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
