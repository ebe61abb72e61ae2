// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that oddjobs uses to simplify
//! the process of serialization and deserialization. Aside from
//! [`Settings::load`], file I/O is left to the caller to figure out.
//!
//! # General Layout
//!
//! ```toml
//! [smtp]
//! server = "mail.example.com"
//! port = 587
//! tls = true
//! login = "me"
//! password = "$SMTP_PASSWORD"
//! from = "me@example.com"
//!
//! [shortcuts]
//! meta_l = "gnome-screensaver-command --lock"
//! meta_v = ["gnome-screenshot", "-a"]
//! meta_s = { builtin = "toggle-screensaver", description = "toggle screensaver" }
//!
//! [typist.translations]
//! "->" = "→"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Top-level configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Default SMTP settings for tools that send mail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,

    /// Shortcut table for the dispatcher.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub shortcuts: BTreeMap<String, Shortcut>,

    /// Typing assistant translations.
    #[serde(default)]
    pub typist: TypistSettings,
}

impl Settings {
    /// Load settings from configuration file.
    ///
    /// A missing configuration file yields the default settings.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no configuration at {:?}", path.as_ref().display());
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on credentials.
        if let Some(smtp) = settings.smtp.as_mut() {
            smtp.login = smtp.login.take().map(expand).transpose()?;
            smtp.password = smtp.password.take().map(expand).transpose()?;
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(value: String) -> Result<String> {
    Ok(shellexpand::full(value.as_str())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned())
}

/// SMTP connection settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SmtpSettings {
    /// SMTP server to send through.
    pub server: String,

    /// Port of SMTP server.
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Upgrade connection with STARTTLS.
    #[serde(default)]
    pub tls: bool,

    /// Login name if authentication is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    /// Password if authentication is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Default sender address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl SmtpSettings {
    /// Construct plain SMTP settings for a server on the standard port.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: default_smtp_port(),
            tls: false,
            login: None,
            password: None,
            from: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    25
}

/// A shortcut the dispatcher knows how to run.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Shortcut {
    /// Command line executed through a shell.
    Shell(String),

    /// Argument vector executed directly.
    Exec(Vec<String>),

    /// Behaviour implemented by oddjobs itself.
    Builtin {
        builtin: Builtin,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// Built in shortcut behaviour.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Builtin {
    ToggleScreensaver,
    ToggleUnclutter,
    UnmountMedia,
    WindowManager,
}

impl Builtin {
    /// Default one-line description used when listing shortcuts.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::ToggleScreensaver => "toggle screensaver",
            Self::ToggleUnclutter => "toggle unclutter",
            Self::UnmountMedia => "unmount all user drives currently mounted",
            Self::WindowManager => "show current window manager",
        }
    }
}

/// Typing assistant settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TypistSettings {
    /// Mapping of typed ASCII sequences to the text that replaces them.
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file exists, but cannot be read.
    #[error("failed to read configuration at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
