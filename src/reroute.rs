// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shortcut dispatcher.
//!
//! Window managers all configure key bindings differently, and some only pick
//! up changes after a restart. Bind every key combination to
//! `oddjobs reroute <name>` once, and keep the real commands in the
//! `[shortcuts]` table of the configuration file instead.

use crate::{
    config::Shortcut,
    desktop::{self, Capabilities, DesktopError},
};

use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// What the dispatcher was asked to do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RerouteOptions {
    /// List shortcuts instead of running one.
    pub list: bool,

    /// Shortcut to run.
    pub shortcut: Option<String>,
}

/// One line per shortcut describing what it does.
pub fn listing(shortcuts: &BTreeMap<String, Shortcut>) -> String {
    shortcuts
        .iter()
        .map(|(name, shortcut)| match shortcut {
            Shortcut::Shell(command) => format!("{name} - exec \"{command}\""),
            Shortcut::Exec(argv) => format!("{name} - exec \"{}\"", argv.join(" ")),
            Shortcut::Builtin {
                builtin,
                description,
            } => format!(
                "{name} - {}",
                description.as_deref().unwrap_or(builtin.summary())
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run dispatcher, reporting any failure through capabilities.
///
/// Returns exit status to leave with.
pub fn reroute(
    caps: &impl Capabilities,
    shortcuts: &BTreeMap<String, Shortcut>,
    opts: &RerouteOptions,
) -> i32 {
    match dispatch(caps, shortcuts, opts) {
        Ok(code) => code,
        Err(err) => {
            caps.error(&err.to_string());
            1
        }
    }
}

/// List or run shortcuts.
///
/// # Errors
///
/// - Return [`RerouteError::NoShortcuts`] if nothing is configured.
/// - Return [`RerouteError::NoneSpecified`] if no shortcut was named.
/// - Return [`RerouteError::NotFound`] if named shortcut does not exist.
/// - Return [`RerouteError::Failed`] if shortcut could not be run.
#[instrument(skip(caps, shortcuts), level = "debug")]
pub fn dispatch(
    caps: &impl Capabilities,
    shortcuts: &BTreeMap<String, Shortcut>,
    opts: &RerouteOptions,
) -> Result<i32> {
    if shortcuts.is_empty() {
        return Err(RerouteError::NoShortcuts);
    }

    if opts.list {
        caps.notify(&listing(shortcuts));
        return Ok(0);
    }

    let name = opts.shortcut.as_deref().ok_or(RerouteError::NoneSpecified)?;
    let shortcut = shortcuts.get(name).ok_or_else(|| RerouteError::NotFound {
        name: name.to_string(),
    })?;
    debug!("run shortcut {name}: {shortcut:?}");

    let result = match shortcut {
        Shortcut::Shell(command) => caps.call(&["sh".into(), "-c".into(), command.clone()]),
        Shortcut::Exec(argv) => caps.call(argv),
        Shortcut::Builtin { builtin, .. } => desktop::run_builtin(caps, *builtin).map(|_| 0),
    };

    result.map_err(|source| RerouteError::Failed {
        source,
        name: name.to_string(),
    })
}

/// Shortcut dispatcher error types.
#[derive(Debug, thiserror::Error)]
pub enum RerouteError {
    /// Configuration has no shortcuts.
    #[error("no shortcuts defined")]
    NoShortcuts,

    /// No shortcut was named.
    #[error("no shortcut specified")]
    NoneSpecified,

    /// Named shortcut is not configured.
    #[error("shortcut {name} not found")]
    NotFound { name: String },

    /// Shortcut failed to run.
    #[error("failed to run {name}: {source}")]
    Failed {
        #[source]
        source: DesktopError,
        name: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RerouteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Builtin, desktop::tests::FakeCapabilities};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn shortcuts() -> BTreeMap<String, Shortcut> {
        BTreeMap::from([
            ("meta_l".into(), Shortcut::Shell("xscreensaver-command -lock".into())),
            (
                "meta_p".into(),
                Shortcut::Exec(vec!["gnome-screenshot".into(), "-a".into()]),
            ),
            (
                "meta_u".into(),
                Shortcut::Builtin {
                    builtin: Builtin::ToggleUnclutter,
                    description: None,
                },
            ),
            (
                "meta_w".into(),
                Shortcut::Builtin {
                    builtin: Builtin::WindowManager,
                    description: Some("which wm is this".into()),
                },
            ),
        ])
    }

    #[test]
    fn list_shortcuts() {
        let caps = FakeCapabilities::default();
        let opts = RerouteOptions {
            list: true,
            shortcut: None,
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 0);

        let expect = indoc! {r#"
            meta_l - exec "xscreensaver-command -lock"
            meta_p - exec "gnome-screenshot -a"
            meta_u - toggle unclutter
            meta_w - which wm is this"#};
        assert_eq!(*caps.notified.borrow(), vec![expect]);
    }

    #[test]
    fn shell_shortcut_passes_exit_status() {
        let caps = FakeCapabilities {
            exit_code: 3,
            ..Default::default()
        };
        let opts = RerouteOptions {
            list: false,
            shortcut: Some("meta_l".into()),
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 3);
        assert_eq!(*caps.ran.borrow(), vec!["sh -c xscreensaver-command -lock"]);
    }

    #[test]
    fn exec_shortcut_runs_directly() {
        let caps = FakeCapabilities::default();
        let opts = RerouteOptions {
            list: false,
            shortcut: Some("meta_p".into()),
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 0);
        assert_eq!(*caps.ran.borrow(), vec!["gnome-screenshot -a"]);
    }

    #[test]
    fn builtin_shortcut_runs_builtin() {
        let caps = FakeCapabilities::with_programs(&["unclutter"]);
        let opts = RerouteOptions {
            list: false,
            shortcut: Some("meta_u".into()),
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 0);
        assert_eq!(*caps.notified.borrow(), vec!["unclutter enabled"]);
    }

    #[test]
    fn errors_go_through_capabilities() {
        let caps = FakeCapabilities::default();

        let opts = RerouteOptions::default();
        assert_eq!(reroute(&caps, &BTreeMap::new(), &opts), 1);
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 1);

        let opts = RerouteOptions {
            list: false,
            shortcut: Some("meta_x".into()),
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 1);

        let opts = RerouteOptions {
            list: false,
            shortcut: Some("meta_w".into()),
        };
        assert_eq!(reroute(&caps, &shortcuts(), &opts), 1);

        assert_eq!(
            *caps.errors.borrow(),
            vec![
                "no shortcuts defined",
                "no shortcut specified",
                "shortcut meta_x not found",
                "failed to run meta_w: wmctrl not found",
            ]
        );
    }
}
