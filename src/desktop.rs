// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop session helpers.
//!
//! Everything in here can be invoked from a window manager key binding, where
//! there is no terminal to print to. Output and errors therefore go through
//! [`Capabilities`], which decides whether to print or to raise a desktop
//! notification. The same table gives tests a seam to fake the outside world.

pub mod typist;

use crate::{
    config::Builtin,
    path::current_user,
    process::{self, Outcome, ProcessError},
};

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fs::{read_dir, read_to_string},
    io::IsTerminal,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, instrument, warn};

/// Application name used for desktop notifications.
pub const APP_NAME: &str = "oddjobs";

/// Operations desktop helpers are allowed to perform.
pub trait Capabilities {
    /// Run program, capturing its output.
    fn run(&self, argv: &[&str]) -> Result<Outcome>;

    /// Run program with inherited stdio, returning its exit status.
    fn call(&self, argv: &[String]) -> Result<i32>;

    /// Start program in the background without waiting for it.
    fn spawn(&self, argv: &[&str]) -> Result<()>;

    /// Locate program through `$PATH`.
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Tell user something.
    fn notify(&self, message: &str);

    /// Tell user something went wrong.
    fn error(&self, message: &str);

    /// Process ids of every process with given name.
    fn ps(&self, name: &str) -> Vec<u32>;

    /// Ask process to terminate.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Content of the system mount table.
    fn mounts(&self) -> Result<String>;
}

/// Capabilities backed by the running system.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemCapabilities {
    /// Force terminal output on or off, otherwise detect it.
    pub tty: Option<bool>,
}

impl SystemCapabilities {
    /// Construct new system capabilities.
    pub fn new(tty: Option<bool>) -> Self {
        Self { tty }
    }

    fn desktop_notify(&self, message: &str, critical: bool) -> bool {
        let mut args = vec![];
        if critical {
            args.push("--urgency=critical");
        }
        args.extend([APP_NAME, message]);

        match process::capture("notify-send", &args) {
            Ok(outcome) if outcome.success() => true,
            Ok(outcome) => {
                warn!("notify-send failed: {}", outcome.stderr.trim_end());
                false
            }
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }
}

impl Capabilities for SystemCapabilities {
    fn run(&self, argv: &[&str]) -> Result<Outcome> {
        let (program, args) = argv.split_first().ok_or(DesktopError::EmptyCommand)?;
        Ok(process::capture(program, args)?)
    }

    fn call(&self, argv: &[String]) -> Result<i32> {
        let (program, args) = argv.split_first().ok_or(DesktopError::EmptyCommand)?;
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| ProcessError::Spawn {
                source,
                program: program.clone(),
            })?;

        Ok(status.code().unwrap_or(1))
    }

    fn spawn(&self, argv: &[&str]) -> Result<()> {
        let (program, args) = argv.split_first().ok_or(DesktopError::EmptyCommand)?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                source,
                program: program.to_string(),
            })?;

        Ok(())
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        process::which(program)
    }

    fn notify(&self, message: &str) {
        if self.tty.unwrap_or_else(|| std::io::stdout().is_terminal())
            || !self.desktop_notify(message, false)
        {
            println!("{message}");
        }
    }

    fn error(&self, message: &str) {
        if self.tty.unwrap_or_else(|| std::io::stderr().is_terminal())
            || !self.desktop_notify(message, true)
        {
            eprintln!("{message}");
        }
    }

    fn ps(&self, name: &str) -> Vec<u32> {
        let Ok(entries) = read_dir("/proc") else {
            return Vec::new();
        };

        let mut pids = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
                let comm = read_to_string(entry.path().join("comm")).ok()?;
                (comm.trim_end() == name).then_some(pid)
            })
            .collect::<Vec<_>>();
        pids.sort_unstable();
        pids
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|errno| DesktopError::Terminate {
            source: errno.into(),
            pid,
        })
    }

    fn mounts(&self) -> Result<String> {
        read_to_string("/proc/mounts").map_err(DesktopError::MountTable)
    }
}

/// Run a built in shortcut.
///
/// # Errors
///
/// - Return [`DesktopError`] variants of the builtin that was run.
pub fn run_builtin(caps: &impl Capabilities, builtin: Builtin) -> Result<()> {
    match builtin {
        Builtin::ToggleScreensaver => toggle_screensaver(caps),
        Builtin::ToggleUnclutter => toggle_unclutter(caps),
        Builtin::UnmountMedia => unmount_media(caps, current_user()),
        Builtin::WindowManager => {
            caps.notify(&detect_window_manager(caps)?);
            Ok(())
        }
    }
}

fn require(caps: &impl Capabilities, tool: &'static str) -> Result<()> {
    if caps.which(tool).is_none() {
        return Err(DesktopError::MissingTool { tool });
    }

    Ok(())
}

/// Name of the running window manager.
///
/// # Errors
///
/// - Return [`DesktopError::MissingTool`] if wmctrl is not installed.
/// - Return [`DesktopError::UnknownWindowManager`] if wmctrl reports no name.
#[instrument(skip(caps), level = "debug")]
pub fn detect_window_manager(caps: &impl Capabilities) -> Result<String> {
    require(caps, "wmctrl")?;
    let outcome = caps.run(&["wmctrl", "-m"])?;

    outcome
        .stdout
        .lines()
        .find_map(|line| line.strip_prefix("Name:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or(DesktopError::UnknownWindowManager {
            name: "<unknown>".into(),
        })
}

/// Turn screensaver off if it is on, and on if it is off.
///
/// # Errors
///
/// - Return [`DesktopError::MissingTool`] if gsettings is not installed.
/// - Return [`DesktopError::UnknownWindowManager`] if window manager has no
///   known screensaver setting.
/// - Return [`DesktopError::Setting`] if setting cannot be changed.
#[instrument(skip(caps), level = "debug")]
pub fn toggle_screensaver(caps: &impl Capabilities) -> Result<()> {
    require(caps, "gsettings")?;
    let wm = detect_window_manager(caps)?;
    debug!("window manager is {wm:?}");

    let (schema, key, enable, disable) = match wm.as_str() {
        "Mutter (Muffin)" => ("org.cinnamon.desktop.session", "idle-delay", "300", "0"),
        "Metacity" | "Compiz" => (
            "org.gnome.desktop.screensaver",
            "idle-activation-enabled",
            "true",
            "false",
        ),
        _ => return Err(DesktopError::UnknownWindowManager { name: wm }),
    };

    let current = caps.run(&["gsettings", "get", schema, key])?;
    let current = current.stdout.trim();
    let disabled = current == disable || current == format!("uint32 {disable}");
    let (value, message) = if disabled {
        (enable, "screensaver enabled")
    } else {
        (disable, "screensaver disabled")
    };

    let outcome = caps.run(&["gsettings", "set", schema, key, value])?;
    if !outcome.success() || !outcome.stderr.is_empty() {
        return Err(DesktopError::Setting {
            key: format!("{schema} {key}"),
            message: outcome.stderr.trim_end().to_string(),
        });
    }

    caps.notify(message);
    Ok(())
}

/// Stop unclutter if it runs, start it otherwise.
///
/// # Errors
///
/// - Return [`DesktopError::MissingTool`] if unclutter must be started, but
///   is not installed.
/// - Return [`DesktopError::Terminate`] if a running instance cannot be
///   stopped.
#[instrument(skip(caps), level = "debug")]
pub fn toggle_unclutter(caps: &impl Capabilities) -> Result<()> {
    let running = caps.ps("unclutter");
    if !running.is_empty() {
        for pid in running {
            caps.terminate(pid)?;
        }
        caps.notify("unclutter disabled");
        return Ok(());
    }

    require(caps, "unclutter")?;
    caps.spawn(&["unclutter"])?;
    caps.notify("unclutter enabled");
    Ok(())
}

/// Unmount every removable drive mounted for user.
///
/// # Errors
///
/// - Return [`DesktopError::MountTable`] if mount table cannot be read.
/// - Return [`DesktopError::Unmount`] if any drive failed to unmount.
#[instrument(skip(caps, user), level = "debug")]
pub fn unmount_media(caps: &impl Capabilities, user: impl AsRef<str>) -> Result<()> {
    let prefix = format!("/media/{}/", user.as_ref());
    let points = mount_points_under(&caps.mounts()?, &prefix);
    if points.is_empty() {
        caps.notify("nothing to unmount");
        return Ok(());
    }

    let mut unmounted = Vec::new();
    let mut failed = Vec::new();
    for point in points {
        match caps.run(&["umount", point.as_str()]) {
            Ok(outcome) if outcome.success() => unmounted.push(point),
            Ok(outcome) => {
                warn!("umount {point}: {}", outcome.stderr.trim_end());
                failed.push(point);
            }
            Err(err) => {
                warn!("umount {point}: {err}");
                failed.push(point);
            }
        }
    }

    if !unmounted.is_empty() {
        caps.notify(&format!("unmounted {}", unmounted.join(", ")));
    }

    if !failed.is_empty() {
        return Err(DesktopError::Unmount {
            points: failed.join(", "),
        });
    }

    Ok(())
}

/// Mount points in mount table below prefix.
pub fn mount_points_under(table: &str, prefix: &str) -> Vec<String> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_field)
        .filter(|point| point.starts_with(prefix))
        .collect()
}

// INVARIANT: Mount table escapes whitespace and backslash as `\ooo` octal.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        let octal = bytes.get(index + 1..index + 4).filter(|digits| {
            bytes[index] == b'\\' && digits.iter().all(|digit| (b'0'..=b'7').contains(digit))
        });

        match octal {
            Some(digits) => {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, digit| acc * 8 + u32::from(digit - b'0'));
                out.push(value as u8);
                index += 4;
            }
            None => {
                out.push(bytes[index]);
                index += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Desktop helper error types.
#[derive(Debug, thiserror::Error)]
pub enum DesktopError {
    /// Required program is not installed.
    #[error("{tool} not found")]
    MissingTool { tool: &'static str },

    /// Window manager is not one we know how to handle.
    #[error("unknown window manager {name}")]
    UnknownWindowManager { name: String },

    /// Setting could not be changed.
    #[error("failed to set {key}: {message}")]
    Setting { key: String, message: String },

    /// Process could not be terminated.
    #[error("failed to terminate process {pid}")]
    Terminate {
        #[source]
        source: std::io::Error,
        pid: u32,
    },

    /// Mount table could not be read.
    #[error("failed to read mount table")]
    MountTable(#[source] std::io::Error),

    /// Some drives stayed mounted.
    #[error("failed to unmount {points}")]
    Unmount { points: String },

    /// Command has no program to run.
    #[error("empty command")]
    EmptyCommand,

    /// External program failed to start.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Friendly result alias :3
pub type Result<T, E = DesktopError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{
        cell::RefCell,
        collections::{BTreeMap, BTreeSet},
    };

    /// Scripted stand-in for the outside world.
    #[derive(Debug, Default)]
    pub(crate) struct FakeCapabilities {
        pub(crate) programs: BTreeSet<String>,
        pub(crate) responses: BTreeMap<String, Outcome>,
        pub(crate) processes: BTreeMap<String, Vec<u32>>,
        pub(crate) mount_table: String,
        pub(crate) exit_code: i32,
        pub(crate) ran: RefCell<Vec<String>>,
        pub(crate) notified: RefCell<Vec<String>>,
        pub(crate) errors: RefCell<Vec<String>>,
        pub(crate) terminated: RefCell<Vec<u32>>,
    }

    impl FakeCapabilities {
        pub(crate) fn with_programs(programs: &[&str]) -> Self {
            Self {
                programs: programs.iter().map(ToString::to_string).collect(),
                ..Default::default()
            }
        }

        pub(crate) fn respond(mut self, command: &str, stdout: &str, stderr: &str, code: i32) -> Self {
            self.responses.insert(
                command.into(),
                Outcome {
                    code,
                    stdout: stdout.into(),
                    stderr: stderr.into(),
                },
            );
            self
        }

        fn record(&self, command: String) -> Outcome {
            let outcome = self.responses.get(&command).cloned().unwrap_or_default();
            self.ran.borrow_mut().push(command);
            outcome
        }
    }

    impl Capabilities for FakeCapabilities {
        fn run(&self, argv: &[&str]) -> Result<Outcome> {
            Ok(self.record(argv.join(" ")))
        }

        fn call(&self, argv: &[String]) -> Result<i32> {
            self.record(argv.join(" "));
            Ok(self.exit_code)
        }

        fn spawn(&self, argv: &[&str]) -> Result<()> {
            self.record(format!("spawn {}", argv.join(" ")));
            Ok(())
        }

        fn which(&self, program: &str) -> Option<PathBuf> {
            self.programs
                .contains(program)
                .then(|| PathBuf::from("/usr/bin").join(program))
        }

        fn notify(&self, message: &str) {
            self.notified.borrow_mut().push(message.into());
        }

        fn error(&self, message: &str) {
            self.errors.borrow_mut().push(message.into());
        }

        fn ps(&self, name: &str) -> Vec<u32> {
            self.processes.get(name).cloned().unwrap_or_default()
        }

        fn terminate(&self, pid: u32) -> Result<()> {
            self.terminated.borrow_mut().push(pid);
            Ok(())
        }

        fn mounts(&self) -> Result<String> {
            Ok(self.mount_table.clone())
        }
    }

    #[test]
    fn detect_wm_from_wmctrl() -> anyhow::Result<()> {
        let caps = FakeCapabilities::with_programs(&["wmctrl"]).respond(
            "wmctrl -m",
            "Name: Mutter (Muffin)\nClass: N/A\nPID: N/A\n",
            "",
            0,
        );
        assert_eq!(detect_window_manager(&caps)?, "Mutter (Muffin)");
        Ok(())
    }

    #[test]
    fn detect_wm_requires_wmctrl() {
        let caps = FakeCapabilities::default();
        let result = detect_window_manager(&caps);
        assert!(matches!(result, Err(DesktopError::MissingTool { tool: "wmctrl" })));
    }

    #[test]
    fn cinnamon_screensaver_toggles_idle_delay() -> anyhow::Result<()> {
        let caps = FakeCapabilities::with_programs(&["wmctrl", "gsettings"])
            .respond("wmctrl -m", "Name: Mutter (Muffin)\n", "", 0)
            .respond(
                "gsettings get org.cinnamon.desktop.session idle-delay",
                "uint32 0\n",
                "",
                0,
            );
        toggle_screensaver(&caps)?;

        assert_eq!(
            caps.ran.borrow().last().map(String::as_str),
            Some("gsettings set org.cinnamon.desktop.session idle-delay 300")
        );
        assert_eq!(*caps.notified.borrow(), vec!["screensaver enabled"]);
        Ok(())
    }

    #[test]
    fn gnome_screensaver_disables_when_enabled() -> anyhow::Result<()> {
        let caps = FakeCapabilities::with_programs(&["wmctrl", "gsettings"])
            .respond("wmctrl -m", "Name: Compiz\n", "", 0)
            .respond(
                "gsettings get org.gnome.desktop.screensaver idle-activation-enabled",
                "true\n",
                "",
                0,
            );
        toggle_screensaver(&caps)?;

        assert_eq!(
            caps.ran.borrow().last().map(String::as_str),
            Some("gsettings set org.gnome.desktop.screensaver idle-activation-enabled false")
        );
        assert_eq!(*caps.notified.borrow(), vec!["screensaver disabled"]);
        Ok(())
    }

    #[test]
    fn screensaver_set_with_stderr_fails() {
        let caps = FakeCapabilities::with_programs(&["wmctrl", "gsettings"])
            .respond("wmctrl -m", "Name: Metacity\n", "", 0)
            .respond(
                "gsettings set org.gnome.desktop.screensaver idle-activation-enabled false",
                "",
                "No such schema\n",
                0,
            );
        let result = toggle_screensaver(&caps);
        assert!(matches!(result, Err(DesktopError::Setting { .. })));
        assert!(caps.notified.borrow().is_empty());
    }

    #[test]
    fn screensaver_unknown_wm() {
        let caps = FakeCapabilities::with_programs(&["wmctrl", "gsettings"])
            .respond("wmctrl -m", "Name: i3\n", "", 0);
        let result = toggle_screensaver(&caps);
        assert!(matches!(result, Err(DesktopError::UnknownWindowManager { name }) if name == "i3"));
    }

    #[test]
    fn unclutter_stops_running_instances() -> anyhow::Result<()> {
        let mut caps = FakeCapabilities::default();
        caps.processes.insert("unclutter".into(), vec![41, 42]);
        toggle_unclutter(&caps)?;

        assert_eq!(*caps.terminated.borrow(), vec![41, 42]);
        assert_eq!(*caps.notified.borrow(), vec!["unclutter disabled"]);
        Ok(())
    }

    #[test]
    fn unclutter_starts_when_stopped() -> anyhow::Result<()> {
        let caps = FakeCapabilities::with_programs(&["unclutter"]);
        toggle_unclutter(&caps)?;

        assert_eq!(*caps.ran.borrow(), vec!["spawn unclutter"]);
        assert_eq!(*caps.notified.borrow(), vec!["unclutter enabled"]);
        Ok(())
    }

    const MOUNTS: &str = indoc! {r"
        /dev/sda1 / ext4 rw,relatime 0 0
        /dev/sdb1 /media/alice/USB\040STICK vfat rw 0 0
        /dev/sdc1 /media/alice/backup ext4 rw 0 0
        /dev/sdd1 /media/bob/stuff ext4 rw 0 0
    "};

    #[test]
    fn mount_points_are_unescaped() {
        assert_eq!(
            mount_points_under(MOUNTS, "/media/alice/"),
            vec!["/media/alice/USB STICK", "/media/alice/backup"]
        );
    }

    #[test]
    fn unmount_reports_failures() {
        let mut caps = FakeCapabilities::default()
            .respond("umount /media/alice/USB STICK", "", "", 0)
            .respond("umount /media/alice/backup", "", "target is busy\n", 32);
        caps.mount_table = MOUNTS.into();

        let result = unmount_media(&caps, "alice");
        assert!(matches!(result, Err(DesktopError::Unmount { points }) if points == "/media/alice/backup"));
        assert_eq!(*caps.notified.borrow(), vec!["unmounted /media/alice/USB STICK"]);
    }

    #[test]
    fn unmount_nothing_mounted() -> anyhow::Result<()> {
        let caps = FakeCapabilities::default();
        unmount_media(&caps, "alice")?;
        assert_eq!(*caps.notified.borrow(), vec!["nothing to unmount"]);
        Ok(())
    }
}
