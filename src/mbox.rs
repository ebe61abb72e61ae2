// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local mbox mailbox handling.
//!
//! An __mbox__ is a single text file holding every message of a mailbox back
//! to back. Each message starts with an envelope line beginning with `From `
//! (note the space, no colon), which must either open the file or follow a
//! blank line. Lines inside a message body that would be confused for an
//! envelope line are expected to be quoted as `>From ` by whoever wrote the
//! mailbox.
//!
//! # Locking
//!
//! Mail delivery agents coordinate with mail readers through __dot-locking__:
//! whoever manages to exclusively create `<mbox>.lock` owns the mailbox until
//! that file is removed again. [`Mailbox::lock`] follows that convention, and
//! releases the lock when the returned guard is dropped.
//!
//! # See Also
//!
//! - [mbox(5)](https://man.archlinux.org/man/mbox.5)

use std::{
    fs::{read_to_string, remove_file, write, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Mailbox loaded from an mbox file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    path: PathBuf,
    messages: Vec<MboxMessage>,
}

impl Mailbox {
    /// Open and parse mbox file.
    ///
    /// # Errors
    ///
    /// - Return [`MboxError::Read`] if mailbox cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = read_content(&path)?;

        Ok(Self {
            messages: parse_messages(&content),
            path,
        })
    }

    /// Path to mbox file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Messages currently held in mailbox.
    pub fn messages(&self) -> &[MboxMessage] {
        self.messages.as_slice()
    }

    /// Number of messages currently held in mailbox.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Mailbox holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove the first `count` messages from mailbox.
    ///
    /// Only affects the in-memory copy until [`Mailbox::flush`] is called.
    pub fn remove_front(&mut self, count: usize) {
        let count = count.min(self.messages.len());
        self.messages.drain(..count);
    }

    /// Take dot-lock on mailbox, then re-read it.
    ///
    /// Whatever was delivered since the mailbox was opened becomes part of the
    /// in-memory copy, so a later [`Mailbox::flush`] cannot drop it.
    ///
    /// # Errors
    ///
    /// - Return [`MboxError::Locked`] if someone else holds the lock.
    /// - Return [`MboxError::Lock`] if lock file cannot be created.
    /// - Return [`MboxError::Read`] if mailbox cannot be re-read.
    pub fn lock(&mut self) -> Result<MailboxLock> {
        let lock_path = lock_path(&self.path);
        let guard = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(_) => MailboxLock { lock_path },
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(MboxError::Locked { lock_path });
            }
            Err(source) => return Err(MboxError::Lock { source, lock_path }),
        };
        debug!("locked {:?}", self.path.display());

        // INVARIANT: Messages are only trusted once read under the lock.
        self.messages = parse_messages(&read_content(&self.path)?);

        Ok(guard)
    }

    /// Write remaining messages back into mbox file.
    ///
    /// # Errors
    ///
    /// - Return [`MboxError::Write`] if mailbox cannot be written.
    pub fn flush(&self) -> Result<()> {
        let content = self
            .messages
            .iter()
            .map(MboxMessage::to_mbox)
            .collect::<String>();

        write(&self.path, content).map_err(|source| MboxError::Write {
            source,
            path: self.path.clone(),
        })
    }
}

fn read_content(path: &Path) -> Result<String> {
    read_to_string(path).map_err(|source| MboxError::Read {
        source,
        path: path.to_path_buf(),
    })
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Held dot-lock on a mailbox, released on drop.
#[derive(Debug)]
pub struct MailboxLock {
    lock_path: PathBuf,
}

impl Drop for MailboxLock {
    fn drop(&mut self) {
        if let Err(err) = remove_file(&self.lock_path) {
            warn!("failed to release {:?}: {err}", self.lock_path.display());
        }
    }
}

/// Single message of an mbox file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MboxMessage {
    envelope: String,
    raw: String,
}

impl MboxMessage {
    /// Envelope line, without the leading `From `.
    pub fn envelope(&self) -> &str {
        self.envelope.as_str()
    }

    /// Full message text, headers and body.
    pub fn raw(&self) -> &str {
        self.raw.as_str()
    }

    /// Look up header value by case-insensitive name.
    ///
    /// Folded header lines are joined back into one value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<String> {
        let name = name.as_ref();
        let mut value: Option<String> = None;
        let mut found = false;

        for line in self.raw.lines() {
            if line.is_empty() {
                break;
            }

            // INVARIANT: Continuation lines start with whitespace.
            if line.starts_with([' ', '\t']) {
                if found {
                    if let Some(value) = value.as_mut() {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                }
                continue;
            }

            if found {
                break;
            }

            if let Some((key, rest)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    found = true;
                    value = Some(rest.trim().to_string());
                }
            }
        }

        value
    }

    /// Subject of message, if any.
    pub fn subject(&self) -> Option<String> {
        self.header("Subject")
    }

    fn to_mbox(&self) -> String {
        let mut out = format!("From {}\n{}", self.envelope, self.raw);
        if !out.ends_with('\n') {
            out.push('\n');
        }

        // INVARIANT: Messages are always separated by a blank line.
        if !out.ends_with("\n\n") {
            out.push('\n');
        }

        out
    }
}

fn parse_messages(content: &str) -> Vec<MboxMessage> {
    let mut messages = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut previous_blank = true;

    for line in content.lines() {
        if previous_blank && line.starts_with("From ") {
            if let Some((envelope, lines)) = current.take() {
                messages.push(finish(envelope, lines));
            }
            current = Some((line["From ".len()..].to_string(), Vec::new()));
            previous_blank = false;
            continue;
        }

        if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
        previous_blank = line.is_empty();
    }

    if let Some((envelope, lines)) = current.take() {
        messages.push(finish(envelope, lines));
    }

    messages
}

fn finish(envelope: String, mut lines: Vec<&str>) -> MboxMessage {
    // INVARIANT: Separator blank line belongs to mbox, not the message.
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut raw = lines.join("\n");
    raw.push('\n');

    MboxMessage { envelope, raw }
}

/// Mailbox error types.
#[derive(Debug, thiserror::Error)]
pub enum MboxError {
    /// Mailbox cannot be read.
    #[error("failed to open {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Mailbox cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Someone else holds the mailbox lock.
    #[error("mailbox is locked by {:?}", lock_path.display())]
    Locked { lock_path: PathBuf },

    /// Lock file cannot be created.
    #[error("failed to create lock {:?}", lock_path.display())]
    Lock {
        #[source]
        source: std::io::Error,
        lock_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = MboxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const TWO_MESSAGES: &str = indoc! {"
        From alice@example.com Thu Jan  1 00:00:00 2026
        From: Alice <alice@example.com>
        Subject: first
          continued
        To: bob@example.com

        hello bob
        >From the desk of alice

        From cron@example.com Thu Jan  1 00:01:00 2026
        From: Cron Daemon <cron@example.com>
        subject: backup done

        all good
    "};

    #[test]
    fn parse_splits_on_envelope_lines() {
        let messages = parse_messages(TWO_MESSAGES);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].envelope(), "alice@example.com Thu Jan  1 00:00:00 2026");
        assert_eq!(
            messages[0].raw(),
            indoc! {"
                From: Alice <alice@example.com>
                Subject: first
                  continued
                To: bob@example.com

                hello bob
                >From the desk of alice
            "}
        );
        assert_eq!(messages[1].raw(), "From: Cron Daemon <cron@example.com>\nsubject: backup done\n\nall good\n");
    }

    #[test]
    fn header_lookup_unfolds_and_ignores_case() {
        let messages = parse_messages(TWO_MESSAGES);
        assert_eq!(messages[0].subject(), Some("first continued".into()));
        assert_eq!(messages[1].subject(), Some("backup done".into()));
        assert_eq!(messages[1].header("To"), None);
    }

    #[test]
    fn flush_keeps_remaining_messages() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mbox");
        write(&path, TWO_MESSAGES)?;

        let mut mailbox = Mailbox::open(&path)?;
        mailbox.remove_front(1);
        mailbox.flush()?;

        let reopened = Mailbox::open(&path)?;
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.messages()[0].subject(), Some("backup done".into()));

        Ok(())
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mbox");
        write(&path, "")?;
        let mut mailbox = Mailbox::open(&path)?;

        let guard = mailbox.lock()?;
        assert!(matches!(mailbox.lock(), Err(MboxError::Locked { .. })));
        drop(guard);
        assert!(mailbox.lock().is_ok());

        Ok(())
    }

    #[test]
    fn lock_picks_up_late_deliveries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mbox");
        let (first, _) = TWO_MESSAGES.split_at(TWO_MESSAGES.find("From cron").unwrap_or(0));
        write(&path, first)?;

        let mut mailbox = Mailbox::open(&path)?;
        assert_eq!(mailbox.len(), 1);
        write(&path, TWO_MESSAGES)?;

        let _guard = mailbox.lock()?;
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.messages()[1].subject(), Some("backup done".into()));

        Ok(())
    }
}
