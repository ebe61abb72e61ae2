// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Type characters that are awkward to reach on a standard keyboard.
//!
//! User enters plain ASCII, which gets translated through the configured
//! table and typed into whatever window has focus.

use crate::desktop::{Capabilities, DesktopError};

use inquire::{InquireError, Text};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const TITLE: &str = "typist";
const QUESTION: &str = "ascii text?";

/// Translate text by repeatedly replacing its longest known prefix.
///
/// # Errors
///
/// - Return [`TypistError::NoTranslation`] if some part of text has no
///   translation.
pub fn translate<'a>(text: &str, translations: &'a BTreeMap<String, String>) -> Result<Vec<&'a str>> {
    let mut output = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let found = rest
            .char_indices()
            .map(|(index, ch)| &rest[..index + ch.len_utf8()])
            .rev()
            .find_map(|prefix| translations.get_key_value(prefix));

        let Some((prefix, replacement)) = found else {
            return Err(TypistError::NoTranslation);
        };
        output.push(replacement.as_str());
        rest = &rest[prefix.len()..];
    }

    Ok(output)
}

/// Ask user for text to translate.
///
/// Returns `None` if user cancelled.
///
/// # Errors
///
/// - Return [`TypistError::Prompt`] if terminal prompt fails.
/// - Return [`TypistError::Desktop`] if dialog cannot be shown.
pub fn prompt(caps: &impl Capabilities, tty: bool) -> Result<Option<String>> {
    if tty {
        return match Text::new(QUESTION).prompt() {
            Ok(text) => Ok(Some(text)),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
            Err(err) => Err(TypistError::Prompt(err)),
        };
    }

    let outcome = caps.run(&dialog_input())?;
    if !outcome.success() {
        debug!("input dialog dismissed");
        return Ok(None);
    }

    Ok(Some(outcome.stdout.trim().to_string()))
}

/// Type text into focused window.
///
/// # Errors
///
/// - Return [`TypistError::Type`] if keystrokes cannot be sent.
pub fn send_text(caps: &impl Capabilities, text: &str) -> Result<()> {
    for argv in keystrokes(text) {
        let argv = argv.iter().map(String::as_str).collect::<Vec<_>>();
        let outcome = caps.run(&argv)?;
        if !outcome.success() {
            return Err(TypistError::Type {
                message: outcome.stderr.trim_end().to_string(),
            });
        }
    }

    Ok(())
}

/// Show error to user, as a dialog unless running on a terminal.
pub fn show_error(caps: &impl Capabilities, tty: bool, message: &str) {
    if tty {
        eprintln!("{message}");
        return;
    }

    let argv = dialog_error(message);
    let argv = argv.iter().map(String::as_str).collect::<Vec<_>>();
    match caps.run(&argv) {
        Ok(outcome) if outcome.success() => {}
        _ => caps.error(message),
    }
}

/// Prompt, translate, and type.
///
/// # Errors
///
/// - Return [`TypistError::NotConfigured`] if no translations exist.
/// - Return [`TypistError::NoTranslation`] if input cannot be translated.
/// - Return any error from [`prompt`] or [`send_text`].
#[instrument(skip(caps, translations), level = "debug")]
pub fn run(caps: &impl Capabilities, translations: &BTreeMap<String, String>, tty: bool) -> Result<()> {
    if translations.is_empty() {
        return Err(TypistError::NotConfigured);
    }

    let Some(text) = prompt(caps, tty)? else {
        return Ok(());
    };

    for piece in translate(&text, translations)? {
        send_text(caps, piece)?;
    }

    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn dialog_input() -> [&'static str; 6] {
    ["zenity", "--entry", "--title", TITLE, "--text", QUESTION]
}

#[cfg(target_os = "macos")]
fn dialog_input() -> [&'static str; 3] {
    [
        "osascript",
        "-e",
        r#"text returned of (display dialog "ascii text?" default answer "" with title "typist")"#,
    ]
}

#[cfg(not(target_os = "macos"))]
fn dialog_error(message: &str) -> Vec<String> {
    ["zenity", "--error", "--title", TITLE, "--text", message]
        .map(String::from)
        .to_vec()
}

#[cfg(target_os = "macos")]
fn dialog_error(message: &str) -> Vec<String> {
    let script = format!(
        r#"display dialog "{}" with title "typist" buttons "OK" default button 1 with icon stop"#,
        escape_applescript(message)
    );
    vec!["osascript".into(), "-e".into(), script]
}

#[cfg(not(target_os = "macos"))]
fn keystrokes(text: &str) -> Vec<Vec<String>> {
    text.chars()
        .map(|ch| vec!["xdotool".into(), "key".into(), format!("U{:x}", u32::from(ch))])
        .collect()
}

#[cfg(target_os = "macos")]
fn keystrokes(text: &str) -> Vec<Vec<String>> {
    let script = format!(
        "set the clipboard to \"{}\"\ntell application \"System Events\" to keystroke \"v\" using command down",
        escape_applescript(text)
    );
    vec![vec!["osascript".into(), "-e".into(), script]]
}

#[cfg(target_os = "macos")]
fn escape_applescript(text: &str) -> String {
    text.replace('\\', r"\\").replace('"', r#"\""#)
}

/// Typing assistant error types.
#[derive(Debug, thiserror::Error)]
pub enum TypistError {
    /// No translations are configured.
    #[error("configuration file not found")]
    NotConfigured,

    /// Some input has no translation.
    #[error("could not find a valid translation")]
    NoTranslation,

    /// Terminal prompt failed.
    #[error(transparent)]
    Prompt(#[from] InquireError),

    /// Keystrokes could not be sent.
    #[error("failed to type text: {message}")]
    Type { message: String },

    /// Desktop interaction failed.
    #[error(transparent)]
    Desktop(#[from] DesktopError),
}

/// Friendly result alias :3
pub type Result<T, E = TypistError> = std::result::Result<T, E>;
