// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Progress reporting wrapper around dd(1).
//!
//! GNU dd prints its transfer statistics whenever it receives `SIGUSR1`, but
//! has no option to do so on its own. Run dd, poke it once a second, and keep
//! rewriting the same three terminal lines with whatever it reports.

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    ffi::OsString,
    os::unix::process::ExitStatusExt,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Command,
    signal::unix::{signal, SignalKind},
    time::{interval, sleep},
};
use tracing::{debug, instrument};

/// Move cursor back 100 columns and up three lines, then clear to end.
pub const REWIND: &[u8] = b"\x1b[100D\x1b[3A\x1b[J";

/// Run dd with operands until it exits, relaying its statistics.
///
/// Returns exit status of dd, or 128 plus signal number if it was killed.
///
/// # Errors
///
/// - Return [`DdError::Spawn`] if dd cannot be started.
/// - Return [`DdError::Io`] if relaying output fails.
#[instrument(skip(operands), level = "debug")]
pub async fn run(operands: Vec<OsString>) -> Result<i32> {
    let mut child = Command::new("dd")
        .args(&operands)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(DdError::Spawn)?;
    let pid = Pid::from_raw(child.id().ok_or(DdError::Vanished)? as i32);
    let stderr = child.stderr.take().ok_or(DdError::Vanished)?;

    let mut out = tokio::io::stderr();
    out.write_all(b"\n\n\n").await?;
    out.flush().await?;

    let reset = Arc::new(AtomicBool::new(false));
    let signaller = tokio::spawn(poke(pid, reset.clone()));
    let passthrough = tokio::spawn(pass_signals(pid));

    relay(stderr, &mut out, &reset).await?;
    let status = child.wait().await?;
    signaller.abort();
    passthrough.abort();

    debug!("dd finished with {status}");
    Ok(status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1))
}

async fn poke(pid: Pid, reset: Arc<AtomicBool>) {
    // INVARIANT: Give dd time to install its handler, SIGUSR1 kills otherwise.
    sleep(Duration::from_secs(1)).await;

    let mut ticker = interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        reset.store(true, Ordering::SeqCst);

        if kill(pid, Signal::SIGUSR1).is_err() {
            break;
        }
    }
}

async fn pass_signals(pid: Pid) -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let forward = tokio::select! {
            _ = interrupt.recv() => Signal::SIGINT,
            _ = terminate.recv() => Signal::SIGTERM,
        };

        debug!("passing signal {forward:?} to dd");
        if let Err(err) = kill(pid, forward) {
            debug!("dd is gone: {err}");
        }
    }
}

/// Copy dd statistics to output, rewinding cursor whenever a fresh report was
/// requested.
///
/// # Errors
///
/// - Return [`std::io::Error`] if reading or writing fails.
pub async fn relay(
    mut input: impl AsyncRead + Unpin,
    mut output: impl AsyncWrite + Unpin,
    reset: &AtomicBool,
) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let count = input.read(&mut buf).await?;
        if count == 0 {
            break;
        }

        if reset.swap(false, Ordering::SeqCst) {
            output.write_all(REWIND).await?;
        }
        output.write_all(&buf[..count]).await?;
        output.flush().await?;
    }

    Ok(())
}

/// Progress wrapper error types.
#[derive(Debug, thiserror::Error)]
pub enum DdError {
    /// dd cannot be started.
    #[error("failed to run dd")]
    Spawn(#[source] std::io::Error),

    /// dd exited before it could be watched.
    #[error("dd exited before it could be watched")]
    Vanished,

    /// Relaying output or waiting on dd failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = DdError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn relay_rewinds_after_reset() -> anyhow::Result<()> {
        let reset = AtomicBool::new(true);
        let mut output = Vec::new();
        relay(&b"1024 bytes copied\n"[..], &mut output, &reset).await?;

        let mut expect = REWIND.to_vec();
        expect.extend_from_slice(b"1024 bytes copied\n");
        assert_eq!(output, expect);
        assert!(!reset.load(Ordering::SeqCst));

        Ok(())
    }

    #[tokio::test]
    async fn relay_passes_through_without_reset() -> anyhow::Result<()> {
        let reset = AtomicBool::new(false);
        let mut output = Vec::new();
        relay(&b"done\n"[..], &mut output, &reset).await?;
        assert_eq!(output, b"done\n");
        Ok(())
    }

    #[tokio::test]
    async fn exit_status_is_propagated() -> anyhow::Result<()> {
        let code = run(vec!["if=/dev/null".into(), "of=/dev/null".into()]).await?;
        assert_eq!(code, 0);

        let code = run(vec!["if=/definitely/not/here".into(), "of=/dev/null".into()]).await?;
        assert_eq!(code, 1);

        Ok(())
    }
}
