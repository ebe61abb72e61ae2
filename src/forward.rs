// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Forward local UNIX mail to a remote address.
//!
//! A local MTA can do this too, but only comfortably on machines that are
//! externally facing with a proper FQDN. Instead, every message waiting in the
//! local mbox is wrapped into a fresh mail and relayed through a configured
//! SMTP server, then removed from the mailbox.

use crate::{
    mail::{Draft, MailError, Postman},
    mbox::{Mailbox, MboxError},
};

use tracing::{info, instrument};

/// Forwarding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarder {
    /// Address forwarded mail is sent from.
    pub from: String,

    /// Address forwarded mail is sent to.
    pub to: String,

    /// Name of this machine, stamped into every forwarded subject.
    pub hostname: String,
}

impl Forwarder {
    /// Wrap one mailbox message into a forwardable draft.
    pub fn wrap(&self, mailbox: &Mailbox, index: usize) -> Option<Draft> {
        let message = mailbox.messages().get(index)?;
        let subject = format!(
            "{}: {}",
            self.hostname,
            message.subject().unwrap_or_default()
        );
        let body = format!(
            "Forwarded email from {}:{}:\n\n{}",
            self.hostname,
            mailbox.path().display(),
            message.raw()
        );

        Some(Draft::new(self.from.as_str(), self.to.as_str(), subject, body))
    }

    /// Forward every message of mailbox, deleting each once sent.
    ///
    /// Holds the mailbox lock for the whole run. On the first failure, the
    /// mailbox is rewritten with only the messages that were not sent yet, and
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// - Return [`ForwardError::Mbox`] if mailbox cannot be locked or flushed.
    /// - Return [`ForwardError::Send`] if a message cannot be delivered.
    #[instrument(skip(self, mailbox, postman), level = "debug")]
    pub async fn forward_all(&self, mailbox: &mut Mailbox, postman: &impl Postman) -> Result<usize> {
        let _lock = mailbox.lock()?;
        let total = mailbox.len();

        for index in 0..total {
            let outcome = match self.wrap(mailbox, index) {
                Some(draft) => match draft.compose() {
                    Ok(message) => postman.deliver(message).await,
                    Err(err) => Err(err),
                },
                None => break,
            };

            if let Err(source) = outcome {
                // INVARIANT: Keep unsent messages in mailbox.
                mailbox.remove_front(index);
                mailbox.flush()?;
                return Err(ForwardError::Send {
                    source,
                    number: index,
                });
            }

            info!("forwarded message {index} to {}", self.to);
        }

        mailbox.remove_front(total);
        mailbox.flush()?;

        Ok(total)
    }
}

/// Forwarding error types.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Mailbox manipulation fails.
    #[error(transparent)]
    Mbox(#[from] MboxError),

    /// Message could not be composed or delivered.
    #[error("failed to send/delete message {number}")]
    Send {
        #[source]
        source: MailError,
        number: usize,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ForwardError> = std::result::Result<T, E>;
