// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Outgoing mail.
//!
//! Shared SMTP plumbing for every tool that sends mail: the local mailbox
//! forwarder, the file-change watcher, and the one-shot `sendmail` command.
//! Messages are always plain-text UTF-8.
//!
//! Delivery goes through the [`Postman`] trait so callers never care whether
//! they are speaking to a real SMTP server or not.

use crate::config::SmtpSettings;

use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::{future::Future, time::SystemTime};
use tracing::{debug, instrument};

/// Plain-text mail waiting to be sent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Sender, with or without display name.
    pub from: String,

    /// Primary recipients.
    pub to: Vec<String>,

    /// Carbon copy recipients.
    pub cc: Vec<String>,

    /// Blind carbon copy recipients. Never shows up in headers.
    pub bcc: Vec<String>,

    /// Subject line.
    pub subject: String,

    /// Explicit date header in RFC 2822 form, otherwise current time is used.
    pub date: Option<String>,

    /// Message body.
    pub body: String,
}

impl Draft {
    /// Construct draft from one sender to one recipient.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// Compose draft into a message ready for delivery.
    ///
    /// # Errors
    ///
    /// - Return [`MailError::Address`] if any address cannot be parsed.
    /// - Return [`MailError::Date`] if date header is not valid RFC 2822.
    /// - Return [`MailError::Build`] if message cannot be assembled.
    pub fn compose(&self) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.parse::<Mailbox>()?)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN);

        for to in &self.to {
            builder = builder.to(to.parse::<Mailbox>()?);
        }

        for cc in &self.cc {
            builder = builder.cc(cc.parse::<Mailbox>()?);
        }

        for bcc in &self.bcc {
            builder = builder.bcc(bcc.parse::<Mailbox>()?);
        }

        if let Some(date) = &self.date {
            let date = chrono::DateTime::parse_from_rfc2822(date).map_err(|source| {
                MailError::Date {
                    source,
                    date: date.clone(),
                }
            })?;
            builder = builder.date(SystemTime::from(date));
        }

        Ok(builder.body(self.body.clone())?)
    }

    /// Decide what a one-shot send should do with this draft.
    ///
    /// With `skip_empty`, a draft without body is dropped. With `dry_run`, the
    /// composed message is rendered for printing instead of being handed to a
    /// postman.
    ///
    /// # Errors
    ///
    /// - Return errors of [`Draft::compose`].
    pub fn dispatch(&self, skip_empty: bool, dry_run: bool) -> Result<Dispatch> {
        if skip_empty && self.body.is_empty() {
            debug!("empty body, nothing to send");
            return Ok(Dispatch::Skip);
        }

        let message = self.compose()?;
        if dry_run {
            return Ok(Dispatch::Print(String::from_utf8_lossy(&message.formatted()).into_owned()));
        }

        Ok(Dispatch::Send(Box::new(message)))
    }
}

/// Outcome of [`Draft::dispatch`].
#[derive(Debug)]
pub enum Dispatch {
    /// Nothing worth sending.
    Skip,

    /// Formatted message to print instead of sending.
    Print(String),

    /// Message ready for delivery.
    Send(Box<Message>),
}

/// Something that can carry composed messages to their recipients.
pub trait Postman {
    /// Deliver one message.
    fn deliver(&self, message: Message) -> impl Future<Output = Result<()>>;
}

/// Deliver mail through an SMTP relay.
#[derive(Clone)]
pub struct SmtpPostman {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpPostman {
    /// Construct new SMTP postman from connection settings.
    ///
    /// Plain SMTP is used unless TLS is requested, in which case the connection
    /// is upgraded through STARTTLS. Credentials are only offered when a
    /// login name is configured.
    ///
    /// # Errors
    ///
    /// - Return [`MailError::Transport`] if TLS parameters are rejected.
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server)
        }
        .port(settings.port);

        if let Some(login) = &settings.login {
            let password = settings.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(login.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    /// Open a connection to the server to prove it is reachable.
    ///
    /// # Errors
    ///
    /// - Return [`MailError::Transport`] if connection or handshake fails.
    /// - Return [`MailError::Unreachable`] if server does not answer.
    #[instrument(skip(self), level = "debug")]
    pub async fn verify(&self) -> Result<()> {
        if !self.transport.test_connection().await? {
            return Err(MailError::Unreachable);
        }

        Ok(())
    }
}

impl Postman for SmtpPostman {
    async fn deliver(&self, message: Message) -> Result<()> {
        debug!("deliver message to {:?}", message.envelope().to());
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Mail handling error types.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error(transparent)]
    Transport(#[from] lettre::transport::smtp::Error),

    /// Sender or recipient address could not be parsed.
    #[error(transparent)]
    Address(#[from] lettre::address::AddressError),

    /// Message could not be assembled.
    #[error(transparent)]
    Build(#[from] lettre::error::Error),

    /// Date header is not valid RFC 2822.
    #[error("invalid date {date:?}")]
    Date {
        #[source]
        source: chrono::ParseError,
        date: String,
    },

    /// SMTP server did not answer.
    #[error("SMTP server did not respond")]
    Unreachable,
}

/// Friendly result alias :3
pub type Result<T, E = MailError> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Postman that keeps everything it is handed.
    #[derive(Debug, Default)]
    pub(crate) struct PostBox {
        pub(crate) sent: Mutex<Vec<Message>>,
        pub(crate) fail_after: Option<usize>,
    }

    impl PostBox {
        pub(crate) fn failing_after(count: usize) -> Self {
            Self {
                sent: Mutex::default(),
                fail_after: Some(count),
            }
        }

        pub(crate) fn formatted(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|message| String::from_utf8_lossy(&message.formatted()).into_owned())
                .collect()
        }
    }

    impl Postman for PostBox {
        async fn deliver(&self, message: Message) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
                return Err(MailError::Unreachable);
            }
            sent.push(message);
            Ok(())
        }
    }

    #[test]
    fn compose_keeps_bcc_out_of_headers() -> anyhow::Result<()> {
        let draft = Draft {
            from: "me@example.com".into(),
            to: vec!["you@example.com".into()],
            cc: vec!["them@example.com".into()],
            bcc: vec!["secret@example.com".into()],
            subject: "hello".into(),
            date: Some("Tue, 1 Jul 2003 10:52:37 +0200".into()),
            body: "hi there\n".into(),
        };

        let message = draft.compose()?;
        let mut recipients = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        recipients.sort();
        assert_eq!(
            recipients,
            vec!["secret@example.com", "them@example.com", "you@example.com"]
        );

        let text = String::from_utf8(message.formatted())?;
        assert!(text.contains("Subject: hello"));
        assert!(text.contains("Date: "));
        assert!(!text.contains("secret@example.com"));

        Ok(())
    }

    #[test]
    fn compose_rejects_bad_address() {
        let draft = Draft::new("not an address", "you@example.com", "", "");
        assert!(matches!(draft.compose(), Err(MailError::Address(_))));
    }

    #[test]
    fn dispatch_skips_empty_body_only_when_asked() -> anyhow::Result<()> {
        let draft = Draft::new("me@example.com", "you@example.com", "nothing", "");
        assert!(matches!(draft.dispatch(true, false)?, Dispatch::Skip));
        assert!(matches!(draft.dispatch(false, false)?, Dispatch::Send(_)));

        // INVARIANT: Whitespace is still a body.
        let draft = Draft::new("me@example.com", "you@example.com", "blank", "\n");
        assert!(matches!(draft.dispatch(true, false)?, Dispatch::Send(_)));

        Ok(())
    }

    #[test]
    fn dispatch_dry_run_renders_message() -> anyhow::Result<()> {
        let mut draft = Draft::new("me@example.com", "you@example.com", "report", "all good\n");
        draft.bcc = vec!["hidden@example.com".into()];

        let Dispatch::Print(text) = draft.dispatch(false, true)? else {
            panic!("dry run must not produce a deliverable message");
        };
        assert!(text.contains("Subject: report"));
        assert!(text.contains("To: you@example.com"));
        assert!(text.contains("all good"));
        assert!(!text.contains("hidden@example.com"));

        Ok(())
    }

    #[tokio::test]
    async fn dispatched_message_reaches_postman() -> anyhow::Result<()> {
        let draft = Draft::new("me@example.com", "you@example.com", "ping", "pong\n");
        let Dispatch::Send(message) = draft.dispatch(true, false)? else {
            panic!("non-empty draft must be sent");
        };

        let postman = PostBox::default();
        postman.deliver(*message).await?;
        assert!(postman.formatted()[0].contains("Subject: ping"));

        Ok(())
    }

    #[test]
    fn dispatch_reports_bad_address() {
        let draft = Draft::new("me@example.com", "not an address", "", "body");
        assert!(matches!(draft.dispatch(false, true), Err(MailError::Address(_))));
    }

    #[test]
    fn compose_rejects_bad_date() {
        let mut draft = Draft::new("me@example.com", "you@example.com", "", "");
        draft.date = Some("yesterday-ish".into());
        assert!(matches!(draft.compose(), Err(MailError::Date { .. })));
    }
}
