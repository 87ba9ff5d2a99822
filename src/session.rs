//! Per-connection session state
//!
//! A [`Session`] is the engine's central record: one authenticated
//! connection to one account on one server. Besides the live transport it
//! carries everything that must be reconstructed when the connection is
//! re-established -- negotiated protocol level, capabilities, the
//! server's namespace and the selected mailbox (kept in internal,
//! user-facing form so recovery can re-apply it).

use crate::buffer::Buffer;
use crate::command::Command;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::tls::TlsVersion;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Initial input-buffer capacity per session.
const INPUT_BUF: usize = 4096;

/// IMAP protocol level advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Not negotiated yet.
    #[default]
    None,
    Imap4,
    Imap4Rev1,
}

/// Capability bits the engine reacts to. Anything else the server
/// advertises is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub namespace: bool,
    pub cram_md5: bool,
    pub starttls: bool,
    pub children: bool,
    pub idle: bool,
    pub xoauth2: bool,
}

/// Address of a session: one account on one server endpoint.
///
/// This is the key of the engine's session table; every verb names the
/// session it operates on with one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub server: String,
    pub port: String,
    pub username: String,
}

impl Account {
    pub fn new(
        server: impl Into<String>,
        port: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port: port.into(),
            username: username.into(),
        }
    }
}

/// Everything needed to open (or re-open) a session.
#[derive(Debug, Clone)]
pub struct LoginSpec {
    pub server: String,
    /// Defaults to 143, or 993 when `tls` is set.
    pub port: Option<String>,
    /// `Some` requests implicit TLS on connect; `None` connects plain
    /// and upgrades opportunistically via STARTTLS.
    pub tls: Option<TlsVersion>,
    pub username: String,
    pub password: Option<SecretString>,
    pub oauth2: Option<SecretString>,
}

impl LoginSpec {
    /// The session-table key this spec logs in to, with the port
    /// defaulted from the transport choice.
    #[must_use]
    pub fn account(&self) -> Account {
        let port = self.port.clone().unwrap_or_else(|| {
            if self.tls.is_some() { "993" } else { "143" }.to_string()
        });
        Account::new(self.server.clone(), port, self.username.clone())
    }
}

/// One IMAP session.
pub(crate) struct Session {
    pub(crate) account: Account,
    pub(crate) tls: Option<TlsVersion>,
    pub(crate) password: Option<SecretString>,
    pub(crate) oauth2: Option<SecretString>,
    pub(crate) protocol: Protocol,
    pub(crate) capabilities: Capabilities,
    pub(crate) ns: Namespace,
    /// Selected mailbox in internal form; re-applied after recovery.
    pub(crate) selected: Option<String>,
    pub(crate) conn: Option<Connection>,
    pub(crate) buffer: Buffer,
}

impl Session {
    pub(crate) fn new(spec: &LoginSpec) -> Self {
        Self {
            account: spec.account(),
            tls: spec.tls,
            password: spec.password.clone(),
            oauth2: spec.oauth2.clone(),
            protocol: Protocol::None,
            capabilities: Capabilities::default(),
            ns: Namespace::default(),
            selected: None,
            conn: None,
            buffer: Buffer::with_capacity(INPUT_BUF),
        }
    }

    pub(crate) const fn is_live(&self) -> bool {
        self.conn.is_some()
    }

    /// Take over credentials and transport choice from a fresh login
    /// request against an existing (dead) session.
    pub(crate) fn refresh_credentials(&mut self, spec: &LoginSpec) {
        self.tls = spec.tls;
        self.password = spec.password.clone();
        self.oauth2 = spec.oauth2.clone();
    }

    /// Drop the transport. Negotiated state is kept so recovery knows
    /// what to rebuild; it is re-derived on the next connect.
    pub(crate) fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(server = %self.account.server, "connection closed");
        }
    }

    /// Send one tagged command. Fails fast, without I/O, when the
    /// session has no live connection.
    pub(crate) async fn send(&mut self, tag: u16, cmd: &Command<'_>) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::NotConnected);
        };
        debug!(server = %self.account.server, "C: {}", cmd.logged(tag));
        conn.write_all(cmd.render(tag).as_bytes()).await
    }

    /// Send continuation data (a literal or a SASL reply) plus CRLF.
    pub(crate) async fn send_continuation(&mut self, data: &[u8]) -> Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::NotConnected);
        };
        conn.write_all(data).await?;
        conn.write_all(b"\r\n").await
    }

    /// Read one chunk of server data into the input buffer.
    pub(crate) async fn receive(
        &mut self,
        timeout: Option<Duration>,
        fail_on_timeout: bool,
        wake: Option<&CancellationToken>,
    ) -> Result<usize> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(Error::NotConnected);
        };
        conn.read_into(&mut self.buffer, timeout, fail_on_timeout, wake)
            .await
    }
}
