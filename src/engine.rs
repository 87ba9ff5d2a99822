//! Request dispatcher
//!
//! The [`Engine`] owns every session and exposes the verb surface the
//! scripting layer calls: `login`, `select`, `search`, `fetch_*`,
//! `store`, `copy`, `append`, `idle` and friends. Each verb follows the
//! same shape: look the session up, convert mailbox arguments to server
//! form, send one tagged command, parse until its completion, convert
//! any returned names back.
//!
//! Failure routing lives here too. A transport failure closes the
//! connection; depending on the `recover` option the engine then
//! silently reconnects, re-authenticates and re-selects the previously
//! selected mailbox, handing the caller [`Status::None`] ("retry if you
//! want") instead of an error. A server `BYE` tears the session down,
//! reconnecting only under `recover = all`.

use crate::auth::cram_md5_response;
use crate::cert::{CertificatePrompt, PinStore, TtyPrompt};
use crate::command::{Command, TagSequence};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::options::{EngineOptions, Recover};
use crate::response::{self, FetchSummary, MailboxStatus};
use crate::session::{Account, Capabilities, LoginSpec, Protocol, Session};
use crate::status::Status;
use crate::tls::TlsSettings;
use chrono::{DateTime, FixedOffset};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How STORE changes a message's flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Add,
    Remove,
    Replace,
}

impl StoreMode {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Remove => "-",
            Self::Replace => "",
        }
    }
}

/// The IMAP engine: session table, shared TLS state, tag sequence and
/// the verb surface.
///
/// One command is in flight per session at any moment; `&mut self` on
/// every verb is what enforces it.
pub struct Engine {
    options: EngineOptions,
    tls: TlsSettings,
    pins: PinStore,
    prompt: Box<dyn CertificatePrompt>,
    sessions: HashMap<Account, Session>,
    tags: TagSequence,
    wake: CancellationToken,
}

impl Engine {
    /// Build an engine: TLS contexts and trust roots are constructed
    /// once, here, and shared by every session.
    pub fn new(options: EngineOptions) -> Result<Self> {
        Self::with_prompt(options, Box::new(TtyPrompt))
    }

    /// Like [`Engine::new`] with a custom certificate prompt, for
    /// embedders that have their own user interface.
    pub fn with_prompt(
        options: EngineOptions,
        prompt: Box<dyn CertificatePrompt>,
    ) -> Result<Self> {
        let tls = TlsSettings::new(&options)?;
        let pins = PinStore::new(options.pinned_certs.clone());
        Ok(Self {
            options,
            tls,
            pins,
            prompt,
            sessions: HashMap::new(),
            tags: TagSequence::new(),
            wake: CancellationToken::new(),
        })
    }

    /// A handle that interrupts the IDLE wait when cancelled.
    ///
    /// The token is armed only while IDLE is blocked; cancelling it at
    /// any other time has no effect on in-flight commands. Each
    /// interrupt consumes the token -- obtain a fresh handle before the
    /// next IDLE.
    #[must_use]
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.wake.clone()
    }

    /// Whether a live session exists for this account.
    #[must_use]
    pub fn is_logged_in(&self, account: &Account) -> bool {
        self.sessions.get(account).is_some_and(Session::is_live)
    }

    /// The mailbox currently selected on this session, in internal form.
    #[must_use]
    pub fn selected(&self, account: &Account) -> Option<&str> {
        self.sessions.get(account)?.selected.as_deref()
    }

    /// Capabilities negotiated on this session.
    #[must_use]
    pub fn capabilities(&self, account: &Account) -> Option<Capabilities> {
        Some(self.sessions.get(account)?.capabilities)
    }

    /// Protocol level negotiated on this session.
    #[must_use]
    pub fn protocol(&self, account: &Account) -> Option<Protocol> {
        Some(self.sessions.get(account)?.protocol)
    }

    // ── login / logout ─────────────────────────────────────────────

    /// Connect, authenticate and interrogate the server.
    ///
    /// Idempotent: a second login against a live session returns
    /// [`Status::Preauth`] without touching the wire. The full bootstrap
    /// is greeting, CAPABILITY, opportunistic STARTTLS (plus a fresh
    /// CAPABILITY -- the pre-TLS list cannot be trusted), authentication
    /// preferring XOAUTH2 then CRAM-MD5 then LOGIN, CAPABILITY again,
    /// and NAMESPACE when available.
    pub async fn login(&mut self, spec: &LoginSpec) -> Result<Status> {
        let account = spec.account();
        if let Some(ssn) = self.sessions.get(&account)
            && ssn.is_live()
        {
            return Ok(Status::Preauth);
        }

        let mut ssn = match self.sessions.remove(&account) {
            Some(mut existing) => {
                existing.refresh_credentials(spec);
                existing
            }
            None => Session::new(spec),
        };

        let status = self.bootstrap(&mut ssn).await?;
        if status.is_success() {
            self.sessions.insert(account, ssn);
        }
        Ok(status)
    }

    /// Say goodbye and tear the session down. Always succeeds locally;
    /// the session is gone afterwards either way.
    pub async fn logout(&mut self, account: &Account) -> Result<Status> {
        let Some(mut ssn) = self.sessions.remove(account) else {
            return Err(Error::NotConnected);
        };
        if ssn.is_live() {
            let tag = self.tags.next();
            if ssn.send(tag, &Command::Logout).await.is_ok() {
                let _ = response::generic(&mut ssn, tag, &self.options).await;
            }
            ssn.disconnect();
        }
        Ok(Status::Ok)
    }

    // ── simple verbs ───────────────────────────────────────────────

    /// Reset any inactivity autologout timer on the server.
    pub async fn noop(&mut self, account: &Account) -> Result<Status> {
        let result = self.run_simple(account, &Command::Noop).await;
        self.settle(account, result).await
    }

    /// Open a mailbox in read-write mode.
    pub async fn select(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        let result = self.run_select(account, mailbox).await;
        self.settle(account, result).await
    }

    /// Close the selected mailbox.
    pub async fn close(&mut self, account: &Account) -> Result<Status> {
        let result = self.run_close(account).await;
        self.settle(account, result).await
    }

    /// Remove messages marked `\Deleted` from the selected mailbox.
    pub async fn expunge(&mut self, account: &Account) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = self.run_simple(account, &Command::Expunge).await;
        self.settle(account, result).await
    }

    /// Mailbox counters via STATUS (EXAMINE on IMAP4 servers, which
    /// only report EXISTS and RECENT).
    pub async fn status(
        &mut self,
        account: &Account,
        mailbox: &str,
    ) -> Result<(Status, MailboxStatus)> {
        let result = self.run_status(account, mailbox).await;
        self.settle_pair(account, result, MailboxStatus::default())
            .await
    }

    /// List mailboxes matching `pattern` under `reference`.
    ///
    /// Returns selectable mailboxes and folders that may hold children,
    /// both in internal name form.
    pub async fn list(
        &mut self,
        account: &Account,
        reference: &str,
        pattern: &str,
    ) -> Result<(Status, Vec<String>, Vec<String>)> {
        let result = self
            .run_list(account, reference, pattern, false)
            .await
            .map(|(s, m, f)| (s, (m, f)));
        let (status, (mailboxes, folders)) = self
            .settle_pair(account, result, (Vec::new(), Vec::new()))
            .await?;
        Ok((status, mailboxes, folders))
    }

    /// Like [`Engine::list`], restricted to subscribed mailboxes.
    pub async fn lsub(
        &mut self,
        account: &Account,
        reference: &str,
        pattern: &str,
    ) -> Result<(Status, Vec<String>, Vec<String>)> {
        let result = self
            .run_list(account, reference, pattern, true)
            .await
            .map(|(s, m, f)| (s, (m, f)));
        let (status, (mailboxes, folders)) = self
            .settle_pair(account, result, (Vec::new(), Vec::new()))
            .await?;
        Ok((status, mailboxes, folders))
    }

    /// Search the selected mailbox; returns matching UIDs.
    pub async fn search(
        &mut self,
        account: &Account,
        criteria: &str,
        charset: Option<&str>,
    ) -> Result<(Status, Vec<u32>)> {
        let result = self.run_search(account, criteria, charset).await;
        self.settle_pair(account, result, Vec::new()).await
    }

    // ── fetch ──────────────────────────────────────────────────────

    /// FLAGS, INTERNALDATE and RFC822.SIZE for a UID set.
    pub async fn fetch_fast(
        &mut self,
        account: &Account,
        set: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let result = self.run_fetch_meta(account, set, "FAST").await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// FLAGS for a UID set.
    pub async fn fetch_flags(
        &mut self,
        account: &Account,
        set: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let result = self.run_fetch_meta(account, set, "FLAGS").await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// INTERNALDATE for a UID set.
    pub async fn fetch_date(
        &mut self,
        account: &Account,
        set: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let result = self.run_fetch_meta(account, set, "INTERNALDATE").await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// RFC822.SIZE for a UID set.
    pub async fn fetch_size(
        &mut self,
        account: &Account,
        set: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let result = self.run_fetch_meta(account, set, "RFC822.SIZE").await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// BODYSTRUCTURE for a UID set.
    pub async fn fetch_structure(
        &mut self,
        account: &Account,
        set: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let result = self.run_fetch_meta(account, set, "BODYSTRUCTURE").await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// Message header (`BODY.PEEK[HEADER]`) as opaque bytes.
    pub async fn fetch_header(
        &mut self,
        account: &Account,
        uid: u32,
    ) -> Result<(Status, Vec<u8>)> {
        let result = self
            .run_fetch_body(account, uid, "BODY.PEEK[HEADER]".to_string())
            .await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// Message text (`BODY.PEEK[TEXT]`) as opaque bytes.
    pub async fn fetch_text(&mut self, account: &Account, uid: u32) -> Result<(Status, Vec<u8>)> {
        let result = self
            .run_fetch_body(account, uid, "BODY.PEEK[TEXT]".to_string())
            .await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// Selected header fields (`BODY.PEEK[HEADER.FIELDS (...)]`).
    pub async fn fetch_fields(
        &mut self,
        account: &Account,
        uid: u32,
        fields: &str,
    ) -> Result<(Status, Vec<u8>)> {
        let items = format!("BODY.PEEK[HEADER.FIELDS ({fields})]");
        let result = self.run_fetch_body(account, uid, items).await;
        self.settle_pair(account, result, Vec::new()).await
    }

    /// One body part (`BODY.PEEK[<part>]`).
    pub async fn fetch_part(
        &mut self,
        account: &Account,
        uid: u32,
        part: &str,
    ) -> Result<(Status, Vec<u8>)> {
        let items = format!("BODY.PEEK[{part}]");
        let result = self.run_fetch_body(account, uid, items).await;
        self.settle_pair(account, result, Vec::new()).await
    }

    // ── mutation ───────────────────────────────────────────────────

    /// Add, remove or replace flags on a UID set. With the `expunge`
    /// option on, a STORE that touches `\Deleted` is followed by one
    /// EXPUNGE before this returns.
    pub async fn store(
        &mut self,
        account: &Account,
        set: &str,
        mode: StoreMode,
        flags: &[Flag],
    ) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = self.run_store(account, set, mode, flags).await;
        self.settle(account, result).await
    }

    /// Copy a UID set into another mailbox, creating it on
    /// `[TRYCREATE]` and retrying once.
    pub async fn copy(&mut self, account: &Account, set: &str, mailbox: &str) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = self.run_copy(account, set, mailbox).await;
        self.settle(account, result).await
    }

    /// Append a message, creating the mailbox on `[TRYCREATE]` and
    /// retrying once.
    pub async fn append(
        &mut self,
        account: &Account,
        mailbox: &str,
        message: &[u8],
        flags: Option<&[Flag]>,
        date: Option<DateTime<FixedOffset>>,
    ) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = self.run_append(account, mailbox, message, flags, date).await;
        self.settle(account, result).await
    }

    /// Create a mailbox.
    pub async fn create(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        self.run_mailbox_verb(account, mailbox, MailboxVerb::Create)
            .await
    }

    /// Delete a mailbox.
    pub async fn delete(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        self.run_mailbox_verb(account, mailbox, MailboxVerb::Delete)
            .await
    }

    /// Rename a mailbox.
    pub async fn rename(&mut self, account: &Account, from: &str, to: &str) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = self.run_rename(account, from, to).await;
        self.settle(account, result).await
    }

    /// Subscribe a mailbox.
    pub async fn subscribe(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        self.run_mailbox_verb(account, mailbox, MailboxVerb::Subscribe)
            .await
    }

    /// Unsubscribe a mailbox.
    pub async fn unsubscribe(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        self.run_mailbox_verb(account, mailbox, MailboxVerb::Unsubscribe)
            .await
    }

    // ── idle ───────────────────────────────────────────────────────

    /// Wait for the server to push news about the selected mailbox.
    ///
    /// Cycles `DONE`/`IDLE` every keepalive period so intermediaries do
    /// not drop the connection. Returns the untagged event token (e.g.
    /// `EXISTS`) that ended the wait, or no event when the wait was
    /// interrupted via [`Engine::interrupt_handle`].
    pub async fn idle(&mut self, account: &Account) -> Result<(Status, Option<String>)> {
        let result = self.run_idle(account).await;
        self.settle_pair(account, result, None).await
    }

    // ── verb bodies ────────────────────────────────────────────────

    async fn run_simple(&mut self, account: &Account, cmd: &Command<'_>) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, cmd).await?;
        response::generic(ssn, tag, &self.options).await
    }

    async fn run_select(&mut self, account: &Account, mailbox: &str) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let wire = ssn.ns.apply(mailbox);
        let tag = self.tags.next();
        ssn.send(tag, &Command::Select { mailbox: &wire }).await?;
        let status = response::select(ssn, tag, &self.options).await?;
        if status.is_success() {
            ssn.selected = Some(mailbox.to_string());
        }
        Ok(status)
    }

    async fn run_close(&mut self, account: &Account) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, &Command::Close).await?;
        let status = response::generic(ssn, tag, &self.options).await?;
        if status == Status::Ok {
            ssn.selected = None;
        }
        Ok(status)
    }

    async fn run_status(
        &mut self,
        account: &Account,
        mailbox: &str,
    ) -> Result<(Status, MailboxStatus)> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let wire = ssn.ns.apply(mailbox);
        let tag = self.tags.next();
        if ssn.protocol == Protocol::Imap4Rev1 {
            ssn.send(tag, &Command::Status { mailbox: &wire }).await?;
            response::status_counts(ssn, tag, &self.options).await
        } else {
            ssn.send(tag, &Command::Examine { mailbox: &wire }).await?;
            response::examine(ssn, tag, &self.options).await
        }
    }

    async fn run_list(
        &mut self,
        account: &Account,
        reference: &str,
        pattern: &str,
        subscribed_only: bool,
    ) -> Result<(Status, Vec<String>, Vec<String>)> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let wire = ssn.ns.apply(pattern);
        let cmd = if subscribed_only {
            Command::Lsub {
                reference,
                pattern: &wire,
            }
        } else {
            Command::List {
                reference,
                pattern: &wire,
            }
        };
        let tag = self.tags.next();
        ssn.send(tag, &cmd).await?;
        response::list(ssn, tag, &self.options).await
    }

    async fn run_search(
        &mut self,
        account: &Account,
        criteria: &str,
        charset: Option<&str>,
    ) -> Result<(Status, Vec<u32>)> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, &Command::Search { charset, criteria }).await?;
        response::search(ssn, tag, &self.options).await
    }

    async fn run_fetch_meta(
        &mut self,
        account: &Account,
        set: &str,
        items: &str,
    ) -> Result<(Status, Vec<FetchSummary>)> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, &Command::Fetch { set, items }).await?;
        response::fetch_summaries(ssn, tag, &self.options).await
    }

    async fn run_fetch_body(
        &mut self,
        account: &Account,
        uid: u32,
        items: String,
    ) -> Result<(Status, Vec<u8>)> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let set = uid.to_string();
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Fetch {
                set: &set,
                items: &items,
            },
        )
        .await?;
        response::fetch_body(ssn, tag, &self.options).await
    }

    async fn run_store(
        &mut self,
        account: &Account,
        set: &str,
        mode: StoreMode,
        flags: &[Flag],
    ) -> Result<Status> {
        let rendered = Flag::render_list(flags);
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Store {
                set,
                prefix: mode.prefix(),
                flags: &rendered,
            },
        )
        .await?;
        let status = response::generic(ssn, tag, &self.options).await?;
        if status != Status::Ok {
            return Ok(status);
        }

        if flags.contains(&Flag::Deleted) && self.options.expunge {
            let tag = self.tags.next();
            ssn.send(tag, &Command::Expunge).await?;
            return response::generic(ssn, tag, &self.options).await;
        }
        Ok(status)
    }

    async fn run_copy(&mut self, account: &Account, set: &str, mailbox: &str) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let wire = ssn.ns.apply(mailbox);
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Copy {
                set,
                mailbox: &wire,
            },
        )
        .await?;
        let status = response::generic(ssn, tag, &self.options).await?;
        if status != Status::TryCreate {
            return Ok(status);
        }

        let created = self.run_trycreate(account, &wire).await?;
        if created == Status::Bye {
            return Ok(created);
        }

        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Copy {
                set,
                mailbox: &wire,
            },
        )
        .await?;
        response::generic(ssn, tag, &self.options).await
    }

    async fn run_append(
        &mut self,
        account: &Account,
        mailbox: &str,
        message: &[u8],
        flags: Option<&[Flag]>,
        date: Option<DateTime<FixedOffset>>,
    ) -> Result<Status> {
        let rendered_flags = flags.map(Flag::render_list);
        let rendered_date = date.map(|d| d.format("%e-%b-%Y %H:%M:%S %z").to_string());

        let ssn = Self::live(&mut self.sessions, account)?;
        let wire = ssn.ns.apply(mailbox);
        let cmd = Command::Append {
            mailbox: &wire,
            flags: rendered_flags.as_deref(),
            date: rendered_date.as_deref(),
            size: message.len(),
        };

        let tag = self.tags.next();
        ssn.send(tag, &cmd).await?;
        let mut status = response::continuation(ssn, tag, &self.options).await?;
        if status == Status::Continue {
            ssn.send_continuation(message).await?;
            status = response::generic(ssn, tag, &self.options).await?;
        }
        if status != Status::TryCreate {
            return Ok(status);
        }

        let created = self.run_trycreate(account, &wire).await?;
        if created == Status::Bye {
            return Ok(created);
        }

        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, &cmd).await?;
        let mut status = response::continuation(ssn, tag, &self.options).await?;
        if status == Status::Continue {
            ssn.send_continuation(message).await?;
            status = response::generic(ssn, tag, &self.options).await?;
        }
        Ok(status)
    }

    /// CREATE (and optionally SUBSCRIBE) the mailbox a `[TRYCREATE]`
    /// pointed at. The caller retries its command afterwards regardless
    /// of the CREATE result, like the original exchange suggests.
    async fn run_trycreate(&mut self, account: &Account, wire: &str) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let tag = self.tags.next();
        ssn.send(tag, &Command::Create { mailbox: wire }).await?;
        let status = response::generic(ssn, tag, &self.options).await?;
        if status == Status::Bye {
            return Ok(status);
        }

        if self.options.subscribe {
            let ssn = Self::live(&mut self.sessions, account)?;
            let tag = self.tags.next();
            ssn.send(tag, &Command::Subscribe { mailbox: wire }).await?;
            let status = response::generic(ssn, tag, &self.options).await?;
            if status == Status::Bye {
                return Ok(status);
            }
        }
        Ok(status)
    }

    async fn run_rename(&mut self, account: &Account, from: &str, to: &str) -> Result<Status> {
        let ssn = Self::live(&mut self.sessions, account)?;
        let from_wire = ssn.ns.apply(from);
        let to_wire = ssn.ns.apply(to);
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Rename {
                from: &from_wire,
                to: &to_wire,
            },
        )
        .await?;
        response::generic(ssn, tag, &self.options).await
    }

    async fn run_mailbox_verb(
        &mut self,
        account: &Account,
        mailbox: &str,
        verb: MailboxVerb,
    ) -> Result<Status> {
        if self.options.dryrun {
            return Ok(Status::Ok);
        }
        let result = async {
            let ssn = Self::live(&mut self.sessions, account)?;
            let wire = ssn.ns.apply(mailbox);
            let cmd = match verb {
                MailboxVerb::Create => Command::Create { mailbox: &wire },
                MailboxVerb::Delete => Command::Delete { mailbox: &wire },
                MailboxVerb::Subscribe => Command::Subscribe { mailbox: &wire },
                MailboxVerb::Unsubscribe => Command::Unsubscribe { mailbox: &wire },
            };
            let tag = self.tags.next();
            ssn.send(tag, &cmd).await?;
            response::generic(ssn, tag, &self.options).await
        }
        .await;
        self.settle(account, result).await
    }

    async fn run_idle(&mut self, account: &Account) -> Result<(Status, Option<String>)> {
        {
            let ssn = Self::live(&mut self.sessions, account)?;
            if !ssn.capabilities.idle {
                return Ok((Status::Bad, None));
            }
        }
        let keepalive = self.options.keepalive_duration();
        let wakeonany = self.options.wakeonany;

        loop {
            let wake = self.wake.clone();
            let ssn = Self::live(&mut self.sessions, account)?;
            let tag = self.tags.next();
            ssn.send(tag, &Command::Idle).await?;
            let status = response::continuation(ssn, tag, &self.options).await?;
            if status != Status::Continue {
                return Ok((status, None));
            }

            match response::idle_poll(ssn, keepalive, wakeonany, &wake).await {
                Ok((Status::Timeout, _)) => {
                    // Keepalive: cycle DONE/IDLE so the server (or some
                    // middlebox) does not give up on us.
                    ssn.send_continuation(b"DONE").await?;
                    let status = response::generic(ssn, tag, &self.options).await?;
                    if status == Status::Bye {
                        return Ok((Status::Bye, None));
                    }
                }
                Ok((Status::Untagged, event)) => {
                    ssn.send_continuation(b"DONE").await?;
                    let status = response::generic(ssn, tag, &self.options).await?;
                    if status == Status::Bye {
                        return Ok((Status::Bye, None));
                    }
                    return Ok((Status::Untagged, event));
                }
                Ok((other, _)) => return Ok((other, None)),
                Err(Error::Interrupted) => {
                    // A wake signal ends the IDLE cleanly, without an
                    // event. The token is spent; renew it for next time.
                    self.wake = CancellationToken::new();
                    ssn.send_continuation(b"DONE").await?;
                    let status = response::generic(ssn, tag, &self.options).await?;
                    if status == Status::Bye {
                        return Ok((Status::Bye, None));
                    }
                    return Ok((Status::Ok, None));
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ── bootstrap and failure routing ──────────────────────────────

    /// Open the transport and drive the session to Authenticated (and
    /// back to Selected on the recovery path).
    async fn bootstrap(&mut self, ssn: &mut Session) -> Result<Status> {
        let port: u16 = ssn
            .account
            .port
            .parse()
            .map_err(|_| Error::Config(format!("invalid port: {}", ssn.account.port)))?;
        let timeout = self.options.timeout_duration();

        let mut conn = Connection::open(&ssn.account.server, port, timeout).await?;
        if let Some(version) = ssn.tls {
            let connector = self.tls.connector(Some(version))?;
            conn = conn
                .upgrade_tls(&connector, &ssn.account.server, timeout)
                .await?;
        }
        ssn.conn = Some(conn);
        if ssn.tls.is_some() {
            self.certificate_gate(ssn)?;
        }

        let greeted = response::greeting(ssn, &self.options).await?;
        if greeted == Status::Bye {
            ssn.disconnect();
            return Ok(Status::Bye);
        }

        if self.exchange_capability(ssn).await? == Status::Bye {
            ssn.disconnect();
            return Ok(Status::Bye);
        }

        // Opportunistic STARTTLS on plain connections; the pre-TLS
        // capability list cannot be trusted afterwards.
        if ssn.tls.is_none() && ssn.capabilities.starttls && self.options.starttls {
            let tag = self.tags.next();
            ssn.send(tag, &Command::StartTls).await?;
            let status = response::generic(ssn, tag, &self.options).await?;
            if status == Status::Ok {
                let connector = self.tls.connector(None)?;
                let conn = ssn.conn.take().ok_or(Error::NotConnected)?;
                let conn = conn
                    .upgrade_tls(&connector, &ssn.account.server, timeout)
                    .await?;
                ssn.conn = Some(conn);
                self.certificate_gate(ssn)?;

                if self.exchange_capability(ssn).await? == Status::Bye {
                    ssn.disconnect();
                    return Ok(Status::Bye);
                }
            }
        }

        let auth_status = if greeted == Status::Preauth {
            Status::Preauth
        } else {
            match self.authenticate(ssn).await? {
                s @ (Status::Ok | Status::Preauth) => s,
                other => {
                    ssn.disconnect();
                    return Ok(other);
                }
            }
        };

        // Capabilities may have changed across authentication.
        if self.exchange_capability(ssn).await? == Status::Bye {
            ssn.disconnect();
            return Ok(Status::Bye);
        }

        if ssn.capabilities.namespace && self.options.namespace {
            let tag = self.tags.next();
            ssn.send(tag, &Command::Namespace).await?;
            if response::namespace(ssn, tag, &self.options).await? == Status::Bye {
                ssn.disconnect();
                return Ok(Status::Bye);
            }
        }

        // Recovery path: restore the mailbox that was selected before
        // the connection dropped.
        if let Some(mailbox) = ssn.selected.clone() {
            let wire = ssn.ns.apply(&mailbox);
            let tag = self.tags.next();
            ssn.send(tag, &Command::Select { mailbox: &wire }).await?;
            let status = response::select(ssn, tag, &self.options).await?;
            if !status.is_success() {
                ssn.selected = None;
            }
        }

        info!(
            server = %ssn.account.server,
            user = %ssn.account.username,
            "session established"
        );
        Ok(auth_status)
    }

    async fn exchange_capability(&mut self, ssn: &mut Session) -> Result<Status> {
        let tag = self.tags.next();
        ssn.send(tag, &Command::Capability).await?;
        response::capability(ssn, tag, &self.options).await
    }

    /// Authenticate preferring XOAUTH2, then CRAM-MD5, then LOGIN. A
    /// `NO` on any attempted mechanism is fatal for the session.
    async fn authenticate(&mut self, ssn: &mut Session) -> Result<Status> {
        if let Some(oauth2) = ssn.oauth2.clone() {
            if !ssn.capabilities.xoauth2 && ssn.password.is_none() {
                error!(
                    user = %ssn.account.username,
                    server = %ssn.account.server,
                    "OAuth2 not supported by server"
                );
                return Ok(Status::No);
            }
            if ssn.capabilities.xoauth2 {
                let tag = self.tags.next();
                ssn.send(
                    tag,
                    &Command::Authenticate {
                        mechanism: "XOAUTH2",
                        initial: Some(&oauth2),
                    },
                )
                .await?;
                match response::generic(ssn, tag, &self.options).await? {
                    Status::Ok => return Ok(Status::Ok),
                    Status::Bye => return Ok(Status::Bye),
                    Status::No => {
                        error!(
                            user = %ssn.account.username,
                            server = %ssn.account.server,
                            "OAuth2 string rejected"
                        );
                        return Ok(Status::No);
                    }
                    _ => {}
                }
            }
        }

        let Some(password) = ssn.password.clone() else {
            return Err(Error::Config(format!(
                "no password for {}@{}",
                ssn.account.username, ssn.account.server
            )));
        };

        if ssn.capabilities.cram_md5 && self.options.crammd5 {
            let tag = self.tags.next();
            ssn.send(
                tag,
                &Command::Authenticate {
                    mechanism: "CRAM-MD5",
                    initial: None,
                },
            )
            .await?;
            let (status, challenge) = response::authenticate(ssn, tag, &self.options).await?;
            match status {
                Status::Continue => {
                    let Some(challenge) = challenge else {
                        return Err(Error::Protocol("missing CRAM-MD5 challenge".into()));
                    };
                    let reply = cram_md5_response(
                        &ssn.account.username,
                        password.expose_secret(),
                        &challenge,
                    )?;
                    ssn.send_continuation(reply.as_bytes()).await?;
                    match response::generic(ssn, tag, &self.options).await? {
                        Status::Ok => return Ok(Status::Ok),
                        Status::Bye => return Ok(Status::Bye),
                        Status::No => {
                            error!(
                                user = %ssn.account.username,
                                server = %ssn.account.server,
                                "CRAM-MD5 credentials rejected"
                            );
                            return Ok(Status::No);
                        }
                        _ => {} // mechanism refused; fall back to LOGIN
                    }
                }
                Status::Bye => return Ok(Status::Bye),
                _ => {} // no continuation; fall back to LOGIN
            }
        }

        let user = ssn.account.username.clone();
        let tag = self.tags.next();
        ssn.send(
            tag,
            &Command::Login {
                user: &user,
                pass: &password,
            },
        )
        .await?;
        let status = response::generic(ssn, tag, &self.options).await?;
        if status == Status::No {
            error!(
                user = %user,
                server = %ssn.account.server,
                "username or password rejected"
            );
        }
        Ok(status)
    }

    fn certificate_gate(&self, ssn: &Session) -> Result<()> {
        if !self.options.certificates {
            return Ok(());
        }
        let Some(conn) = ssn.conn.as_ref() else {
            return Err(Error::NotConnected);
        };
        if !conn.is_tls() {
            return Ok(());
        }
        let chain = conn.peer_certificates().unwrap_or_default();
        crate::cert::evaluate(
            &chain,
            &ssn.account.server,
            &self.tls,
            &self.pins,
            self.prompt.as_ref(),
        )
    }

    fn live<'a>(
        sessions: &'a mut HashMap<Account, Session>,
        account: &Account,
    ) -> Result<&'a mut Session> {
        sessions
            .get_mut(account)
            .filter(|ssn| ssn.is_live())
            .ok_or(Error::NotConnected)
    }

    /// Route a verb's outcome through the recovery policy.
    async fn settle(&mut self, account: &Account, result: Result<Status>) -> Result<Status> {
        match result {
            Ok(Status::Bye) => {
                warn!(server = %account.server, "server closed the session (BYE)");
                if self.options.recover == Recover::All {
                    match self.try_recover(account).await {
                        Ok(status) => Ok(status),
                        Err(_) => Ok(Status::Bye),
                    }
                } else {
                    self.destroy(account);
                    Ok(Status::Bye)
                }
            }
            Err(e) if e.is_transport() => {
                warn!(server = %account.server, "transport failure: {e}");
                if matches!(self.options.recover, Recover::All | Recover::Errors) {
                    match self.try_recover(account).await {
                        Ok(status) => Ok(status),
                        Err(_) => Err(e),
                    }
                } else {
                    self.destroy(account);
                    Err(e)
                }
            }
            other => other,
        }
    }

    async fn settle_pair<T>(
        &mut self,
        account: &Account,
        result: Result<(Status, T)>,
        empty: T,
    ) -> Result<(Status, T)> {
        match result {
            Ok((status, value)) => {
                let settled = self.settle(account, Ok(status)).await?;
                if settled == status {
                    Ok((status, value))
                } else {
                    Ok((settled, empty))
                }
            }
            Err(e) => {
                let settled = self.settle(account, Err(e)).await?;
                Ok((settled, empty))
            }
        }
    }

    /// One silent reconnect-and-login attempt. On success the caller
    /// gets [`Status::None`]; on failure the session is gone.
    async fn try_recover(&mut self, account: &Account) -> Result<Status> {
        let Some(mut ssn) = self.sessions.remove(account) else {
            return Err(Error::NotConnected);
        };
        ssn.disconnect();
        info!(server = %account.server, user = %account.username, "recovering session");

        match self.bootstrap(&mut ssn).await {
            Ok(status) if status.is_success() => {
                self.sessions.insert(account.clone(), ssn);
                info!(server = %account.server, "session recovered");
                Ok(Status::None)
            }
            Ok(_) => {
                error!(server = %account.server, "session recovery refused by server");
                Err(Error::NotConnected)
            }
            Err(e) => {
                error!(server = %account.server, "session recovery failed: {e}");
                Err(Error::NotConnected)
            }
        }
    }

    fn destroy(&mut self, account: &Account) {
        if let Some(mut ssn) = self.sessions.remove(account) {
            ssn.disconnect();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MailboxVerb {
    Create,
    Delete,
    Subscribe,
    Unsubscribe,
}
