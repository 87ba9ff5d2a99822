//! Command completion statuses
//!
//! Every request primitive resolves to one of these statuses. `Ok`, `No`
//! and `Bad` mirror the three tagged completion results of RFC 3501
//! Section 7.1; the rest capture the in-band conditions the engine reacts
//! to (continuation requests, untagged wake-ups, `[TRYCREATE]`,
//! `[READ-ONLY]`, keepalive timeouts, `BYE`).

use serde::{Deserialize, Serialize};

/// Outcome of a single IMAP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// No tagged completion was obtained; after a transparent recovery the
    /// caller may simply retry the request.
    None,
    /// Tagged `OK`.
    Ok,
    /// Tagged `NO`.
    No,
    /// Tagged `BAD`.
    Bad,
    /// An untagged response satisfied the request (IDLE wake-up).
    Untagged,
    /// The server sent a `+` continuation request.
    Continue,
    /// The connection greeted us pre-authenticated, or the session was
    /// already live when `login` was called.
    Preauth,
    /// The mailbox was opened `[READ-ONLY]`.
    ReadOnly,
    /// Tagged `NO` carrying `[TRYCREATE]` (or mapped to it by the
    /// `create` option): the target mailbox must be created first.
    TryCreate,
    /// A keepalive wait elapsed without server activity.
    Timeout,
    /// The server announced it is closing the connection.
    Bye,
}

impl Status {
    /// Whether the exchange ended in a usable state (`OK`, `PREAUTH`, or a
    /// read-only open).
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Preauth | Self::ReadOnly)
    }
}
