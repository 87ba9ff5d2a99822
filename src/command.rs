//! Command formatting
//!
//! Every command goes out as `TTTT VERB args\r\n`, where `TTTT` is the
//! four-uppercase-hex-digit tag the server echoes in its completion line.
//! Rendering and logging are separate: [`Command::render`] produces the
//! wire bytes, [`Command::logged`] the same line with secrets replaced by
//! `*`, so credentials never reach the log.
//!
//! Mailbox names are wrapped in double quotes with no escaping; a name
//! containing `"` cannot be expressed by this formatter and such names are
//! not expected from server LIST output.

use secrecy::{ExposeSecret, SecretString};
use std::fmt::Write as _;

/// Monotonic command-tag sequence.
///
/// Tags run from `0x1000` to `0xFFFF` and wrap back to `0x1000`, so a tag
/// is always exactly four hex digits.
#[derive(Debug)]
pub(crate) struct TagSequence {
    next: u16,
}

impl TagSequence {
    pub(crate) const FIRST: u16 = 0x1000;

    pub(crate) const fn new() -> Self {
        Self { next: Self::FIRST }
    }

    pub(crate) const fn next(&mut self) -> u16 {
        let tag = self.next;
        self.next = if tag == 0xFFFF { Self::FIRST } else { tag + 1 };
        tag
    }
}

/// One IMAP command with its arguments, ready to be tagged and rendered.
///
/// Mailbox arguments are expected in server form (namespace already
/// applied).
#[derive(Debug)]
pub(crate) enum Command<'a> {
    Capability,
    Noop,
    Logout,
    StartTls,
    Login {
        user: &'a str,
        pass: &'a SecretString,
    },
    Authenticate {
        mechanism: &'a str,
        initial: Option<&'a SecretString>,
    },
    Namespace,
    Status {
        mailbox: &'a str,
    },
    Select {
        mailbox: &'a str,
    },
    Examine {
        mailbox: &'a str,
    },
    Close,
    Expunge,
    List {
        reference: &'a str,
        pattern: &'a str,
    },
    Lsub {
        reference: &'a str,
        pattern: &'a str,
    },
    Search {
        charset: Option<&'a str>,
        criteria: &'a str,
    },
    Fetch {
        set: &'a str,
        items: &'a str,
    },
    Store {
        set: &'a str,
        prefix: &'static str,
        flags: &'a str,
    },
    Copy {
        set: &'a str,
        mailbox: &'a str,
    },
    Append {
        mailbox: &'a str,
        flags: Option<&'a str>,
        date: Option<&'a str>,
        size: usize,
    },
    Create {
        mailbox: &'a str,
    },
    Delete {
        mailbox: &'a str,
    },
    Rename {
        from: &'a str,
        to: &'a str,
    },
    Subscribe {
        mailbox: &'a str,
    },
    Unsubscribe {
        mailbox: &'a str,
    },
    Idle,
}

impl Command<'_> {
    /// The full wire line, CRLF included.
    pub(crate) fn render(&self, tag: u16) -> String {
        let mut line = format!("{tag:04X} ");
        self.write_body(&mut line, false);
        line.push_str("\r\n");
        line
    }

    /// The wire line with secrets shrouded, for the log.
    pub(crate) fn logged(&self, tag: u16) -> String {
        let mut line = format!("{tag:04X} ");
        self.write_body(&mut line, true);
        line
    }

    #[allow(clippy::too_many_lines)]
    fn write_body(&self, out: &mut String, redact: bool) {
        match self {
            Self::Capability => out.push_str("CAPABILITY"),
            Self::Noop => out.push_str("NOOP"),
            Self::Logout => out.push_str("LOGOUT"),
            Self::StartTls => out.push_str("STARTTLS"),
            Self::Login { user, pass } => {
                if redact {
                    let _ = write!(out, "LOGIN \"{user}\" *");
                } else {
                    let _ = write!(out, "LOGIN \"{user}\" \"{}\"", pass.expose_secret());
                }
            }
            Self::Authenticate { mechanism, initial } => {
                let _ = write!(out, "AUTHENTICATE {mechanism}");
                if let Some(initial) = initial {
                    if redact {
                        out.push_str(" *");
                    } else {
                        let _ = write!(out, " {}", initial.expose_secret());
                    }
                }
            }
            Self::Namespace => out.push_str("NAMESPACE"),
            Self::Status { mailbox } => {
                let _ = write!(
                    out,
                    "STATUS \"{mailbox}\" (MESSAGES RECENT UNSEEN UIDNEXT)"
                );
            }
            Self::Select { mailbox } => {
                let _ = write!(out, "SELECT \"{mailbox}\"");
            }
            Self::Examine { mailbox } => {
                let _ = write!(out, "EXAMINE \"{mailbox}\"");
            }
            Self::Close => out.push_str("CLOSE"),
            Self::Expunge => out.push_str("EXPUNGE"),
            Self::List { reference, pattern } => {
                let _ = write!(out, "LIST \"{reference}\" \"{pattern}\"");
            }
            Self::Lsub { reference, pattern } => {
                let _ = write!(out, "LSUB \"{reference}\" \"{pattern}\"");
            }
            Self::Search { charset, criteria } => match charset {
                Some(cs) if !cs.is_empty() => {
                    let _ = write!(out, "UID SEARCH CHARSET \"{cs}\" {criteria}");
                }
                _ => {
                    let _ = write!(out, "UID SEARCH {criteria}");
                }
            },
            Self::Fetch { set, items } => {
                let _ = write!(out, "UID FETCH {set} {items}");
            }
            Self::Store { set, prefix, flags } => {
                let _ = write!(out, "UID STORE {set} {prefix}FLAGS.SILENT ({flags})");
            }
            Self::Copy { set, mailbox } => {
                let _ = write!(out, "UID COPY {set} \"{mailbox}\"");
            }
            Self::Append {
                mailbox,
                flags,
                date,
                size,
            } => {
                let _ = write!(out, "APPEND \"{mailbox}\"");
                if let Some(flags) = flags {
                    let _ = write!(out, " ({flags})");
                }
                if let Some(date) = date {
                    let _ = write!(out, " \"{date}\"");
                }
                let _ = write!(out, " {{{size}}}");
            }
            Self::Create { mailbox } => {
                let _ = write!(out, "CREATE \"{mailbox}\"");
            }
            Self::Delete { mailbox } => {
                let _ = write!(out, "DELETE \"{mailbox}\"");
            }
            Self::Rename { from, to } => {
                let _ = write!(out, "RENAME \"{from}\" \"{to}\"");
            }
            Self::Subscribe { mailbox } => {
                let _ = write!(out, "SUBSCRIBE \"{mailbox}\"");
            }
            Self::Unsubscribe { mailbox } => {
                let _ = write!(out, "UNSUBSCRIBE \"{mailbox}\"");
            }
            Self::Idle => out.push_str("IDLE"),
        }
    }
}
