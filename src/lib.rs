#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP client engine for scripted mailbox filtering
//!
//! Multiplexes logical requests over persistent authenticated IMAP
//! sessions: TLS (implicit or STARTTLS) with certificate pinning,
//! CRAM-MD5/XOAUTH2/LOGIN authentication, namespace-aware mailbox
//! naming with modified UTF-7, a regex-driven response parser that
//! handles untagged data and counted literals, IDLE long-polling with
//! keepalive, and transparent session recovery on transport failure.
//!
//! The [`Engine`] is the entry point; a host (typically an embedded
//! scripting layer) drives one verb at a time per [`Account`].

mod auth;
mod buffer;
mod cert;
mod command;
mod connection;
mod engine;
mod error;
mod flag;
mod namespace;
mod options;
mod response;
mod session;
mod status;
mod tls;

pub use cert::{CertificateInfo, CertificatePrompt, PinDecision, TtyPrompt};
pub use engine::{Engine, StoreMode};
pub use error::{Error, Result};
pub use flag::Flag;
pub use namespace::Namespace;
pub use options::{EngineOptions, Recover};
pub use response::{FetchSummary, MailboxStatus};
pub use secrecy::SecretString;
pub use session::{Account, Capabilities, LoginSpec, Protocol};
pub use status::Status;
pub use tls::TlsVersion;
