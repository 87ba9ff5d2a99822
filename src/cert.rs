//! Certificate gate and pinning store
//!
//! A TLS handshake ends with the server's chain in hand but not yet
//! judged (see `tls.rs`). The gate then decides:
//!
//! 1. chain verifies against the trust roots -> accept;
//! 2. otherwise look the certificate up in the user's pinned-certificates
//!    file by Subject, Issuer + Serial and MD5 fingerprint;
//! 3. unknown certificate: ask the user (interactive) or fail
//!    (non-interactive). A fingerprint *mismatch* against a pinned record
//!    is never silently accepted.
//!
//! The pinning file is append-only, created user-readable only, and holds
//! `Subject:` / `Issuer:` / `Serial:` header lines followed by the PEM
//! certificate for each accepted peer. MD5 here identifies a certificate
//! already in hand; it is not used as a security primitive.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use rustls::pki_types::CertificateDer;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, IsTerminal, Write as _};
use std::path::PathBuf;
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// What to do with a certificate the trust store does not vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDecision {
    /// Refuse the connection.
    Reject,
    /// Accept for this session only.
    Temporary,
    /// Accept and append to the pinning file.
    Permanent,
}

/// Peer certificate details, shown when asking for a decision.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    /// MD5 fingerprint as colon-separated uppercase hex.
    pub fingerprint: String,
}

/// Source of decisions about untrusted certificates.
///
/// The default implementation prompts on the controlling terminal;
/// embedders (and tests) can supply their own.
pub trait CertificatePrompt: Send + Sync {
    /// Whether anyone is present to answer.
    fn interactive(&self) -> bool;

    /// Decide about a certificate that is neither trusted nor pinned.
    fn decide(&self, info: &CertificateInfo) -> PinDecision;

    /// Decide about a pinned certificate whose fingerprint changed.
    /// Permanent acceptance is not offered here.
    fn decide_mismatch(&self, info: &CertificateInfo) -> PinDecision {
        let _ = info;
        PinDecision::Reject
    }
}

/// Prompt on the controlling terminal.
pub struct TtyPrompt;

impl TtyPrompt {
    fn print_info(info: &CertificateInfo) {
        println!("Server certificate subject: {}", info.subject);
        println!("Server certificate issuer: {}", info.issuer);
        println!("Server certificate serial: {}", info.serial);
        println!("Server key fingerprint: {}", info.fingerprint);
    }

    fn read_choice(prompt: &str) -> Option<char> {
        print!("{prompt}");
        std::io::stdout().flush().ok()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok()?;
        line.trim().chars().next()
    }
}

impl CertificatePrompt for TtyPrompt {
    fn interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn decide(&self, info: &CertificateInfo) -> PinDecision {
        Self::print_info(info);
        match Self::read_choice("(R)eject, accept (t)emporarily or (p)ermanently? ") {
            Some('t' | 'T') => PinDecision::Temporary,
            Some('p' | 'P') => PinDecision::Permanent,
            _ => PinDecision::Reject,
        }
    }

    fn decide_mismatch(&self, info: &CertificateInfo) -> PinDecision {
        println!("WARNING: server certificate does not match the pinned certificate");
        Self::print_info(info);
        match Self::read_choice("(R)eject or accept (t)emporarily? ") {
            Some('t' | 'T') => PinDecision::Temporary,
            _ => PinDecision::Reject,
        }
    }
}

/// Result of looking a peer certificate up in the pinning file.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PinCheck {
    NotFound,
    Match,
    Mismatch,
}

/// The on-disk pinned-certificates file.
pub(crate) struct PinStore {
    path: Option<PathBuf>,
}

impl PinStore {
    pub(crate) const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Look the peer up by Subject, Issuer + Serial, then compare MD5
    /// fingerprints. Unreadable records are skipped.
    pub(crate) fn check(&self, peer: &CertificateDer<'_>) -> Result<PinCheck> {
        let Some(path) = &self.path else {
            return Ok(PinCheck::NotFound);
        };
        if !path.exists() {
            return Ok(PinCheck::NotFound);
        }

        let peer_id = CertIdentity::of(peer)?;
        let peer_md5 = fingerprint(peer);

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        for pinned in rustls_pemfile::certs(&mut reader) {
            let Ok(pinned) = pinned else { continue };
            let Ok(pinned_id) = CertIdentity::of(&pinned) else {
                continue;
            };
            if pinned_id != peer_id {
                continue;
            }
            if fingerprint(&pinned) == peer_md5 {
                return Ok(PinCheck::Match);
            }
            return Ok(PinCheck::Mismatch);
        }
        Ok(PinCheck::NotFound)
    }

    /// Append a record for the peer. The file is created with user-only
    /// permissions and never rewritten.
    pub(crate) fn append(&self, peer: &CertificateDer<'_>, info: &CertificateInfo) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(Error::Config(
                "no pinned-certificates file configured".into(),
            ));
        };

        let mut open = OpenOptions::new();
        open.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }
        let mut file = open.open(path)?;
        writeln!(file, "Subject: {}", info.subject)?;
        writeln!(file, "Issuer: {}", info.issuer)?;
        writeln!(file, "Serial: {}", info.serial)?;
        file.write_all(pem_encode(peer).as_bytes())?;
        debug!("pinned certificate {} in {}", info.fingerprint, path.display());
        Ok(())
    }
}

/// The fields a pinned record is matched on.
#[derive(Debug, PartialEq, Eq)]
struct CertIdentity {
    subject: String,
    issuer: String,
    serial: String,
}

impl CertIdentity {
    fn of(cert: &CertificateDer<'_>) -> Result<Self> {
        let (_, parsed) = parse_x509_certificate(cert.as_ref())
            .map_err(|e| Error::Certificate(format!("unparseable certificate: {e}")))?;
        Ok(Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial: parsed.raw_serial_as_string(),
        })
    }
}

fn fingerprint(cert: &CertificateDer<'_>) -> [u8; 16] {
    Md5::digest(cert.as_ref()).into()
}

fn fingerprint_display(md: &[u8; 16]) -> String {
    md.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Human-facing description of a peer certificate.
pub(crate) fn describe(cert: &CertificateDer<'_>) -> Result<CertificateInfo> {
    let id = CertIdentity::of(cert)?;
    Ok(CertificateInfo {
        subject: id.subject,
        issuer: id.issuer,
        serial: id.serial,
        fingerprint: fingerprint_display(&fingerprint(cert)),
    })
}

fn pem_encode(cert: &CertificateDer<'_>) -> String {
    let encoded = STANDARD.encode(cert.as_ref());
    let mut out = String::with_capacity(encoded.len() + 64);
    out.push_str("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

/// Run the certificate gate on a handshake's chain.
pub(crate) fn evaluate(
    chain: &[CertificateDer<'static>],
    server: &str,
    tls: &crate::tls::TlsSettings,
    pins: &PinStore,
    prompt: &dyn CertificatePrompt,
) -> Result<()> {
    let Some(peer) = chain.first() else {
        return Err(Error::Certificate("server presented no certificate".into()));
    };

    if tls.verify_chain(chain, server).is_ok() {
        debug!("certificate for {server} verified by trust store");
        return Ok(());
    }

    let info = describe(peer)?;
    match pins.check(peer)? {
        PinCheck::Match => {
            debug!("certificate for {server} matches pinned record");
            Ok(())
        }
        PinCheck::Mismatch => {
            warn!("certificate for {server} does not match its pinned record");
            if prompt.interactive() && prompt.decide_mismatch(&info) == PinDecision::Temporary {
                Ok(())
            } else {
                Err(Error::Certificate(format!(
                    "certificate mismatch for {server}"
                )))
            }
        }
        PinCheck::NotFound => {
            if !prompt.interactive() {
                return Err(Error::Certificate(format!(
                    "cannot accept certificate for {server} in non-interactive mode"
                )));
            }
            match prompt.decide(&info) {
                PinDecision::Permanent => {
                    pins.append(peer, &info)?;
                    Ok(())
                }
                PinDecision::Temporary => Ok(()),
                PinDecision::Reject => Err(Error::Certificate(format!(
                    "certificate for {server} rejected"
                ))),
            }
        }
    }
}
