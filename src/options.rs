//! Engine options
//!
//! A read-only snapshot of the host's option table. The scripting layer
//! owns the table; the engine only consumes it. Defaults follow the
//! conventional behavior of interactive mail filters: STARTTLS and
//! CRAM-MD5 opportunistic, namespace handling and certificate checks on,
//! destructive conveniences (auto-create, auto-subscribe) off.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// When to attempt a silent reconnect-and-login after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recover {
    /// Never reconnect; every failure is surfaced.
    None,
    /// Reconnect after transport failures only.
    Errors,
    /// Reconnect after transport failures and after a server `BYE`.
    All,
}

impl FromStr for Recover {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "errors" => Ok(Self::Errors),
            "all" => Ok(Self::All),
            other => Err(Error::Config(format!("invalid recover mode: {other}"))),
        }
    }
}

/// Engine-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Per-read timeout in seconds; `0` disables the timeout.
    pub timeout: u64,
    /// IDLE keepalive period in minutes (fractions allowed); a
    /// `DONE`/`IDLE` round-trip is forced at least this often. `0`
    /// disables the keepalive.
    pub keepalive: f64,
    /// Upgrade plain connections via STARTTLS when the server offers it.
    pub starttls: bool,
    /// Prefer CRAM-MD5 over plaintext LOGIN when advertised.
    pub crammd5: bool,
    /// Ask the server for its namespace and apply it to mailbox names.
    pub namespace: bool,
    /// Run the certificate gate on TLS connections.
    pub certificates: bool,
    /// Treat any `NO` on COPY/APPEND as `[TRYCREATE]`.
    pub create: bool,
    /// Issue EXPUNGE after a STORE that sets `\Deleted`.
    pub expunge: bool,
    /// SUBSCRIBE mailboxes created by the TRYCREATE path.
    pub subscribe: bool,
    /// Skip commands that would change server state.
    pub dryrun: bool,
    /// Wake IDLE on any untagged response, not just EXISTS/RECENT.
    pub wakeonany: bool,
    /// Reconnect policy.
    pub recover: Recover,
    /// Extra PEM bundle added to the TLS trust roots.
    pub ca_bundle: Option<PathBuf>,
    /// Pinned-certificates file consulted and appended by the gate.
    pub pinned_certs: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: 0,
            keepalive: 29.0,
            starttls: true,
            crammd5: true,
            namespace: true,
            certificates: true,
            create: false,
            expunge: true,
            subscribe: false,
            dryrun: false,
            wakeonany: false,
            recover: Recover::Errors,
            ca_bundle: None,
            pinned_certs: None,
        }
    }
}

impl EngineOptions {
    /// Load options from environment variables.
    ///
    /// Reads from `.env` if present. All variables are optional and
    /// prefixed with `MAILSWEEP_` (e.g. `MAILSWEEP_TIMEOUT`,
    /// `MAILSWEEP_STARTTLS`, `MAILSWEEP_RECOVER`); unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            timeout: env_number("MAILSWEEP_TIMEOUT", defaults.timeout)?,
            keepalive: env_float("MAILSWEEP_KEEPALIVE", defaults.keepalive)?,
            starttls: env_flag("MAILSWEEP_STARTTLS", defaults.starttls)?,
            crammd5: env_flag("MAILSWEEP_CRAMMD5", defaults.crammd5)?,
            namespace: env_flag("MAILSWEEP_NAMESPACE", defaults.namespace)?,
            certificates: env_flag("MAILSWEEP_CERTIFICATES", defaults.certificates)?,
            create: env_flag("MAILSWEEP_CREATE", defaults.create)?,
            expunge: env_flag("MAILSWEEP_EXPUNGE", defaults.expunge)?,
            subscribe: env_flag("MAILSWEEP_SUBSCRIBE", defaults.subscribe)?,
            dryrun: env_flag("MAILSWEEP_DRYRUN", defaults.dryrun)?,
            wakeonany: env_flag("MAILSWEEP_WAKEONANY", defaults.wakeonany)?,
            recover: match env::var("MAILSWEEP_RECOVER") {
                Ok(v) => v.parse()?,
                Err(_) => defaults.recover,
            },
            ca_bundle: env::var("MAILSWEEP_CA_BUNDLE").ok().map(PathBuf::from),
            pinned_certs: env::var("MAILSWEEP_PINNED_CERTS").ok().map(PathBuf::from),
        })
    }

    /// The per-read timeout, `None` when disabled.
    #[must_use]
    pub const fn timeout_duration(&self) -> Option<Duration> {
        if self.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout))
        }
    }

    /// The IDLE keepalive period, `None` when disabled.
    #[must_use]
    pub fn keepalive_duration(&self) -> Option<Duration> {
        if self.keepalive <= 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(self.keepalive * 60.0))
        }
    }
}

fn env_number(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| Error::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_float(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| Error::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("invalid {key}: {other}"))),
        },
        Err(_) => Ok(default),
    }
}
