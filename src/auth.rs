//! CRAM-MD5 challenge-response computation (RFC 2195)
//!
//! The server's continuation carries a base64 challenge. The reply is
//! `base64(username SP hex(HMAC-MD5(password, challenge)))`, sent as
//! continuation data. The challenge is borrowed; the reply is an owned
//! string the dispatcher writes and forgets.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

/// Compute the CRAM-MD5 continuation line for a base64 challenge.
pub(crate) fn cram_md5_response(user: &str, pass: &str, challenge: &str) -> Result<String> {
    let decoded = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::Protocol(format!("invalid CRAM-MD5 challenge: {e}")))?;

    let mut mac = HmacMd5::new_from_slice(pass.as_bytes())
        .map_err(|e| Error::Protocol(format!("CRAM-MD5 keying failed: {e}")))?;
    mac.update(&decoded);
    let digest = mac.finalize().into_bytes();

    let reply = format!("{user} {}", hex::encode(digest));
    Ok(STANDARD.encode(reply.as_bytes()))
}
