//! Mailbox namespace mapping and modified UTF-7
//!
//! Mailbox names cross two representations:
//!
//! - **internal**: what the caller sees -- UTF-8, `/` as the hierarchy
//!   separator, no server prefix.
//! - **server**: what goes on the wire -- modified UTF-7 (RFC 3501
//!   Section 5.1.3), the server's hierarchy delimiter, and the personal
//!   namespace prefix the server advertised via NAMESPACE (RFC 2342).
//!
//! [`Namespace::apply`] converts internal to server form before a name is
//! sent; [`Namespace::reverse`] converts names read from LIST/LSUB output
//! back. `INBOX` is special-cased by RFC 3501 (case-insensitive, never
//! prefixed, never encoded) and passes through both directions unchanged.

use base64::Engine as _;
use base64::alphabet::Alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use std::sync::LazyLock;
use tracing::debug;

/// Base64 variant of RFC 3501 Section 5.1.3: the standard alphabet with
/// `,` in place of `/`, and no padding. The `+` shift-in character is
/// rewritten to `&` outside of base64 proper.
static MODIFIED_B64: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    let alphabet =
        Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,")
            .expect("fixed alphabet is valid");
    GeneralPurpose::new(
        &alphabet,
        GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_padding_mode(DecodePaddingMode::RequireNone),
    )
});

/// The personal-namespace wrapping advertised by the server.
///
/// Both fields absent (or a bare `/` delimiter) means names only need the
/// UTF-7 conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    /// Prefix of personal mailboxes, in server form (e.g. `INBOX.`).
    pub prefix: Option<String>,
    /// Hierarchy delimiter (e.g. `.`).
    pub delim: Option<char>,
}

impl Namespace {
    fn is_plain(&self) -> bool {
        self.prefix.is_none() && matches!(self.delim, None | Some('/'))
    }

    /// Convert an internal mailbox name to server form.
    pub fn apply(&self, mbox: &str) -> String {
        if mbox.eq_ignore_ascii_case("INBOX") {
            return mbox.to_string();
        }

        let converted = apply_conversion(mbox);
        if self.is_plain() {
            return converted;
        }

        let mut out = String::with_capacity(converted.len());
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
        }
        out.push_str(&converted);
        if let Some(delim) = self.delim {
            out = out.replace('/', &delim.to_string());
        }

        debug!("namespace: '{converted}' -> '{out}'");
        out
    }

    /// Convert a mailbox name read from server output to internal form.
    pub fn reverse(&self, mbox: &str) -> String {
        if mbox.eq_ignore_ascii_case("INBOX") {
            return mbox.to_string();
        }

        if self.is_plain() {
            return reverse_conversion(mbox);
        }

        let mut rest = mbox;
        if let Some(prefix) = &self.prefix
            && rest.len() >= prefix.len()
            && rest.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
            && let Some(stripped) = rest.get(prefix.len()..)
        {
            rest = stripped;
        }
        let replaced = match self.delim {
            Some(delim) => rest.replace(delim, "/"),
            None => rest.to_string(),
        };

        debug!("namespace: '{mbox}' <- '{replaced}'");
        reverse_conversion(&replaced)
    }
}

/// Encode a name to modified UTF-7, leaving a trailing LIST wildcard
/// (`*` or `%`) outside the conversion.
fn apply_conversion(mbox: &str) -> String {
    let (body, wildcard) = match mbox.as_bytes().last() {
        Some(b'*') => (&mbox[..mbox.len() - 1], Some('*')),
        Some(b'%') => (&mbox[..mbox.len() - 1], Some('%')),
        _ => (mbox, None),
    };
    let mut out = utf7_encode(body);
    if let Some(w) = wildcard {
        out.push(w);
    }
    out
}

/// Decode a server name from modified UTF-7. A name that does not decode
/// (overlong run, bad base64, unterminated shift) is passed through
/// unchanged, like any other string the server made up.
fn reverse_conversion(mbox: &str) -> String {
    utf7_decode(mbox).unwrap_or_else(|| mbox.to_string())
}

/// RFC 3501 Section 5.1.3 encoder.
///
/// Printable ASCII (0x20-0x7E) passes through, `&` becomes `&-`, and
/// every maximal run of other characters is emitted as
/// `&<base64 of UTF-16BE>-`.
pub(crate) fn utf7_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut run: Vec<u16> = Vec::new();

    for c in name.chars() {
        if ('\x20'..='\x7e').contains(&c) {
            flush_run(&mut out, &mut run);
            if c == '&' {
                out.push_str("&-");
            } else {
                out.push(c);
            }
        } else {
            let mut units = [0u16; 2];
            run.extend_from_slice(c.encode_utf16(&mut units));
        }
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut Vec<u16>) {
    if run.is_empty() {
        return;
    }
    let mut bytes = Vec::with_capacity(run.len() * 2);
    for unit in run.drain(..) {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    out.push('&');
    out.push_str(&MODIFIED_B64.encode(&bytes));
    out.push('-');
}

/// RFC 3501 Section 5.1.3 decoder. Returns `None` when the input is not
/// well-formed modified UTF-7.
pub(crate) fn utf7_decode(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = String::with_capacity(name.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'&' {
            let end = bytes[i + 1..].iter().position(|&c| c == b'-')? + i + 1;
            if end == i + 1 {
                out.push('&');
            } else {
                let decoded = MODIFIED_B64.decode(&name[i + 1..end]).ok()?;
                if decoded.len() % 2 != 0 {
                    return None;
                }
                let units = decoded
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]));
                for r in char::decode_utf16(units) {
                    out.push(r.ok()?);
                }
            }
            i = end + 1;
        } else if b.is_ascii() {
            out.push(char::from(b));
            i += 1;
        } else {
            return None;
        }
    }
    Some(out)
}
