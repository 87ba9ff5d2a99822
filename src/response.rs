//! Response parsing
//!
//! Server output is matched against a table of regular expressions
//! compiled once at first use, mirroring RFC 3501's line shapes for the
//! subset of responses the engine consumes. A command's read loop
//! appends chunks to the session's input buffer until the tagged
//! completion for that command appears; untagged data accumulated along
//! the way is then picked apart by the per-command extractors.
//!
//! FETCH bodies need the one extra rule: once a literal `{N}` is
//! announced, the completion (and BYE) search starts *after* the literal
//! bytes, so message content can never be mistaken for protocol.

use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::options::EngineOptions;
use crate::session::{Capabilities, Protocol, Session};
use crate::status::Status;
use regex::bytes::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9A-F]{4}) (OK|NO|BAD)( [^\r\n]*)?\r\n").expect("tagged pattern")
});
static UNTAGGED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\* (\d+) ([^ \r\n]+)[^\r\n]*\r\n").expect("untagged pattern"));
static CAPABILITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\* CAPABILITY ([^\r\n]*)\r\n").expect("capability pattern"));
static CONTINUATION_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+ ([^ \r\n]*)\r\n").expect("continuation pattern"));
static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\* NAMESPACE (NIL|\(\("([^"\r\n]*)" "([^\r\n])"\)[^\r\n]*\)) (NIL|\([^\r\n]*\)) (NIL|\([^\r\n]*\))[^\r\n]*\r\n"#,
    )
    .expect("namespace pattern")
});
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\* STATUS [^\r\n]* \(([A-Za-z0-9 ]*)\)[^\r\n]*\r\n").expect("status pattern")
});
static STATUS_MESSAGES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)MESSAGES (\d+)").expect("messages pattern"));
static STATUS_RECENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RECENT (\d+)").expect("recent pattern"));
static STATUS_UNSEEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)UNSEEN (\d+)").expect("unseen pattern"));
static STATUS_UIDNEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)UIDNEXT (\d+)").expect("uidnext pattern"));
static EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\* (\d+) EXISTS *\r\n").expect("exists pattern"));
static RECENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\* (\d+) RECENT *\r\n").expect("recent-count pattern"));
static LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\* (LIST|LSUB) \(([^)\r\n]*)\) ("[^"\r\n]"|NIL) (?:"([^"\r\n]*)"|\{(\d+)\}\r\n([^\r\n]*)|([^\r\n]+))\r\n"#,
    )
    .expect("list pattern")
});
static SEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\* SEARCH ?([\d ]*)\r\n").expect("search pattern"));
static FETCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\* (\d+) FETCH \(([^\r\n]*)\) *\r\n").expect("fetch pattern")
});
static FETCH_FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)FLAGS \(([^)\r\n]*)\)").expect("fetch-flags pattern"));
static FETCH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)INTERNALDATE "([^"\r\n]*)""#).expect("fetch-date pattern")
});
static FETCH_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)RFC822\.SIZE (\d+)").expect("fetch-size pattern"));
static FETCH_STRUCTURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BODYSTRUCTURE (\(.*\))").expect("fetch-structure pattern"));
static FETCH_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\* \d+ FETCH \([^\r\n]*BODY\[[^\r\n]*\] (?:\{(\d+)\}\r\n|"([^"\r\n]*)")"#)
        .expect("fetch-body pattern")
});

/// Counters reported by STATUS (or EXAMINE on IMAP4 servers). Fields the
/// server omits stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
    pub recent: u32,
    pub unseen: u32,
    pub uidnext: u32,
}

/// Per-message metadata extracted from untagged FETCH responses. Only
/// the fields the issued FETCH asked for are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Message sequence number from the untagged response.
    pub seq: u32,
    pub flags: Option<String>,
    pub internal_date: Option<String>,
    pub size: Option<u32>,
    pub structure: Option<String>,
}

// ── byte-level checks ──────────────────────────────────────────────

fn contains_ci(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|w| w.eq_ignore_ascii_case(needle))
}

fn starts_ci(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// A BYE that is not the echo of our own LOGOUT means the server is
/// hanging up on us.
pub(crate) fn check_bye(buf: &[u8]) -> bool {
    contains_ci(buf, b"* BYE") && !contains_ci(buf, b" LOGOUT ")
}

pub(crate) fn check_preauth(buf: &[u8]) -> bool {
    contains_ci(buf, b"* PREAUTH")
}

pub(crate) fn check_continuation(buf: &[u8]) -> bool {
    buf.starts_with(b"+ ") || contains_ci(buf, b"\r\n+ ")
}

fn check_trycreate(buf: &[u8]) -> bool {
    contains_ci(buf, b"[TRYCREATE]")
}

/// Look for this command's tagged completion. Completions for other
/// tags (stale or foreign) are ignored and reading continues.
pub(crate) fn find_tagged(buf: &[u8], tag: u16) -> Status {
    let wanted = format!("{tag:04X}");
    let Some(caps) = TAGGED.captures(buf) else {
        return Status::None;
    };
    if !caps[1].eq_ignore_ascii_case(wanted.as_bytes()) {
        return Status::None;
    }

    let line = String::from_utf8_lossy(&caps[0]);
    debug!("S: {}", line.trim_end());

    match caps[2][0].to_ascii_uppercase() {
        b'O' => Status::Ok,
        b'N' => Status::No,
        _ => Status::Bad,
    }
}

fn map_trycreate(status: Status, buf: &[u8], options: &EngineOptions) -> Status {
    if status == Status::No && (check_trycreate(buf) || options.create) {
        Status::TryCreate
    } else {
        status
    }
}

// ── read loops ─────────────────────────────────────────────────────

/// Read until this command's tagged completion (or BYE) arrives.
pub(crate) async fn generic(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<Status> {
    ssn.buffer.reset();
    let status = loop {
        ssn.receive(options.timeout_duration(), true, None).await?;
        if check_bye(ssn.buffer.as_bytes()) {
            return Ok(Status::Bye);
        }
        let status = find_tagged(ssn.buffer.as_bytes(), tag);
        if status != Status::None {
            break status;
        }
    };
    Ok(map_trycreate(status, ssn.buffer.as_bytes(), options))
}

/// Read until either a `+` continuation request or the tagged
/// completion arrives.
pub(crate) async fn continuation(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<Status> {
    ssn.buffer.reset();
    let status = loop {
        ssn.receive(options.timeout_duration(), true, None).await?;
        if check_bye(ssn.buffer.as_bytes()) {
            return Ok(Status::Bye);
        }
        let status = find_tagged(ssn.buffer.as_bytes(), tag);
        if status != Status::None {
            break status;
        }
        if check_continuation(ssn.buffer.as_bytes()) {
            break Status::None;
        }
    };

    let status = map_trycreate(status, ssn.buffer.as_bytes(), options);
    if status == Status::None {
        return Ok(Status::Continue);
    }
    Ok(status)
}

/// Process the greeting the server sends on connect.
pub(crate) async fn greeting(ssn: &mut Session, options: &EngineOptions) -> Result<Status> {
    ssn.buffer.reset();
    ssn.receive(options.timeout_duration(), true, None).await?;

    let buf = ssn.buffer.as_bytes();
    debug!("S: {}", String::from_utf8_lossy(buf).trim_end());

    if check_bye(buf) {
        return Ok(Status::Bye);
    }
    if check_preauth(buf) {
        return Ok(Status::Preauth);
    }
    Ok(Status::None)
}

/// CAPABILITY: derive the protocol level and capability bits.
pub(crate) async fn capability(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<Status> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok(status);
    }

    ssn.protocol = Protocol::None;
    if let Some((protocol, capabilities)) = parse_capability(ssn.buffer.as_bytes())? {
        ssn.protocol = protocol;
        ssn.capabilities = capabilities;
    }
    Ok(status)
}

/// Extract protocol and capabilities from a CAPABILITY response line.
/// `None` when no capability line is present at all.
pub(crate) fn parse_capability(buf: &[u8]) -> Result<Option<(Protocol, Capabilities)>> {
    let Some(caps) = CAPABILITY.captures(buf) else {
        return Ok(None);
    };
    let line = &caps[1];

    let protocol = if contains_ci(line, b"IMAP4rev1") {
        Protocol::Imap4Rev1
    } else if contains_ci(line, b"IMAP4") {
        Protocol::Imap4
    } else {
        return Err(Error::Protocol(
            "server supports neither the IMAP4rev1 nor the IMAP4 protocol".into(),
        ));
    };

    let capabilities = Capabilities {
        namespace: contains_ci(line, b"NAMESPACE"),
        cram_md5: contains_ci(line, b"AUTH=CRAM-MD5"),
        starttls: contains_ci(line, b"STARTTLS"),
        children: contains_ci(line, b"CHILDREN"),
        idle: contains_ci(line, b"IDLE"),
        xoauth2: contains_ci(line, b"AUTH=XOAUTH2"),
    };
    Ok(Some((protocol, capabilities)))
}

/// AUTHENTICATE: wait for the `+` continuation and hand back the base64
/// challenge it carried.
pub(crate) async fn authenticate(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, Option<String>)> {
    let status = continuation(ssn, tag, options).await?;
    if status != Status::Continue {
        return Ok((status, None));
    }
    let challenge = CONTINUATION_DATA
        .captures(ssn.buffer.as_bytes())
        .map(|c| String::from_utf8_lossy(&c[1]).into_owned());
    Ok((Status::Continue, challenge))
}

/// NAMESPACE: store the first personal namespace's prefix and delimiter.
pub(crate) async fn namespace(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<Status> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok(status);
    }

    ssn.ns = parse_namespace(ssn.buffer.as_bytes());
    debug!(
        "namespace: '{}' '{}'",
        ssn.ns.prefix.as_deref().unwrap_or(""),
        ssn.ns.delim.map(String::from).unwrap_or_default()
    );
    Ok(status)
}

pub(crate) fn parse_namespace(buf: &[u8]) -> Namespace {
    NAMESPACE.captures(buf).map_or_else(Namespace::default, |c| {
        let prefix = c
            .get(2)
            .filter(|m| !m.as_bytes().is_empty())
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
        let delim = c
            .get(3)
            .and_then(|m| m.as_bytes().first())
            .map(|&b| char::from(b));
        Namespace { prefix, delim }
    })
}

/// STATUS: extract the four counters.
pub(crate) async fn status_counts(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, MailboxStatus)> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok((status, MailboxStatus::default()));
    }
    Ok((status, parse_status(ssn.buffer.as_bytes())))
}

pub(crate) fn parse_status(buf: &[u8]) -> MailboxStatus {
    let mut out = MailboxStatus::default();
    if let Some(caps) = STATUS_LINE.captures(buf) {
        let fields = &caps[1];
        out.exists = field_number(fields, &STATUS_MESSAGES);
        out.recent = field_number(fields, &STATUS_RECENT);
        out.unseen = field_number(fields, &STATUS_UNSEEN);
        out.uidnext = field_number(fields, &STATUS_UIDNEXT);
    }
    out
}

/// EXAMINE: the IMAP4 fallback for STATUS; only EXISTS and RECENT are
/// reported.
pub(crate) async fn examine(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, MailboxStatus)> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok((status, MailboxStatus::default()));
    }
    let buf = ssn.buffer.as_bytes();
    let counts = MailboxStatus {
        exists: field_number(buf, &EXISTS),
        recent: field_number(buf, &RECENT),
        ..MailboxStatus::default()
    };
    Ok((status, counts))
}

/// SELECT: like `generic`, plus `[READ-ONLY]` detection.
pub(crate) async fn select(ssn: &mut Session, tag: u16, options: &EngineOptions) -> Result<Status> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok(status);
    }
    if contains_ci(ssn.buffer.as_bytes(), b"[READ-ONLY]") {
        return Ok(Status::ReadOnly);
    }
    Ok(status)
}

/// LIST/LSUB: split entries into selectable mailboxes and folders that
/// may have children, names converted back to internal form.
pub(crate) async fn list(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, Vec<String>, Vec<String>)> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok((status, Vec::new(), Vec::new()));
    }
    let (mailboxes, folders) = parse_list(
        ssn.buffer.as_bytes(),
        &ssn.ns,
        ssn.capabilities.children,
    );
    Ok((status, mailboxes, folders))
}

pub(crate) fn parse_list(
    buf: &[u8],
    ns: &Namespace,
    children_capability: bool,
) -> (Vec<String>, Vec<String>) {
    let mut mailboxes = Vec::new();
    let mut folders = Vec::new();

    for caps in LIST.captures_iter(buf) {
        let attrs = &caps[2];
        let name: Vec<u8> = if let Some(quoted) = caps.get(4) {
            quoted.as_bytes().to_vec()
        } else if let (Some(len), Some(line)) = (caps.get(5), caps.get(6)) {
            let n = ascii_number(len.as_bytes()).unwrap_or(0) as usize;
            let line = line.as_bytes();
            line[..n.min(line.len())].to_vec()
        } else if let Some(atom) = caps.get(7) {
            atom.as_bytes().to_vec()
        } else {
            continue;
        };

        let internal = ns.reverse(&String::from_utf8_lossy(&name));

        if !contains_ci(attrs, b"\\NoSelect") {
            mailboxes.push(internal.clone());
        }

        let children_ok = !children_capability
            || (contains_ci(attrs, b"\\HasChildren") && !contains_ci(attrs, b"\\HasNoChildren"));
        if !contains_ci(attrs, b"\\NoInferiors") && children_ok {
            folders.push(internal);
        }
    }

    (mailboxes, folders)
}

/// SEARCH: collect the UIDs from every `* SEARCH` line.
pub(crate) async fn search(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, Vec<u32>)> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok((status, Vec::new()));
    }
    Ok((status, parse_search(ssn.buffer.as_bytes())))
}

pub(crate) fn parse_search(buf: &[u8]) -> Vec<u32> {
    SEARCH
        .captures_iter(buf)
        .flat_map(|caps| {
            String::from_utf8_lossy(&caps[1])
                .split_whitespace()
                .filter_map(|n| n.parse().ok())
                .collect::<Vec<u32>>()
        })
        .collect()
}

/// FETCH (metadata forms): one summary per untagged FETCH response.
pub(crate) async fn fetch_summaries(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, Vec<FetchSummary>)> {
    let status = generic(ssn, tag, options).await?;
    if status == Status::Bye {
        return Ok((status, Vec::new()));
    }
    Ok((status, parse_fetch_summaries(ssn.buffer.as_bytes())))
}

pub(crate) fn parse_fetch_summaries(buf: &[u8]) -> Vec<FetchSummary> {
    FETCH
        .captures_iter(buf)
        .map(|caps| {
            let segment = &caps[2];
            FetchSummary {
                seq: ascii_number(&caps[1]).unwrap_or(0),
                flags: field_string(segment, &FETCH_FLAGS),
                internal_date: field_string(segment, &FETCH_DATE),
                size: FETCH_SIZE
                    .captures(segment)
                    .and_then(|c| ascii_number(&c[1])),
                structure: field_string(segment, &FETCH_STRUCTURE),
            }
        })
        .collect()
}

/// FETCH BODY[...]: return the message bytes.
///
/// When the body arrives as a literal `{N}`, the completion search is
/// held back until `N` bytes past the announcement are buffered and then
/// only looks beyond them, so body content that happens to resemble a
/// tagged line is never misread as one.
pub(crate) async fn fetch_body(
    ssn: &mut Session,
    tag: u16,
    options: &EngineOptions,
) -> Result<(Status, Vec<u8>)> {
    ssn.buffer.reset();

    // (start, len) of the body bytes inside the input buffer.
    let mut body: Option<(usize, usize)> = None;
    let mut search_from = 0usize;

    let status = loop {
        ssn.receive(options.timeout_duration(), true, None).await?;

        if body.is_none()
            && let Some(caps) = FETCH_BODY.captures(ssn.buffer.as_bytes())
        {
            let whole_end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            if let Some(len) = caps.get(1) {
                let len = ascii_number(len.as_bytes()).unwrap_or(0) as usize;
                body = Some((whole_end, len));
                search_from = whole_end + len;
            } else if let Some(quoted) = caps.get(2) {
                body = Some((quoted.start(), quoted.end() - quoted.start()));
                search_from = whole_end;
            }
        }

        if ssn.buffer.len() >= search_from {
            let tail = &ssn.buffer.as_bytes()[search_from..];
            if check_bye(tail) {
                return Ok((Status::Bye, Vec::new()));
            }
            let status = find_tagged(tail, tag);
            if status != Status::None {
                break status;
            }
        }
    };

    let bytes = body
        .map(|(start, len)| {
            let buf = ssn.buffer.as_bytes();
            let start = start.min(buf.len());
            let end = (start + len).min(buf.len());
            buf[start..end].to_vec()
        })
        .unwrap_or_default();
    Ok((status, bytes))
}

/// IDLE: wait for a server push, a keepalive timeout, or a wake signal.
///
/// Returns `Timeout` when the keepalive elapsed (the caller cycles
/// `DONE`/`IDLE`), or `Untagged` with the event token that ended the
/// wait. Only EXISTS/RECENT wake the loop unless `wakeonany` is set.
pub(crate) async fn idle_poll(
    ssn: &mut Session,
    keepalive: Option<Duration>,
    wakeonany: bool,
    wake: &CancellationToken,
) -> Result<(Status, Option<String>)> {
    loop {
        ssn.buffer.reset();
        let n = ssn.receive(keepalive, false, Some(wake)).await?;
        if n == 0 {
            return Ok((Status::Timeout, None));
        }

        let buf = ssn.buffer.as_bytes();
        debug!("S: {}", String::from_utf8_lossy(buf).trim_end());

        if check_bye(buf) {
            return Ok((Status::Bye, None));
        }
        let Some(caps) = UNTAGGED.captures(buf) else {
            continue;
        };
        let word = &caps[2];
        if wakeonany || starts_ci(word, b"EXISTS") || starts_ci(word, b"RECENT") {
            return Ok((
                Status::Untagged,
                Some(String::from_utf8_lossy(word).into_owned()),
            ));
        }
    }
}

fn field_number(haystack: &[u8], re: &Regex) -> u32 {
    re.captures(haystack)
        .and_then(|c| ascii_number(&c[1]))
        .unwrap_or(0)
}

fn field_string(haystack: &[u8], re: &Regex) -> Option<String> {
    re.captures(haystack)
        .map(|c| String::from_utf8_lossy(&c[1]).into_owned())
}

fn ascii_number(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}
