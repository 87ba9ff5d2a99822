//! Message flags
//!
//! STORE and APPEND take flag lists, and the engine inspects them too
//! (a STORE touching `\Deleted` may trigger an automatic EXPUNGE), so
//! flags are typed rather than passed around as raw strings. The five
//! RFC 3501 system flags get their own variants; anything else a server
//! or script comes up with -- `$Junk`, `$Label1`, ... -- rides in
//! [`Flag::Keyword`].

use std::fmt;

/// One IMAP flag, as used in STORE and APPEND arguments.
///
/// # Examples
///
/// ```
/// use mailsweep::Flag;
///
/// assert_eq!(Flag::Deleted.as_imap_str(), "\\Deleted");
/// assert_eq!(
///     Flag::render_list(&[Flag::Seen, Flag::Deleted]),
///     "\\Seen \\Deleted"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// `\Seen`
    Seen,
    /// `\Answered`
    Answered,
    /// `\Flagged`
    Flagged,
    /// `\Deleted` -- the flag EXPUNGE acts on.
    Deleted,
    /// `\Draft`
    Draft,
    /// A keyword flag, sent without a backslash.
    Keyword(String),
}

impl Flag {
    /// Wire spelling of the flag, backslash included for system flags.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(kw) => kw,
        }
    }

    /// Join a flag list the way STORE and APPEND arguments want it:
    /// single spaces, no surrounding parentheses (the command formatter
    /// adds those).
    #[must_use]
    pub fn render_list(flags: &[Self]) -> String {
        flags
            .iter()
            .map(Self::as_imap_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<&str> for Flag {
    /// System-flag names compare case-insensitively, since servers echo
    /// them in whatever case they like; anything unrecognized becomes a
    /// keyword, verbatim.
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("\\Seen") {
            Self::Seen
        } else if s.eq_ignore_ascii_case("\\Answered") {
            Self::Answered
        } else if s.eq_ignore_ascii_case("\\Flagged") {
            Self::Flagged
        } else if s.eq_ignore_ascii_case("\\Deleted") {
            Self::Deleted
        } else if s.eq_ignore_ascii_case("\\Draft") {
            Self::Draft
        } else {
            Self::Keyword(s.to_string())
        }
    }
}
