//! Test data model for the fake IMAP server
//!
//! Provides a builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, false, raw_rfc2822_bytes)
//!         .email(2, true, raw_rfc2822_bytes)
//!     .folder_with_attrs("Lists", &["\\NoSelect", "\\HasChildren"])
//!     .build();
//! ```
//!
//! Folder names are stored in *server* form (namespace prefix and
//! modified UTF-7 already applied) because that is what arrives on the
//! wire; the engine under test does the conversion.

/// A complete mailbox: a collection of named folders, each holding
/// zero or more test emails.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn get_folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

/// A single IMAP folder, with the attributes it reports in LIST.
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub attrs: Vec<String>,
    pub emails: Vec<TestEmail>,
}

impl Folder {
    /// The next UID this folder would assign.
    pub fn uidnext(&self) -> u32 {
        self.emails.iter().map(|e| e.uid).max().map_or(1, |m| m + 1)
    }
}

/// A test email stored in a folder.
///
/// - `uid`: unique-per-folder number that never changes (unlike
///   sequence numbers, which shift on delete).
/// - `seen` / `deleted`: the `\Seen` and `\Deleted` flags.
/// - `raw`: the complete RFC 2822 message (headers + body) as bytes.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub seen: bool,
    pub deleted: bool,
    pub raw: Vec<u8>,
}

impl TestEmail {
    /// Render the flag list for a FETCH response.
    pub fn flags(&self) -> String {
        let mut flags = Vec::new();
        if self.seen {
            flags.push("\\Seen");
        }
        if self.deleted {
            flags.push("\\Deleted");
        }
        flags.join(" ")
    }
}

/// Whether a UID is in an IMAP sequence set like `1,3:5,9:*`.
pub fn set_contains(set: &str, uid: u32) -> bool {
    set.split(',').any(|part| {
        if let Some((lo, hi)) = part.split_once(':') {
            let lo: u32 = lo.parse().unwrap_or(0);
            if hi == "*" {
                uid >= lo
            } else {
                let hi: u32 = hi.parse().unwrap_or(0);
                lo <= uid && uid <= hi
            }
        } else {
            part.parse() == Ok(uid)
        }
    })
}

/// Builder for constructing a `Mailbox` step by step.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(self, name: &str) -> Self {
        self.folder_with_attrs(name, &[])
    }

    /// Add a new folder with explicit LIST attributes.
    pub fn folder_with_attrs(mut self, name: &str, attrs: &[&str]) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            attrs: attrs.iter().map(|a| (*a).to_string()).collect(),
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, seen: bool, raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                uid,
                seen,
                deleted: false,
                raw: raw.to_vec(),
            });
        self
    }

    /// Consume the builder and return the finished `Mailbox`.
    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_membership() {
        assert!(set_contains("42", 42));
        assert!(!set_contains("42", 41));
        assert!(set_contains("1:3", 2));
        assert!(!set_contains("1:3", 4));
        assert!(set_contains("1,5:7,9", 6));
        assert!(set_contains("3:*", 100));
        assert!(!set_contains("3:*", 2));
    }

    #[test]
    fn uidnext_is_max_plus_one() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(5, true, b"x")
            .email(9, false, b"x")
            .build();
        assert_eq!(mailbox.get_folder("INBOX").unwrap().uidnext(), 10);

        let empty = MailboxBuilder::new().folder("INBOX").build();
        assert_eq!(empty.get_folder("INBOX").unwrap().uidnext(), 1);
    }
}
