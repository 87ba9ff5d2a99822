//! SELECT command handler.
//!
//! Opens a folder and responds with the metadata RFC 3501 Section 6.3.1
//! requires: FLAGS, EXISTS, RECENT, UIDVALIDITY, UIDNEXT, and UNSEEN
//! when an unread message exists. Returns the selected folder name (or
//! `None` if not found).

use crate::fake_imap::io::{unquote, write_line};
use crate::fake_imap::server::Shared;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the SELECT command. Returns (io ok, selected folder).
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    rest: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> (bool, Option<String>) {
    let name = unquote(rest.trim()).to_string();
    let snapshot = shared.mailbox.lock().unwrap().clone();

    let Some(folder) = snapshot.get_folder(&name) else {
        let resp = format!("{tag} NO Folder not found\r\n");
        return (write_line(stream, &resp).await.is_ok(), None);
    };

    let lines = [
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n".to_string(),
        format!("* {} EXISTS\r\n", folder.emails.len()),
        "* 0 RECENT\r\n".to_string(),
        "* OK [UIDVALIDITY 1]\r\n".to_string(),
        format!("* OK [UIDNEXT {}]\r\n", folder.uidnext()),
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited\r\n".to_string(),
    ];
    for line in &lines {
        if write_line(stream, line).await.is_err() {
            return (false, None);
        }
    }

    if let Some(pos) = folder.emails.iter().position(|e| !e.seen) {
        let line = format!("* OK [UNSEEN {}]\r\n", pos + 1);
        if write_line(stream, &line).await.is_err() {
            return (false, None);
        }
    }

    let resp = format!("{tag} OK [READ-WRITE] SELECT completed\r\n");
    (write_line(stream, &resp).await.is_ok(), Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::{Mailbox, MailboxBuilder};
    use crate::fake_imap::server::ServerConfig;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::io::BufReader;

    fn shared(mailbox: Mailbox) -> Shared {
        Shared {
            config: ServerConfig::default(),
            mailbox: Mutex::new(mailbox),
            log: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            fail_fetches: AtomicUsize::new(0),
            idles: AtomicUsize::new(0),
        }
    }

    async fn run(tag: &str, rest: &str, shared: &Shared) -> (String, Option<String>) {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let (_ok, selected) = handle_select(tag, rest, shared, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    #[tokio::test]
    async fn selects_existing_folder() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, b"From: a@b\r\n\r\nx")
            .email(2, true, b"From: a@b\r\n\r\ny")
            .build();
        let shared = shared(mailbox);

        let (output, selected) = run("A1", "\"INBOX\"", &shared).await;
        assert_eq!(selected, Some("INBOX".to_string()));
        assert!(output.contains("* 2 EXISTS"));
        assert!(output.contains("UIDVALIDITY"));
        assert!(output.contains("* OK [UNSEEN 1]"));
        assert!(output.contains("A1 OK"));
    }

    #[tokio::test]
    async fn returns_none_for_missing_folder() {
        let shared = shared(MailboxBuilder::new().folder("INBOX").build());
        let (output, selected) = run("A1", "\"NoSuchFolder\"", &shared).await;
        assert!(selected.is_none());
        assert!(output.contains("A1 NO Folder not found"));
    }
}
