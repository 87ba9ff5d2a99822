//! UID SEARCH command handler.
//!
//! Supports the two criteria the tests use: ALL and UNSEEN. Anything
//! else matches every message.

use crate::fake_imap::io::write_line;
use crate::fake_imap::server::Shared;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UID SEARCH command.
pub async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &str,
    shared: &Shared,
    selected: Option<&str>,
    stream: &mut BufReader<S>,
) -> bool {
    let Some(selected) = selected else {
        let resp = format!("{tag} BAD No mailbox selected\r\n");
        return write_line(stream, &resp).await.is_ok();
    };
    let snapshot = shared.mailbox.lock().unwrap().clone();
    let Some(folder) = snapshot.get_folder(selected) else {
        let resp = format!("{tag} NO No such folder\r\n");
        return write_line(stream, &resp).await.is_ok();
    };

    let unseen_only = criteria.to_uppercase().contains("UNSEEN");
    let uids: Vec<String> = folder
        .emails
        .iter()
        .filter(|e| !unseen_only || !e.seen)
        .map(|e| e.uid.to_string())
        .collect();

    let line = if uids.is_empty() {
        "* SEARCH\r\n".to_string()
    } else {
        format!("* SEARCH {}\r\n", uids.join(" "))
    };
    if write_line(stream, &line).await.is_err() {
        return false;
    }
    let resp = format!("{tag} OK SEARCH completed\r\n");
    write_line(stream, &resp).await.is_ok()
}
