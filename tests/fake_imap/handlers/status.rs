//! STATUS command handler.
//!
//! Reports MESSAGES, RECENT, UNSEEN and UIDNEXT for the named folder.

use crate::fake_imap::io::{unquote, write_line};
use crate::fake_imap::server::Shared;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the STATUS command.
pub async fn handle_status<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    rest: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> bool {
    let name = rest
        .split('"')
        .nth(1)
        .unwrap_or_else(|| unquote(rest.trim()))
        .to_string();
    let snapshot = shared.mailbox.lock().unwrap().clone();

    let Some(folder) = snapshot.get_folder(&name) else {
        let resp = format!("{tag} NO STATUS failed: no such folder\r\n");
        return write_line(stream, &resp).await.is_ok();
    };

    let unseen = folder.emails.iter().filter(|e| !e.seen).count();
    let untagged = format!(
        "* STATUS \"{name}\" (MESSAGES {} RECENT 0 UNSEEN {unseen} UIDNEXT {})\r\n",
        folder.emails.len(),
        folder.uidnext(),
    );
    if write_line(stream, &untagged).await.is_err() {
        return false;
    }
    let resp = format!("{tag} OK STATUS completed\r\n");
    write_line(stream, &resp).await.is_ok()
}
