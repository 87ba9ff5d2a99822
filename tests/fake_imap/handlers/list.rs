//! LIST and LSUB command handlers.
//!
//! Every folder is reported with its configured attributes and the
//! namespace delimiter. The pattern argument is ignored -- tests drive
//! `LIST "" "*"` anyway.

use crate::fake_imap::io::write_line;
use crate::fake_imap::server::Shared;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the LIST (or LSUB) command.
pub async fn handle_list<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    verb: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> bool {
    let delim = shared
        .config
        .namespace
        .as_ref()
        .map_or('/', |(_, delim)| *delim);
    let snapshot = shared.mailbox.lock().unwrap().clone();

    for folder in &snapshot.folders {
        let attrs = folder.attrs.join(" ");
        let line = format!("* {verb} ({attrs}) \"{delim}\" \"{}\"\r\n", folder.name);
        if write_line(stream, &line).await.is_err() {
            return false;
        }
    }
    let resp = format!("{tag} OK {verb} completed\r\n");
    write_line(stream, &resp).await.is_ok()
}
