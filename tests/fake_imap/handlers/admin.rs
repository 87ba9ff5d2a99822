//! Mailbox administration handlers: CREATE, DELETE, RENAME, SUBSCRIBE
//! and UNSUBSCRIBE.

use crate::fake_imap::io::{unquote, write_line};
use crate::fake_imap::mailbox::Folder;
use crate::fake_imap::server::Shared;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the CREATE command; creating an existing folder fails.
pub async fn handle_create<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    rest: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> bool {
    let name = unquote(rest.trim()).to_string();
    let resp = {
        let mut mailbox = shared.mailbox.lock().unwrap();
        if mailbox.get_folder(&name).is_some() {
            format!("{tag} NO Mailbox already exists\r\n")
        } else {
            mailbox.folders.push(Folder {
                name,
                attrs: Vec::new(),
                emails: Vec::new(),
            });
            format!("{tag} OK CREATE completed\r\n")
        }
    };
    write_line(stream, &resp).await.is_ok()
}

/// Handle DELETE, RENAME, SUBSCRIBE and UNSUBSCRIBE.
pub async fn handle_admin<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    verb: &str,
    rest: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> bool {
    let resp = match verb {
        "DELETE" => {
            let name = unquote(rest.trim()).to_string();
            let mut mailbox = shared.mailbox.lock().unwrap();
            let before = mailbox.folders.len();
            mailbox.folders.retain(|f| f.name != name);
            if mailbox.folders.len() < before {
                format!("{tag} OK DELETE completed\r\n")
            } else {
                format!("{tag} NO No such folder\r\n")
            }
        }
        "RENAME" => {
            let mut names = rest.split('"').filter(|s| !s.trim().is_empty());
            let (Some(from), Some(to)) = (names.next(), names.next()) else {
                let resp = format!("{tag} BAD RENAME arguments missing\r\n");
                return write_line(stream, &resp).await.is_ok();
            };
            let mut mailbox = shared.mailbox.lock().unwrap();
            match mailbox.get_folder_mut(from) {
                Some(folder) => {
                    folder.name = to.to_string();
                    format!("{tag} OK RENAME completed\r\n")
                }
                None => format!("{tag} NO No such folder\r\n"),
            }
        }
        "SUBSCRIBE" => format!("{tag} OK SUBSCRIBE completed\r\n"),
        "UNSUBSCRIBE" => format!("{tag} OK UNSUBSCRIBE completed\r\n"),
        _ => format!("{tag} BAD Unknown command\r\n"),
    };
    write_line(stream, &resp).await.is_ok()
}
