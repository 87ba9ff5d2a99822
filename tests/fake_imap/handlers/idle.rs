//! IDLE command handler (RFC 2177).
//!
//! Answers `+ idling`, optionally pushes one untagged line after a
//! delay (scripted per IDLE round), then waits for the client's `DONE`
//! and completes the command. Keepalive rounds are simply IDLEs during
//! which nothing is pushed: the client's own timeout produces the DONE.

use crate::fake_imap::io::write_line;
use crate::fake_imap::server::Shared;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

/// Handle the IDLE command.
pub async fn handle_idle<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    shared: &Shared,
    stream: &mut BufReader<S>,
) -> bool {
    let round = shared.idles.fetch_add(1, Ordering::SeqCst) + 1;

    if write_line(stream, "+ idling\r\n").await.is_err() {
        return false;
    }

    if let Some(push) = &shared.config.idle_push
        && push.on_idle == round
    {
        tokio::time::sleep(Duration::from_millis(push.delay_ms)).await;
        if write_line(stream, &push.line).await.is_err() {
            return false;
        }
    }

    // Wait for DONE (the client sends it after a push, a keepalive
    // timeout, or an interrupt).
    loop {
        let mut line = String::new();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        let trimmed = line.trim_end().to_string();
        shared.log.lock().unwrap().push(trimmed.clone());
        if trimmed.eq_ignore_ascii_case("DONE") {
            break;
        }
    }

    let resp = format!("{tag} OK IDLE terminated\r\n");
    write_line(stream, &resp).await.is_ok()
}
