//! In-process fake IMAP server for integration testing
//!
//! Speaks enough of RFC 3501 (plus STARTTLS, NAMESPACE, IDLE and
//! CRAM-MD5) to exercise the engine's full lifecycle:
//!
//! ```text
//!   TCP -> greeting -> CAPABILITY -> [STARTTLS -> TLS handshake ->
//!   CAPABILITY] -> LOGIN / AUTHENTICATE -> commands -> LOGOUT
//! ```
//!
//! The server is scripted through [`ServerConfig`]: which capabilities
//! to advertise before and after the TLS upgrade, the namespace to
//! report, a fixed CRAM-MD5 challenge/response pair, an untagged line to
//! push while the client idles, and a count of FETCH commands to answer
//! by dropping the connection (for recovery tests). Every received
//! command line is recorded so tests can assert on the wire
//! conversation.

use super::handlers::{
    handle_admin, handle_append, handle_authenticate, handle_capability, handle_create,
    handle_expunge, handle_idle, handle_list, handle_login, handle_logout, handle_namespace,
    handle_noop, handle_select, handle_status, handle_uid_copy, handle_uid_fetch,
    handle_uid_search, handle_uid_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Fixed CRAM-MD5 exchange the server expects.
pub struct CramConfig {
    /// Base64 challenge sent in the `+` continuation.
    pub challenge: String,
    /// Base64 client response that authenticates successfully.
    pub expected: String,
}

/// An untagged line pushed while the client is idling.
pub struct IdlePush {
    /// Push during the Nth IDLE command (1-based); earlier IDLEs just
    /// wait for the client's keepalive `DONE`.
    pub on_idle: usize,
    pub delay_ms: u64,
    pub line: String,
}

/// Behavior knobs for one server instance.
pub struct ServerConfig {
    /// Wrap every connection in TLS before the greeting.
    pub implicit_tls: bool,
    /// Advertise and accept the STARTTLS upgrade.
    pub starttls: bool,
    /// CAPABILITY list reported on plaintext connections.
    pub caps_plain: String,
    /// CAPABILITY list reported once TLS is up.
    pub caps_secure: String,
    /// Personal namespace `(prefix, delimiter)` reported by NAMESPACE.
    pub namespace: Option<(String, char)>,
    pub cram: Option<CramConfig>,
    pub idle_push: Option<IdlePush>,
    /// Answer this many `UID FETCH` commands by dropping the connection.
    pub fail_fetches: usize,
    /// Answer NOOP with an untagged BYE and drop the connection.
    pub bye_on_noop: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            implicit_tls: false,
            starttls: false,
            caps_plain: "IMAP4rev1".to_string(),
            caps_secure: "IMAP4rev1".to_string(),
            namespace: None,
            cram: None,
            idle_push: None,
            fail_fetches: 0,
            bye_on_noop: false,
        }
    }
}

/// State shared between the listener task and the test body.
pub struct Shared {
    pub config: ServerConfig,
    pub mailbox: Mutex<Mailbox>,
    pub log: Mutex<Vec<String>>,
    pub connections: AtomicUsize,
    pub fail_fetches: AtomicUsize,
    pub idles: AtomicUsize,
}

/// A fake IMAP server on localhost with an OS-assigned port.
///
/// Generates a self-signed TLS certificate at startup via `rcgen`, so no
/// cert files are needed. Runs until dropped.
pub struct FakeImapServer {
    port: u16,
    shared: Arc<Shared>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a server with the given behavior and mailbox state.
    pub async fn start(config: ServerConfig, mailbox: Mailbox) -> Self {
        // Multiple tests race to install the provider; ignore the loser.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let shared = Arc::new(Shared {
            fail_fetches: AtomicUsize::new(config.fail_fetches),
            config,
            mailbox: Mutex::new(mailbox),
            log: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            idles: AtomicUsize::new(0),
        });

        let accept_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let acceptor = acceptor.clone();
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, shared).await;
                });
            }
        });

        Self {
            port,
            shared,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of every command line received so far.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    /// How many lines in the log contain `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.commands().iter().filter(|l| l.contains(needle)).count()
    }

    /// How many connections have been accepted.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Snapshot of the mailbox state.
    pub fn mailbox(&self) -> Mailbox {
        self.shared.mailbox.lock().unwrap().clone()
    }
}

enum Next {
    Close,
    Upgrade,
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    shared: Arc<Shared>,
) {
    if shared.config.implicit_tls {
        let Ok(tls) = acceptor.accept(stream).await else {
            return;
        };
        let mut reader = BufReader::new(tls);
        if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
            .await
            .is_err()
        {
            return;
        }
        serve(&mut reader, true, &shared).await;
        return;
    }

    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    if let Next::Upgrade = serve_until_upgrade(&mut reader, &shared).await {
        let tcp = reader.into_inner();
        let Ok(tls) = acceptor.accept(tcp).await else {
            return;
        };
        let mut reader = BufReader::new(tls);
        serve(&mut reader, true, &shared).await;
    }
}

async fn serve_until_upgrade<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    shared: &Shared,
) -> Next {
    serve_loop(reader, false, shared).await
}

async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    secure: bool,
    shared: &Shared,
) {
    let _ = serve_loop(reader, secure, shared).await;
}

/// The command loop. Returns when the connection should close, or when
/// a STARTTLS upgrade was accepted.
async fn serve_loop<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    secure: bool,
    shared: &Shared,
) -> Next {
    let mut selected: Option<String> = None;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return Next::Close,
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        shared.log.lock().unwrap().push(trimmed.to_string());

        let mut parts = trimmed.splitn(3, ' ');
        let tag = parts.next().unwrap_or("*").to_string();
        let verb = parts.next().unwrap_or("").to_uppercase();
        let rest = parts.next().unwrap_or("").to_string();

        let ok = match verb.as_str() {
            "CAPABILITY" => handle_capability(&tag, secure, shared, reader).await,
            "NOOP" => {
                if shared.config.bye_on_noop {
                    let _ = write_line(reader, "* BYE fake server shutting down\r\n").await;
                    return Next::Close;
                }
                handle_noop(&tag, reader).await
            }
            "STARTTLS" => {
                if shared.config.starttls && !secure {
                    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
                    let _ = write_line(reader, &resp).await;
                    return Next::Upgrade;
                }
                let resp = format!("{tag} BAD STARTTLS not available\r\n");
                write_line(reader, &resp).await.is_ok()
            }
            "LOGIN" => handle_login(&tag, reader).await,
            "AUTHENTICATE" => handle_authenticate(&tag, &rest, shared, reader).await,
            "NAMESPACE" => handle_namespace(&tag, shared, reader).await,
            "SELECT" => {
                let (ok, sel) = handle_select(&tag, &rest, shared, reader).await;
                selected = sel;
                ok
            }
            "CLOSE" => {
                selected = None;
                let resp = format!("{tag} OK CLOSE completed\r\n");
                write_line(reader, &resp).await.is_ok()
            }
            "STATUS" => handle_status(&tag, &rest, shared, reader).await,
            "LIST" | "LSUB" => handle_list(&tag, &verb, shared, reader).await,
            "UID" => {
                let mut sub = rest.splitn(2, ' ');
                let sub_verb = sub.next().unwrap_or("").to_uppercase();
                let sub_rest = sub.next().unwrap_or("").to_string();
                match sub_verb.as_str() {
                    "SEARCH" => {
                        handle_uid_search(&tag, &sub_rest, shared, selected.as_deref(), reader)
                            .await
                    }
                    "FETCH" => {
                        if shared.fail_fetches.load(Ordering::SeqCst) > 0 {
                            shared.fail_fetches.fetch_sub(1, Ordering::SeqCst);
                            return Next::Close;
                        }
                        handle_uid_fetch(&tag, &sub_rest, shared, selected.as_deref(), reader)
                            .await
                    }
                    "STORE" => {
                        handle_uid_store(&tag, &sub_rest, shared, selected.as_deref(), reader)
                            .await
                    }
                    "COPY" => {
                        handle_uid_copy(&tag, &sub_rest, shared, selected.as_deref(), reader)
                            .await
                    }
                    _ => {
                        let resp = format!("{tag} BAD Unknown UID command\r\n");
                        write_line(reader, &resp).await.is_ok()
                    }
                }
            }
            "EXPUNGE" => handle_expunge(&tag, shared, selected.as_deref(), reader).await,
            "CREATE" => handle_create(&tag, &rest, shared, reader).await,
            "DELETE" | "RENAME" | "SUBSCRIBE" | "UNSUBSCRIBE" => {
                handle_admin(&tag, &verb, &rest, shared, reader).await
            }
            "APPEND" => handle_append(&tag, &rest, shared, reader).await,
            "IDLE" => handle_idle(&tag, shared, reader).await,
            "LOGOUT" => {
                handle_logout(&tag, reader).await;
                return Next::Close;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                write_line(reader, &resp).await.is_ok()
            }
        };
        if !ok {
            return Next::Close;
        }
    }
}
