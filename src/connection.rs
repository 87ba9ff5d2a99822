//! Socket transport
//!
//! One TCP connection to a mail server, optionally wrapped in TLS from
//! the start (implicit TLS ports) or upgraded mid-session (STARTTLS).
//! Reads are chunked into the caller's accumulation buffer and bounded by
//! the configured timeout; an optional wake token can interrupt a blocked
//! read, which is how IDLE is cancelled from outside.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, ServerName};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read granularity for the accumulation buffer.
const READ_CHUNK: usize = 4096;

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

enum ReadEvent {
    Data(std::io::Result<usize>),
    TimedOut,
    Interrupted,
}

/// A live connection to a mail server.
pub(crate) struct Connection {
    transport: Transport,
}

impl Connection {
    /// Resolve `server:port` and connect to the first address that
    /// accepts, trying each resolved address in order.
    pub(crate) async fn open(server: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let addrs: Vec<SocketAddr> = lookup_host((server, port)).await?.collect();

        let mut last_err: Option<Error> = None;
        for addr in addrs {
            let attempt = TcpStream::connect(addr);
            let connected = match timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(r) => r,
                    Err(_) => {
                        last_err = Some(Error::Timeout(format!("connecting to {addr}")));
                        continue;
                    }
                },
                None => attempt.await,
            };
            match connected {
                Ok(stream) => {
                    debug!("connected to {server} at {addr}");
                    return Ok(Self {
                        transport: Transport::Plain(stream),
                    });
                }
                Err(e) => last_err = Some(Error::Io(e)),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses resolved for {server}:{port}"),
            ))
        }))
    }

    /// Run the TLS handshake over this connection's socket.
    ///
    /// Used both for implicit-TLS connects and for the STARTTLS upgrade;
    /// in the latter case no further bytes may be written between the
    /// tagged OK and this call.
    pub(crate) async fn upgrade_tls(
        self,
        connector: &TlsConnector,
        server: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let Transport::Plain(stream) = self.transport else {
            return Err(Error::Tls("connection is already encrypted".into()));
        };

        let name = ServerName::try_from(server.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name {server}: {e}")))?;
        let handshake = connector.connect(name, stream);
        let tls = match timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| Error::Timeout(format!("TLS handshake with {server}")))?,
            None => handshake.await,
        }
        .map_err(|e| Error::Tls(format!("TLS handshake with {server} failed: {e}")))?;

        debug!("TLS established with {server}");
        Ok(Self {
            transport: Transport::Tls(Box::new(tls)),
        })
    }

    pub(crate) const fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// The certificate chain the server presented, end entity first.
    pub(crate) fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        match &self.transport {
            Transport::Tls(stream) => stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|chain| chain.iter().map(|c| c.clone().into_owned()).collect()),
            Transport::Plain(_) => None,
        }
    }

    /// Read one chunk of server data into `buf`.
    ///
    /// Returns the number of bytes appended. `Ok(0)` means the wait timed
    /// out and `fail_on_timeout` was off -- the IDLE keepalive path. With
    /// `fail_on_timeout` on, a timeout is a hard [`Error::Timeout`]. A
    /// fired `wake` token resolves to [`Error::Interrupted`]; end of
    /// stream is [`Error::Closed`].
    pub(crate) async fn read_into(
        &mut self,
        buf: &mut Buffer,
        timeout: Option<Duration>,
        fail_on_timeout: bool,
        wake: Option<&CancellationToken>,
    ) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];

        let event = {
            let read = async {
                match &mut self.transport {
                    Transport::Plain(s) => s.read(&mut chunk).await,
                    Transport::Tls(s) => s.read(&mut chunk).await,
                }
            };
            tokio::pin!(read);

            match (timeout, wake) {
                (Some(limit), Some(wake)) => tokio::select! {
                    () = wake.cancelled() => ReadEvent::Interrupted,
                    r = tokio::time::timeout(limit, &mut read) => match r {
                        Ok(io) => ReadEvent::Data(io),
                        Err(_) => ReadEvent::TimedOut,
                    },
                },
                (Some(limit), None) => match tokio::time::timeout(limit, &mut read).await {
                    Ok(io) => ReadEvent::Data(io),
                    Err(_) => ReadEvent::TimedOut,
                },
                (None, Some(wake)) => tokio::select! {
                    () = wake.cancelled() => ReadEvent::Interrupted,
                    io = &mut read => ReadEvent::Data(io),
                },
                (None, None) => ReadEvent::Data(read.await),
            }
        };

        match event {
            ReadEvent::Interrupted => Err(Error::Interrupted),
            ReadEvent::TimedOut => {
                if fail_on_timeout {
                    Err(Error::Timeout(
                        "waiting to read data from server".to_string(),
                    ))
                } else {
                    Ok(0)
                }
            }
            ReadEvent::Data(Ok(0)) => Err(Error::Closed),
            ReadEvent::Data(Ok(n)) => {
                buf.extend(&chunk[..n]);
                Ok(n)
            }
            ReadEvent::Data(Err(e)) => Err(Error::Io(e)),
        }
    }

    /// Write the whole buffer, flushing before returning. Callers treat
    /// the write as atomic; partial delivery is a transport failure.
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.transport {
            Transport::Plain(s) => write_flush(s, data).await,
            Transport::Tls(s) => write_flush(s, data).await,
        }
    }
}

async fn write_flush<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> Result<()> {
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}
