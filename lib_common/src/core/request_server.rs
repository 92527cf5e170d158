//! # Request Server
//!
//! TCP front end of the rate cache. Each accepted connection gets its own
//! task, reads one request, writes one reply and closes. Handlers only reach
//! the cache through [`RateCache::get_rate`] and [`RateCache::stats`].
//!
//! Shutdown is cooperative: the `SHUTDOWN` command (or the owning process)
//! cancels the shared token, the accept loop stops taking connections and
//! waits for in-flight handlers before returning.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::core::protocol::{Command, Reply, MAX_REQUEST_BYTES};
use crate::core::rate_cache::RateCache;

/// Timing knobs of the server.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Upper bound on one blocking `accept`, so shutdown is noticed promptly.
    pub accept_poll: Duration,
    /// How long a client may take to send its request.
    pub request_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            accept_poll: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// # Request Server
pub struct RequestServer {
    cache: Arc<RateCache>,
    shutdown: CancellationToken,
    options: ServerOptions,
}

impl RequestServer {
    /// Creates a server over `cache`. Cancelling `shutdown` stops it; the
    /// `SHUTDOWN` command cancels the same token.
    pub fn new(cache: Arc<RateCache>, shutdown: CancellationToken, options: ServerOptions) -> Self {
        Self {
            cache,
            shutdown,
            options,
        }
    }

    /// Runs the accept loop on `listener` until shutdown, then waits for
    /// in-flight handlers.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "rate service listening");

        let mut handlers = JoinSet::new();

        loop {
            // Reap finished handlers so the set does not grow unbounded.
            while handlers.try_join_next().is_some() {}

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = tokio::time::timeout(self.options.accept_poll, listener.accept()) => {
                    match accepted {
                        Err(_) => continue,
                        Ok(Err(e)) => {
                            warn!(error = %e, "accept failed");
                        }
                        Ok(Ok((stream, peer))) => {
                            let cache = Arc::clone(&self.cache);
                            let shutdown = self.shutdown.clone();
                            let timeout = self.options.request_timeout;
                            handlers.spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, cache, shutdown, timeout).await {
                                    error!(%peer, error = %e, "failed to handle client");
                                }
                            });
                        }
                    }
                }
            }
        }

        while handlers.join_next().await.is_some() {}
        info!("rate service stopped");
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    cache: Arc<RateCache>,
    shutdown: CancellationToken,
    request_timeout: Duration,
) -> io::Result<()> {
    let raw = read_request(&mut stream, request_timeout).await?;
    let command = Command::parse(&raw);
    debug!(%peer, command = %command, "request received");

    let reply = match &command {
        Command::GetRate => match cache.get_rate().await {
            Ok(lookup) => Reply::rate(&lookup),
            Err(e) => Reply::lookup_failed(&e),
        },
        Command::Stats => Reply::stats(cache.stats()),
        Command::Shutdown => Reply::shutting_down(),
        Command::Unknown(input) => Reply::unknown(input),
    };

    // Cancel even if the client is gone before the reply goes out.
    if command == Command::Shutdown {
        info!(%peer, "shutdown command received");
        shutdown.cancel();
    }

    stream.write_all(reply.to_line().as_bytes()).await?;
    stream.shutdown().await?;
    discard_pending(&stream);
    Ok(())
}

/// Drops input that is already buffered but was never read (oversized or
/// pipelined requests), so closing the socket does not reset the connection
/// under the reply.
fn discard_pending(stream: &TcpStream) {
    let mut chunk = [0u8; 1024];
    loop {
        match stream.try_read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => trace!(bytes = n, "discarded unread request input"),
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    trace!(error = %e, "stopped discarding request input");
                }
                return;
            }
        }
    }
}

/// Reads until a complete known command, a newline, end of stream,
/// [`MAX_REQUEST_BYTES`] or the timeout, whichever comes first, and returns
/// the first line decoded lossily.
///
/// Clients that send a bare command and then wait for the reply without a
/// newline or half-close are answered as soon as the command is in.
async fn read_request(stream: &mut TcpStream, timeout: Duration) -> io::Result<String> {
    let mut buf: Vec<u8> = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];

    let read = async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\n')
                || buf.len() >= MAX_REQUEST_BYTES
                || Command::parse(&String::from_utf8_lossy(&buf)).is_known()
            {
                break;
            }
        }
        Ok::<_, io::Error>(())
    };

    if let Ok(result) = tokio::time::timeout(timeout, read).await {
        result?;
    } else {
        trace!("request read timed out, using partial input");
    }

    buf.truncate(MAX_REQUEST_BYTES);
    let line = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => &buf[..pos],
        None => &buf[..],
    };
    Ok(String::from_utf8_lossy(line).into_owned())
}
