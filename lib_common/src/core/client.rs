//! # Lookup Client
//!
//! Async client for the lookup protocol: connect, send one command line,
//! read the reply until the server closes the connection.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::protocol::{Command, Reply, DEFAULT_PORT};

/// Failures talking to the rate service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect, write or read failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The exchange did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with something that is not a reply document.
    #[error("malformed reply: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The server answered with `status: "error"`.
    #[error("service error: {0}")]
    Service(String),
}

/// Client for one rate service endpoint.
#[derive(Debug, Clone)]
pub struct FxServiceClient {
    addr: String,
    timeout: Duration,
}

impl Default for FxServiceClient {
    fn default() -> Self {
        Self::new(format!("127.0.0.1:{}", DEFAULT_PORT), Duration::from_secs(5))
    }
}

impl FxServiceClient {
    /// Creates a client for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Sends `command` and returns the reply, whatever its status.
    pub async fn send(&self, command: &Command) -> Result<Reply, ClientError> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.write_all(format!("{}\n", command).as_bytes()).await?;

            let mut raw = Vec::new();
            stream.read_to_end(&mut raw).await?;
            Ok::<_, ClientError>(serde_json::from_slice::<Reply>(&raw)?)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    /// `GET_RATE`, with an error reply turned into [`ClientError::Service`].
    pub async fn get_rate(&self) -> Result<Reply, ClientError> {
        let reply = self.send(&Command::GetRate).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(ClientError::Service(reply.message.unwrap_or_default()))
        }
    }
}
