//! Echo origin used to exercise the proxy end to end

use crate::context::ProxyResponse;
use crate::error::Result;
use crate::server::read_request_head;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Answers every request with `"{METHOD} {target}\n{body}"` as plain text
/// and counts the requests it has seen.
pub struct EchoOrigin {
    listener: TcpListener,
    hits: Arc<AtomicUsize>,
}

impl EchoOrigin {
    pub async fn bind(listen_addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(listen_addr).await?,
            hits: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared request counter, readable after `run` has taken ownership
    pub fn hits(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.hits)
    }

    pub async fn run(self) -> Result<()> {
        info!(listen_addr = %self.local_addr()?, "Echo origin started");
        loop {
            match self.listener.accept().await {
                Ok((stream, client_addr)) => {
                    let hits = Arc::clone(&self.hits);
                    tokio::spawn(async move {
                        if let Err(e) = echo(stream, hits).await {
                            warn!(client_addr = %client_addr, error = %e, "Origin: Failed to handle request");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Origin: Failed to accept connection");
                }
            }
        }
    }
}

async fn echo(mut stream: TcpStream, hits: Arc<AtomicUsize>) -> Result<()> {
    let Some((inbound, mut body)) = read_request_head(&mut stream, MAX_HEAD_BYTES).await? else {
        return Ok(());
    };
    hits.fetch_add(1, Ordering::SeqCst);

    let length = inbound.content_length().unwrap_or(0);
    if body.len() < length {
        let start = body.len();
        body.resize(length, 0);
        stream.read_exact(&mut body[start..]).await?;
    }
    body.truncate(length);

    let mut text = format!("{} {}\n", inbound.method, inbound.target()).into_bytes();
    text.extend_from_slice(&body);
    let response = ProxyResponse {
        status: 200,
        reason: "OK".to_string(),
        headers: vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Server".to_string(), "EchoOrigin/1.0".to_string()),
        ],
        body: text,
    };

    stream
        .write_all(&response.to_bytes(inbound.method != "HEAD"))
        .await?;
    stream.shutdown().await?;
    Ok(())
}
