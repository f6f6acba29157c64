//! TCP front end: accepts connections, parses the request head with
//! `httparse` and hands the request to the pipeline

use crate::context::{InboundRequest, ProxyResponse};
use crate::error::{ProxyError, Result};
use crate::pipeline::ProxyPipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MAX_REQUEST_HEADERS: usize = 64;
const READ_CHUNK_BYTES: usize = 4096;

/// Parse a request head from the start of `buf`.
///
/// Returns the head length and the request once the head is complete, or
/// `None` while more bytes are needed.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<(usize, InboundRequest)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req
        .method
        .ok_or_else(|| ProxyError::Parse("missing method".to_string()))?;
    let target = req
        .path
        .ok_or_else(|| ProxyError::Parse("missing request target".to_string()))?;
    let fields = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    Ok(Some((head_len, InboundRequest::from_target(method, target, fields))))
}

/// Read until a full request head is buffered. Returns the head, the parsed
/// request, and any body bytes read past the head.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_header_bytes: usize,
) -> Result<Option<(InboundRequest, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK_BYTES);
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::Parse("connection closed mid-head".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head_len, inbound)) = parse_request_head(&buf)? {
            let leftover = buf.split_off(head_len);
            return Ok(Some((inbound, leftover)));
        }
        if buf.len() > max_header_bytes {
            return Err(ProxyError::Protocol(format!(
                "request head exceeds {max_header_bytes} bytes"
            )));
        }
    }
}

/// Anomaly-filtering HTTP proxy listener
pub struct ProxyServer {
    listener: TcpListener,
    pipeline: Arc<ProxyPipeline>,
    max_header_bytes: usize,
}

impl ProxyServer {
    pub async fn bind(
        listen_addr: SocketAddr,
        pipeline: Arc<ProxyPipeline>,
        max_header_bytes: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self {
            listener,
            pipeline,
            max_header_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task per connection
    pub async fn run(self) -> Result<()> {
        info!(
            listen_addr = %self.local_addr()?,
            upstream_addr = %self.pipeline.upstream().addr(),
            "Starting anomaly filter proxy"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, client_addr)) => {
                    debug!(client_addr = %client_addr, "New connection");
                    let pipeline = Arc::clone(&self.pipeline);
                    let max_header_bytes = self.max_header_bytes;
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, client_addr, pipeline, max_header_bytes).await
                        {
                            warn!(
                                client_addr = %client_addr,
                                error = %e,
                                "Connection handling failed"
                            );
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    pipeline: Arc<ProxyPipeline>,
    max_header_bytes: usize,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();

    let (inbound, leftover) = match read_request_head(&mut reader, max_header_bytes).await {
        Ok(Some(head)) => head,
        Ok(None) => {
            debug!(client_addr = %client_addr, "Connection closed before request");
            return Ok(());
        }
        Err(e) => {
            warn!(client_addr = %client_addr, error = %e, "Rejecting malformed request head");
            let response = match e {
                ProxyError::Protocol(_) => ProxyResponse::plain(431, "Request Header Fields Too Large"),
                _ => ProxyResponse::plain(400, "Bad Request"),
            };
            writer.write_all(&response.to_bytes(true)).await?;
            writer.shutdown().await?;
            return Ok(());
        }
    };

    let include_body = inbound.method != "HEAD";
    let mut body = (&leftover[..]).chain(reader);
    let response = pipeline.handle(inbound, &mut body).await;

    writer.write_all(&response.to_bytes(include_body)).await?;
    writer.shutdown().await?;
    Ok(())
}
