//! Locally terminated CONNECT tunnels.
//!
//! No TLS is spoken on an intercepted tunnel. After the CONNECT is acknowledged the client is
//! expected to send a cleartext HTTP request; a client that starts a TLS handshake instead gets
//! its bytes parsed as HTTP and the tunnel is torn down.
//!
//! Exactly one response is written per tunnel. Once the request head is complete the session
//! stops reading, answers, and closes.

use crate::mock::MockResponse;
use bstr::ByteSlice;
use hyper::{Method, StatusCode, Uri};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const HEADER_END: &[u8] = b"\r\n\r\n";

pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLOSE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TunnelError {
    #[error("request head exceeds {0} bytes")]
    HeaderTooLarge(usize),
    #[error("no complete request head within {0:?}")]
    HeaderTimeout(Duration),
    #[error("tunnel already received a complete request head")]
    AlreadyComplete,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("tunnel io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Limits applied to every intercepted tunnel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelSettings {
    pub max_header_bytes: usize,
    pub header_timeout: Duration,
    /// How long to wait after flushing the response before closing the socket.
    pub close_delay: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            close_delay: DEFAULT_CLOSE_DELAY,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TunnelState {
    AwaitingHeader,
    Responding,
    Closed,
}

/// Method and path of the request carried by a tunnel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestLine {
    pub method: Method,
    /// Path component of the request target, query string removed.
    pub path: String,
}

/// Outcome of feeding bytes into a [`TunnelSession`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Feed {
    NeedMore,
    Complete(RequestLine),
}

/// Per-tunnel state: the target host, the bytes received so far, and where we are.
#[derive(Debug)]
pub struct TunnelSession {
    host: String,
    buffer: Vec<u8>,
    state: TunnelState,
    max_header_bytes: usize,
}

impl TunnelSession {
    pub fn new(host: impl Into<String>, max_header_bytes: usize) -> Self {
        Self {
            host: host.into(),
            buffer: Vec::new(),
            state: TunnelState::AwaitingHeader,
            max_header_bytes,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk of client bytes.
    ///
    /// The request line is parsed the first time the end of the head is seen. Feeding a session
    /// that is no longer awaiting its header is an error.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Feed, TunnelError> {
        if self.state != TunnelState::AwaitingHeader {
            return Err(TunnelError::AlreadyComplete);
        }

        // The terminator may straddle the previous chunk.
        let search_from = self.buffer.len().saturating_sub(HEADER_END.len() - 1);
        self.buffer.extend_from_slice(chunk);

        let Some(offset) = self.buffer[search_from..].find(HEADER_END) else {
            if self.buffer.len() > self.max_header_bytes {
                self.state = TunnelState::Closed;
                return Err(TunnelError::HeaderTooLarge(self.max_header_bytes));
            }
            return Ok(Feed::NeedMore);
        };

        let head_end = search_from + offset;
        if head_end > self.max_header_bytes {
            self.state = TunnelState::Closed;
            return Err(TunnelError::HeaderTooLarge(self.max_header_bytes));
        }

        self.state = TunnelState::Responding;
        parse_request_line(&self.buffer[..head_end]).map(Feed::Complete)
    }

    /// Mark the tunnel as torn down.
    pub fn close(&mut self) {
        self.state = TunnelState::Closed;
        self.buffer = Vec::new();
    }
}

fn parse_request_line(head: &[u8]) -> Result<RequestLine, TunnelError> {
    let line = head.lines().next().ok_or(TunnelError::MalformedRequestLine)?;
    let mut parts = line.fields();

    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TunnelError::MalformedRequestLine);
    };

    if !version.starts_with(b"HTTP/") {
        return Err(TunnelError::MalformedRequestLine);
    }

    let method = Method::from_bytes(method).map_err(|_| TunnelError::MalformedRequestLine)?;
    let target = target
        .to_str()
        .map_err(|_| TunnelError::MalformedRequestLine)?
        .parse::<Uri>()
        .map_err(|_| TunnelError::MalformedRequestLine)?;

    Ok(RequestLine {
        method,
        path: target.path().to_owned(),
    })
}

async fn read_head<S>(io: &mut S, session: &mut TunnelSession) -> Result<Option<RequestLine>, TunnelError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0; 4096];

    loop {
        let read = io.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }

        trace!(host = session.host(), read, "buffered tunnel bytes");

        if let Feed::Complete(line) = session.feed(&chunk[..read])? {
            return Ok(Some(line));
        }
    }
}

/// Drive an intercepted tunnel: read one request head, answer it, close.
///
/// `synthesize` is called at most once, with the tunnel's host and the parsed request line.
pub(crate) async fn intercept<S, F>(
    mut io: S,
    mut session: TunnelSession,
    settings: &TunnelSettings,
    synthesize: F,
) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(&str, &RequestLine) -> MockResponse,
{
    let head = tokio::time::timeout(settings.header_timeout, read_head(&mut io, &mut session))
        .await
        .map_err(|_| TunnelError::HeaderTimeout(settings.header_timeout));

    let response = match head {
        Ok(Ok(Some(line))) => {
            debug!(host = session.host(), method = %line.method, path = %line.path, "intercepted tunnel request");
            synthesize(session.host(), &line)
        }
        Ok(Ok(None)) => {
            debug!(host = session.host(), "client closed tunnel before sending a request");
            session.close();
            return Ok(());
        }
        Ok(Err(TunnelError::MalformedRequestLine)) => MockResponse::error(
            StatusCode::BAD_REQUEST,
            "BadRequest",
            "malformed request line",
        ),
        Ok(Err(err)) | Err(err) => {
            session.close();
            return Err(err);
        }
    };

    let result = respond(&mut io, &response, settings.close_delay).await;
    session.close();
    result
}

async fn respond<S>(io: &mut S, response: &MockResponse, close_delay: Duration) -> Result<(), TunnelError>
where
    S: AsyncWrite + Unpin,
{
    io.write_all(&response.to_raw()).await?;
    io.flush().await?;
    tokio::time::sleep(close_delay).await;
    io.shutdown().await?;
    Ok(())
}
