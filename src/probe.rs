use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::types::{CameraKind, Classification, WorkItem};

/// Upper bound on response bytes read per probe.
pub const MAX_RESPONSE_BYTES: usize = 4096;

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connect to {0} failed: {1}")]
    Connect(WorkItem, #[source] std::io::Error),
    #[error("{0} timed out")]
    Timeout(WorkItem),
    #[error("i/o error talking to {0}: {1}")]
    Io(WorkItem, #[source] std::io::Error),
    #[error("response from {0} is not valid UTF-8")]
    Decode(WorkItem),
}

/// Probes one (address, port) pair and classifies what answers.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, item: WorkItem) -> Result<Classification, ProbeError>;
}

/// Match a raw HTTP response against the known camera landing pages.
pub fn classify(response: &str) -> Classification {
    if !response.contains("HTTP") {
        return Classification::NoMatch;
    }
    if response.contains("<title>WEB SERVICE</title>") {
        Classification::Camera(CameraKind::Dahua)
    } else if response.contains("login.asp") {
        Classification::Camera(CameraKind::Hikvision)
    } else {
        Classification::NoMatch
    }
}

/// Plain TCP prober: connect, send one GET, read a bounded response.
///
/// Connect, write and read share a single deadline of `timeout`, so a silent
/// peer can hold a worker for at most that long.
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn fetch(&self, item: WorkItem) -> Result<Vec<u8>, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let addr = SocketAddr::from((item.ip, item.port));

        let mut stream = match time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(ProbeError::Connect(item, e)),
            Err(_) => return Err(ProbeError::Timeout(item)),
        };

        match time::timeout_at(deadline, stream.write_all(REQUEST)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ProbeError::Io(item, e)),
            Err(_) => return Err(ProbeError::Timeout(item)),
        }

        let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
        let mut filled = 0;
        while filled < buf.len() {
            match time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) if filled == 0 => return Err(ProbeError::Io(item, e)),
                Err(_) if filled == 0 => return Err(ProbeError::Timeout(item)),
                // Keep whatever arrived before the peer stalled or reset.
                Ok(Err(_)) | Err(_) => break,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, item: WorkItem) -> Result<Classification, ProbeError> {
        let bytes = self.fetch(item).await?;
        let text = decode_response(&bytes).ok_or(ProbeError::Decode(item))?;
        Ok(classify(text))
    }
}

/// Decode a response as UTF-8.
///
/// A multi-byte character cut off by the read limit is dropped; any other
/// invalid sequence makes the response undecodable.
pub fn decode_response(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&bytes[..e.valid_up_to()]).ok()
        }
        Err(_) => None,
    }
}
