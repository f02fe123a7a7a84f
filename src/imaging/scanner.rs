// Malware scanning over the clamd INSTREAM protocol
// The daemon answers "stream: OK" for clean content and
// "stream: <signature> FOUND" for infected content.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Chunk size for INSTREAM framing.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scanner connection failed: {0}")]
    Connection(String),

    #[error("Scanner protocol error: {0}")]
    Protocol(String),

    #[error("Scanner timed out")]
    Timeout,
}

/// Verdict returned by a scanner for one byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected(String),
}

#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, data: &[u8]) -> Result<ScanVerdict, ScanError>;
}

/// clamd client speaking the INSTREAM protocol over TCP.
pub struct ClamavScanner {
    endpoint: String,
    timeout: Duration,
}

impl ClamavScanner {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn scan_inner(&self, data: &[u8]) -> Result<ScanVerdict, ScanError> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| ScanError::Connection(e.to_string()))?;

        stream
            .write_all(b"zINSTREAM\0")
            .await
            .map_err(|e| ScanError::Connection(e.to_string()))?;

        for chunk in data.chunks(CHUNK_SIZE) {
            stream
                .write_all(&(chunk.len() as u32).to_be_bytes())
                .await
                .map_err(|e| ScanError::Connection(e.to_string()))?;
            stream
                .write_all(chunk)
                .await
                .map_err(|e| ScanError::Connection(e.to_string()))?;
        }

        // Zero-length chunk terminates the stream.
        stream
            .write_all(&0u32.to_be_bytes())
            .await
            .map_err(|e| ScanError::Connection(e.to_string()))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|e| ScanError::Connection(e.to_string()))?;

        let text = String::from_utf8_lossy(&response);
        let text = text.trim_end_matches(['\0', '\n', ' ']);
        debug!(response = text, "clamd verdict");

        parse_clamd_response(text)
    }
}

fn parse_clamd_response(text: &str) -> Result<ScanVerdict, ScanError> {
    if text.ends_with("OK") {
        return Ok(ScanVerdict::Clean);
    }
    if let Some(rest) = text.strip_suffix(" FOUND") {
        let name = rest.rsplit(": ").next().unwrap_or(rest).to_string();
        return Ok(ScanVerdict::Infected(name));
    }
    Err(ScanError::Protocol(format!(
        "unexpected clamd response: {}",
        text
    )))
}

#[async_trait]
impl MalwareScanner for ClamavScanner {
    async fn scan(&self, data: &[u8]) -> Result<ScanVerdict, ScanError> {
        timeout(self.timeout, self.scan_inner(data))
            .await
            .map_err(|_| ScanError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_response() {
        assert_eq!(
            parse_clamd_response("stream: OK").unwrap(),
            ScanVerdict::Clean
        );
    }

    #[test]
    fn test_parse_infected_response() {
        assert_eq!(
            parse_clamd_response("stream: Eicar-Test-Signature FOUND").unwrap(),
            ScanVerdict::Infected("Eicar-Test-Signature".to_string())
        );
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        assert!(matches!(
            parse_clamd_response("stream: ERROR size limit"),
            Err(ScanError::Protocol(_))
        ));
    }
}
