//! Transport adapter seam.
//!
//! [`Response::apply_to`](crate::Response::apply_to) only talks to a
//! [`Transport`]. Normal delivery uses status / header / body calls; fault
//! injection goes through [`Transport::raw_connection`] and acts on the bytes
//! and socket beneath the HTTP framing.

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::StatusCode;
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// The connection primitive under a transport.
#[async_trait]
pub trait RawConnection: Send {
    /// Write bytes as-is, bypassing any HTTP framing.
    async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> io::Result<()>;

    /// Abort the connection so the peer sees a reset.
    fn reset(&mut self) -> io::Result<()>;
}

/// Where a response is delivered.
#[async_trait]
pub trait Transport: Send {
    fn set_status(&mut self, status: u16);

    fn add_header(&mut self, name: &str, value: &str);

    /// Write the body. Status and headers must be set first.
    async fn write_body(&mut self, body: &[u8]) -> io::Result<()>;

    fn raw_connection(&mut self) -> &mut dyn RawConnection;
}

/// HTTP/1.1 response writer over a raw connection.
///
/// Status and headers are buffered and written together with the body.
/// Header names and values are checked with `hyper`'s header types; an
/// invalid one fails the body write and nothing reaches the connection.
///
/// The body is framed by `Transfer-Encoding: chunked` when the headers ask
/// for it, and by `Content-Length` otherwise. Any other transfer coding is
/// dropped.
pub struct HttpTransport<C> {
    connection: C,
    status: StatusCode,
    headers: Vec<(HeaderName, String, HeaderValue)>,
    invalid: Option<io::Error>,
}

impl<C: RawConnection> HttpTransport<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            status: StatusCode::OK,
            headers: Vec::new(),
            invalid: None,
        }
    }

    pub fn into_inner(self) -> C {
        self.connection
    }

    fn reject(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(io::Error::new(io::ErrorKind::InvalidInput, message));
        }
    }

    fn is_chunked(&self) -> bool {
        self.headers
            .iter()
            .filter(|(name, _, _)| *name == TRANSFER_ENCODING)
            .filter_map(|(_, _, value)| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    fn encode(&self, body: &[u8]) -> Vec<u8> {
        let chunked = self.is_chunked();

        let mut message = Vec::with_capacity(128 + body.len());
        message.extend_from_slice(b"HTTP/1.1 ");
        message.extend_from_slice(self.status.as_str().as_bytes());
        message.push(b' ');
        message.extend_from_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        message.extend_from_slice(b"\r\n");

        let mut has_length = false;
        for (name, raw_name, value) in &self.headers {
            if *name == TRANSFER_ENCODING && !chunked {
                continue;
            }
            if *name == CONTENT_LENGTH {
                if chunked {
                    continue;
                }
                has_length = true;
            }
            message.extend_from_slice(raw_name.as_bytes());
            message.extend_from_slice(b": ");
            message.extend_from_slice(value.as_bytes());
            message.extend_from_slice(b"\r\n");
        }
        if !chunked && !has_length {
            message.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        message.extend_from_slice(b"\r\n");

        if chunked {
            if !body.is_empty() {
                message.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
                message.extend_from_slice(body);
                message.extend_from_slice(b"\r\n");
            }
            message.extend_from_slice(b"0\r\n\r\n");
        } else {
            message.extend_from_slice(body);
        }
        message
    }
}

#[async_trait]
impl<C: RawConnection> Transport for HttpTransport<C> {
    fn set_status(&mut self, status: u16) {
        match StatusCode::from_u16(status) {
            Ok(status) => self.status = status,
            Err(_) => self.reject(format!("invalid status code: {}", status)),
        }
    }

    fn add_header(&mut self, name: &str, value: &str) {
        let parsed_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(parsed) => parsed,
            Err(_) => return self.reject(format!("invalid header name: {:?}", name)),
        };
        match HeaderValue::from_str(value) {
            Ok(parsed) => self.headers.push((parsed_name, name.to_string(), parsed)),
            Err(_) => self.reject(format!("invalid value for header {}: {:?}", name, value)),
        }
    }

    async fn write_body(&mut self, body: &[u8]) -> io::Result<()> {
        if let Some(err) = self.invalid.take() {
            return Err(err);
        }
        let message = self.encode(body);
        self.connection.write_raw(&message).await
    }

    fn raw_connection(&mut self) -> &mut dyn RawConnection {
        &mut self.connection
    }
}

/// A TCP connection that can be reset.
///
/// After `close` or `reset` the stream is gone and further writes fail with
/// `NotConnected`.
pub struct TcpConnection {
    stream: Option<TcpStream>,
}

impl TcpConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

#[async_trait]
impl RawConnection for TcpConnection {
    async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn reset(&mut self) -> io::Result<()> {
        let stream = self.stream()?;
        // Closing with a zero linger makes the kernel send RST instead of FIN.
        SockRef::from(&*stream).set_linger(Some(Duration::ZERO))?;
        self.stream = None;
        debug!("Connection reset");
        Ok(())
    }
}
