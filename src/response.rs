//! Materialized responses and their delivery.

use crate::charset::{charset_param, Charset};
use crate::error::Result;
use crate::fault::Fault;
use crate::headers::{HttpHeaders, CONTENT_TYPE};
use crate::transport::Transport;

const NOT_FOUND: u16 = 404;

/// A concrete response ready to be written to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    headers: HttpHeaders,
    configured: bool,
    fault: Option<Fault>,
    from_proxy: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            headers: HttpHeaders::new(),
            configured: true,
            fault: None,
            from_proxy: false,
        }
    }

    /// The response used when no stub applies: 404, empty body, not configured.
    pub fn not_configured() -> Self {
        Self {
            configured: false,
            ..Self::new(NOT_FOUND)
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn was_configured(&self) -> bool {
        self.configured
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    pub fn set_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn is_from_proxy(&self) -> bool {
        self.from_proxy
    }

    pub fn set_from_proxy(&mut self, from_proxy: bool) {
        self.from_proxy = from_proxy;
    }

    /// Encode `text` with the `Content-Type` charset if one is declared,
    /// UTF-8 otherwise.
    pub fn set_body_text(&mut self, text: &str) -> Result<()> {
        let charset = self.body_charset()?;
        self.body = charset.encode(text);
        Ok(())
    }

    /// Encode `text` with an explicit charset, ignoring the headers.
    pub fn set_body_with_charset(&mut self, text: &str, charset: &str) -> Result<()> {
        self.body = Charset::for_label(charset)?.encode(text);
        Ok(())
    }

    pub fn set_body_bytes(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Decode the body using the same charset rule as [`set_body_text`].
    ///
    /// [`set_body_text`]: Response::set_body_text
    pub fn body_as_string(&self) -> Result<String> {
        Ok(self.body_charset()?.decode(&self.body))
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.add(name, value);
    }

    pub fn add_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.add(name, value);
        }
    }

    /// Deliver the response.
    ///
    /// With a fault set, the fault acts on the raw connection and nothing is
    /// written through the status/header/body path. Otherwise status, headers
    /// in insertion order, then body. Write errors are returned as-is.
    pub async fn apply_to(&self, transport: &mut dyn Transport) -> Result<()> {
        if let Some(fault) = self.fault {
            fault.apply(transport.raw_connection()).await;
            return Ok(());
        }

        transport.set_status(self.status);
        for (name, value) in self.headers.iter() {
            transport.add_header(name, value);
        }
        transport.write_body(&self.body).await?;
        Ok(())
    }

    fn body_charset(&self) -> Result<Charset> {
        match self.headers.get(CONTENT_TYPE).and_then(charset_param) {
            Some(label) => Charset::for_label(label),
            None => Ok(Charset::Utf8),
        }
    }
}
