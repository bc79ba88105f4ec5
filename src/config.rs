//! Stub definitions and resolver configuration.
//!
//! Defines the stub wire format, request patterns, response definitions and
//! global settings. Optional fields are omitted on output, never written as
//! `null`.

use crate::error::{Error, Result};
use crate::fault::Fault;
use crate::headers::HttpHeaders;
use crate::response::Response;
use hyper::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration for the resolver.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    /// Stubs registered at startup, in registration order
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl ResolverConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A single stub definition, as registered and as reported back.
///
/// Equality is content equality; the registration order lives on
/// [`StubMapping`](crate::StubMapping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StubDefinition {
    /// Request pattern
    pub request: RequestMatcher,

    /// Response to return
    pub response: ResponseDefinition,

    /// Priority (lower = preferred, absent = 5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Scenario this stub takes part in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,

    /// Scenario state required for this stub to be eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,

    /// Scenario state to move to once this stub is served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
}

impl StubDefinition {
    pub fn new(request: RequestMatcher, response: ResponseDefinition) -> Self {
        Self {
            request,
            response,
            priority: None,
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
        }
    }

    /// Validate the stub definition.
    pub fn validate(&self) -> Result<()> {
        self.request.validate()?;
        self.response.validate()?;
        if self.scenario_name.as_deref() == Some("") {
            return Err(Error::InvalidStub("scenarioName cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// HTTP method(s) to match (empty = any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method: Vec<String>,

    /// Path matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatcher>,

    /// Query parameter matching
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, QueryMatcher>,

    /// Header matching
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    /// Validate the request matcher.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.path {
            path.validate()?;
        }
        for (name, matcher) in &self.query {
            if let QueryMatcher::Regex { pattern } = matcher {
                check_regex(pattern).map_err(|e| Error::InvalidStub(format!("query {}: {}", name, e)))?;
            }
        }
        for (name, matcher) in &self.headers {
            if let HeaderMatcher::Regex { pattern } = matcher {
                check_regex(pattern).map_err(|e| Error::InvalidStub(format!("header {}: {}", name, e)))?;
            }
        }
        if let Some(BodyMatcher::Regex { pattern }) = &self.body {
            check_regex(pattern).map_err(|e| Error::InvalidStub(format!("body: {}", e)))?;
        }
        Ok(())
    }
}

fn check_regex(pattern: &str) -> std::result::Result<(), regex::Error> {
    regex::Regex::new(pattern).map(|_| ())
}

/// Path matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Path with parameters (e.g., /users/{id})
    Template { template: String },
}

impl PathMatcher {
    /// Validate the path matcher.
    pub fn validate(&self) -> Result<()> {
        match self {
            PathMatcher::Regex { pattern } => {
                check_regex(pattern)
                    .map_err(|e| Error::InvalidStub(format!("invalid regex: {}", e)))?;
            }
            PathMatcher::Glob { pattern } => {
                globset::Glob::new(pattern)
                    .map_err(|e| Error::InvalidStub(format!("invalid glob: {}", e)))?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Query parameter matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Parameter must be present (any value)
    Present,
    /// Parameter must be absent
    Absent,
}

/// Header matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

/// Body matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: HashMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

/// Response definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers, written in this order
    #[serde(default, skip_serializing_if = "HttpHeaders::is_empty")]
    pub headers: HttpHeaders,

    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,

    /// Transport fault delivered instead of the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HttpHeaders::new(),
            body: None,
            fault: None,
        }
    }
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> Result<()> {
        if self.status < 100 || self.status > 599 {
            return Err(Error::InvalidStub(format!("invalid status code: {}", self.status)));
        }
        for (name, value) in self.headers.iter() {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidStub(format!("invalid header name: {:?}", name)))?;
            HeaderValue::from_str(value).map_err(|_| {
                Error::InvalidStub(format!("invalid value for header {}: {:?}", name, value))
            })?;
        }
        Ok(())
    }

    /// Load the body source once: read files, decode base64 and serialize
    /// JSON. The result builds responses without further I/O.
    pub fn prepare(&self) -> Result<PreparedResponse> {
        let body = match &self.body {
            None => PreparedBody::Empty,
            Some(ResponseBody::Text { content }) => PreparedBody::Text(content.clone()),
            Some(ResponseBody::Json { content }) => PreparedBody::Text(
                serde_json::to_string(content).map_err(|e| Error::InvalidBody(e.to_string()))?,
            ),
            Some(ResponseBody::Base64 { content }) => {
                use base64::Engine;
                PreparedBody::Bytes(
                    base64::engine::general_purpose::STANDARD
                        .decode(content)
                        .map_err(|e| Error::InvalidBody(format!("invalid base64: {}", e)))?,
                )
            }
            Some(ResponseBody::File { path }) => PreparedBody::Bytes(
                std::fs::read(path)
                    .map_err(|e| Error::InvalidBody(format!("failed to read file {}: {}", path, e)))?,
            ),
        };

        Ok(PreparedResponse {
            status: self.status,
            headers: self.headers.clone(),
            body,
            fault: self.fault,
        })
    }
}

/// Response body configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
}

/// A response definition with its body source loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedResponse {
    status: u16,
    headers: HttpHeaders,
    body: PreparedBody,
    fault: Option<Fault>,
}

#[derive(Debug, Clone, PartialEq)]
enum PreparedBody {
    Empty,
    /// Encoded on each build, with the `Content-Type` charset
    Text(String),
    Bytes(Vec<u8>),
}

impl PreparedResponse {
    /// Build the concrete response. Does no I/O; only charset encoding can
    /// fail.
    pub fn materialize(&self) -> Result<Response> {
        let mut response = Response::new(self.status);
        response.add_headers(self.headers.iter());

        match &self.body {
            PreparedBody::Empty => {}
            PreparedBody::Text(text) => response.set_body_text(text)?,
            PreparedBody::Bytes(bytes) => response.set_body_bytes(bytes.clone()),
        }

        if let Some(fault) = self.fault {
            response.set_fault(fault);
        }

        Ok(response)
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched stubs
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}
