//! Request pattern matching.
//!
//! Decides which stubs are candidates for a request. Selection among the
//! candidates happens in the [`Registry`](crate::Registry).

use crate::config::{BodyMatcher, HeaderMatcher, PathMatcher, QueryMatcher, RequestMatcher};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;

/// An incoming request, as seen by the matchers.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Parse `"GET /path?query"`. The method defaults to GET.
    pub fn parse_line(line: &str) -> Self {
        let line = line.trim();
        let (method, target) = match line.split_once(char::is_whitespace) {
            Some((method, target)) => (method, target.trim()),
            None => ("GET", line),
        };
        let mut request = Request::new(method.to_uppercase(), target);
        if let Some((path, query)) = target.split_once('?') {
            request.path = path.to_string();
            request.query = Some(query.to_string());
        }
        request
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A request matcher with its patterns compiled.
#[derive(Debug)]
pub struct CompiledPattern {
    methods: Vec<String>,
    path: Option<CompiledPathMatcher>,
    query: Vec<(String, CompiledValueMatcher)>,
    headers: Vec<(String, CompiledValueMatcher)>,
    body: Option<CompiledBodyMatcher>,
}

#[derive(Debug)]
enum CompiledPathMatcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Template(PathTemplate),
}

/// Shared by query and header matchers.
#[derive(Debug)]
enum CompiledValueMatcher {
    Exact(String),
    Regex(Regex),
    Contains(String),
    Present,
    Absent,
}

#[derive(Debug)]
enum CompiledBodyMatcher {
    Exact(String),
    Regex(Regex),
    JsonPath(HashMap<String, serde_json::Value>),
    Contains(String),
    Json,
    Empty,
}

/// `/users/{id}/orders`: each `{..}` segment matches one non-empty segment.
#[derive(Debug)]
struct PathTemplate {
    segments: Vec<Option<String>>,
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') && segment.len() >= 2 {
                    None
                } else {
                    Some(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(segment, part)| match segment {
                    Some(literal) => literal == part,
                    None => !part.is_empty(),
                })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidStub(format!("invalid regex: {}", e)))
}

impl CompiledPattern {
    /// Compile a request matcher.
    pub fn compile(matcher: &RequestMatcher) -> Result<Self> {
        let path = match &matcher.path {
            None => None,
            Some(PathMatcher::Exact { value }) => Some(CompiledPathMatcher::Exact(value.clone())),
            Some(PathMatcher::Prefix { value }) => Some(CompiledPathMatcher::Prefix(value.clone())),
            Some(PathMatcher::Regex { pattern }) => {
                Some(CompiledPathMatcher::Regex(compile_regex(pattern)?))
            }
            Some(PathMatcher::Glob { pattern }) => {
                let glob = globset::Glob::new(pattern)
                    .map_err(|e| Error::InvalidStub(format!("invalid glob: {}", e)))?;
                Some(CompiledPathMatcher::Glob(glob.compile_matcher()))
            }
            Some(PathMatcher::Template { template }) => {
                Some(CompiledPathMatcher::Template(PathTemplate::parse(template)))
            }
        };

        let query = matcher
            .query
            .iter()
            .map(|(name, qm)| -> Result<(String, CompiledValueMatcher)> {
                let compiled = match qm {
                    QueryMatcher::Exact { value } => CompiledValueMatcher::Exact(value.clone()),
                    QueryMatcher::Regex { pattern } => {
                        CompiledValueMatcher::Regex(compile_regex(pattern)?)
                    }
                    QueryMatcher::Present => CompiledValueMatcher::Present,
                    QueryMatcher::Absent => CompiledValueMatcher::Absent,
                };
                Ok((name.clone(), compiled))
            })
            .collect::<Result<Vec<_>>>()?;

        let headers = matcher
            .headers
            .iter()
            .map(|(name, hm)| -> Result<(String, CompiledValueMatcher)> {
                let compiled = match hm {
                    HeaderMatcher::Exact { value } => CompiledValueMatcher::Exact(value.clone()),
                    HeaderMatcher::Regex { pattern } => {
                        CompiledValueMatcher::Regex(compile_regex(pattern)?)
                    }
                    HeaderMatcher::Present => CompiledValueMatcher::Present,
                    HeaderMatcher::Absent => CompiledValueMatcher::Absent,
                    HeaderMatcher::Contains { value } => {
                        CompiledValueMatcher::Contains(value.clone())
                    }
                };
                Ok((name.clone(), compiled))
            })
            .collect::<Result<Vec<_>>>()?;

        let body = match &matcher.body {
            None => None,
            Some(BodyMatcher::Exact { value }) => Some(CompiledBodyMatcher::Exact(value.clone())),
            Some(BodyMatcher::Regex { pattern }) => {
                Some(CompiledBodyMatcher::Regex(compile_regex(pattern)?))
            }
            Some(BodyMatcher::JsonPath { expressions }) => {
                Some(CompiledBodyMatcher::JsonPath(expressions.clone()))
            }
            Some(BodyMatcher::Contains { value }) => {
                Some(CompiledBodyMatcher::Contains(value.clone()))
            }
            Some(BodyMatcher::Json) => Some(CompiledBodyMatcher::Json),
            Some(BodyMatcher::Empty) => Some(CompiledBodyMatcher::Empty),
        };

        Ok(Self {
            methods: matcher.method.iter().map(|m| m.to_uppercase()).collect(),
            path,
            query,
            headers,
            body,
        })
    }

    /// Whether the request satisfies every configured matcher.
    pub fn matches(&self, request: &Request) -> bool {
        if !self.methods.is_empty() {
            let method = request.method.to_uppercase();
            if !self.methods.iter().any(|m| *m == method) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if !matches_path(path, &request.path) {
                return false;
            }
        }

        if !self.query.is_empty() {
            let params = parse_query_string(request.query.as_deref().unwrap_or(""));
            let all = self
                .query
                .iter()
                .all(|(name, m)| matches_value(m, params.get(name).map(String::as_str)));
            if !all {
                return false;
            }
        }

        if !self
            .headers
            .iter()
            .all(|(name, m)| matches_value(m, request.header(name)))
        {
            return false;
        }

        match &self.body {
            Some(body) => matches_body(body, request.body.as_deref()),
            None => true,
        }
    }
}

fn matches_path(matcher: &CompiledPathMatcher, path: &str) -> bool {
    match matcher {
        CompiledPathMatcher::Exact(value) => path == value.as_str(),
        CompiledPathMatcher::Prefix(value) => path.starts_with(value.as_str()),
        CompiledPathMatcher::Regex(regex) => regex.is_match(path),
        CompiledPathMatcher::Glob(glob) => glob.is_match(path),
        CompiledPathMatcher::Template(template) => template.matches(path),
    }
}

fn matches_value(matcher: &CompiledValueMatcher, value: Option<&str>) -> bool {
    match (matcher, value) {
        (CompiledValueMatcher::Present, v) => v.is_some(),
        (CompiledValueMatcher::Absent, v) => v.is_none(),
        (_, None) => false,
        (CompiledValueMatcher::Exact(expected), Some(v)) => v == expected.as_str(),
        (CompiledValueMatcher::Regex(regex), Some(v)) => regex.is_match(v),
        (CompiledValueMatcher::Contains(needle), Some(v)) => v.contains(needle.as_str()),
    }
}

fn matches_body(matcher: &CompiledBodyMatcher, body: Option<&[u8]>) -> bool {
    let text = body.and_then(|b| std::str::from_utf8(b).ok());

    match (matcher, text) {
        (CompiledBodyMatcher::Empty, _) => body.map(|b| b.is_empty()).unwrap_or(true),
        (_, None) => false,
        (CompiledBodyMatcher::Exact(value), Some(text)) => text == value.as_str(),
        (CompiledBodyMatcher::Regex(regex), Some(text)) => regex.is_match(text),
        (CompiledBodyMatcher::Contains(value), Some(text)) => text.contains(value.as_str()),
        (CompiledBodyMatcher::Json, Some(text)) => {
            serde_json::from_str::<serde_json::Value>(text).is_ok()
        }
        (CompiledBodyMatcher::JsonPath(expressions), Some(text)) => {
            match serde_json::from_str::<serde_json::Value>(text) {
                Ok(json) => matches_json_paths(&json, expressions),
                Err(_) => false,
            }
        }
    }
}

fn matches_json_paths(
    json: &serde_json::Value,
    expressions: &HashMap<String, serde_json::Value>,
) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(path_expr, expected)| {
        let Ok(path) = JsonPath::try_from(path_expr.as_str()) else {
            return false;
        };
        let results = path.find(json);

        // A null expectation only asks for the path to resolve
        match (&results, expected.is_null()) {
            (serde_json::Value::Array(items), true) => !items.is_empty(),
            (found, true) => !found.is_null(),
            (serde_json::Value::Array(items), false) if items.len() == 1 => items[0] == *expected,
            (found, false) => found == expected,
        }
    })
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

/// Decode `%XX` escapes and `+`. Invalid escapes are kept literally.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(yaml: &str) -> CompiledPattern {
        let matcher: RequestMatcher = serde_yaml::from_str(yaml).unwrap();
        CompiledPattern::compile(&matcher).unwrap()
    }

    #[test]
    fn test_exact_path_matching() {
        let pattern = compile("path: {type: exact, value: /api/users}");
        assert!(pattern.matches(&Request::new("GET", "/api/users")));
        assert!(!pattern.matches(&Request::new("GET", "/api/posts")));
    }

    #[test]
    fn test_prefix_and_glob_matching() {
        let prefix = compile("path: {type: prefix, value: /api/}");
        assert!(prefix.matches(&Request::new("GET", "/api/posts/123")));
        assert!(!prefix.matches(&Request::new("GET", "/other")));

        let glob = compile("path: {type: glob, pattern: '/static/*.css'}");
        assert!(glob.matches(&Request::new("GET", "/static/site.css")));
        assert!(!glob.matches(&Request::new("GET", "/static/site.js")));
    }

    #[test]
    fn test_template_path_matching() {
        let pattern = compile("path: {type: template, template: '/users/{id}/orders'}");
        assert!(pattern.matches(&Request::new("GET", "/users/123/orders")));
        assert!(!pattern.matches(&Request::new("GET", "/users//orders")));
        assert!(!pattern.matches(&Request::new("GET", "/users/123")));
    }

    #[test]
    fn test_method_matching() {
        let pattern = compile("method: [get, POST]");
        assert!(pattern.matches(&Request::new("GET", "/")));
        assert!(pattern.matches(&Request::new("post", "/")));
        assert!(!pattern.matches(&Request::new("DELETE", "/")));
    }

    #[test]
    fn test_query_matching() {
        let pattern = compile(
            r#"
query:
  page: {type: exact, value: "1"}
  debug: {type: absent}
"#,
        );
        assert!(pattern.matches(&Request::new("GET", "/").with_query("page=1&sort=asc")));
        assert!(!pattern.matches(&Request::new("GET", "/").with_query("page=2")));
        assert!(!pattern.matches(&Request::new("GET", "/").with_query("page=1&debug")));
    }

    #[test]
    fn test_header_matching_is_case_insensitive() {
        let pattern = compile(
            r#"
headers:
  authorization: {type: present}
  accept: {type: contains, value: json}
"#,
        );
        let request = Request::new("GET", "/")
            .with_header("Authorization", "Bearer token")
            .with_header("Accept", "application/json");
        assert!(pattern.matches(&request));
        assert!(!pattern.matches(&Request::new("GET", "/")));
    }

    #[test]
    fn test_body_matching() {
        let json = compile("body: {type: json}");
        assert!(json.matches(&Request::new("POST", "/").with_body(r#"{"name": "John"}"#)));
        assert!(!json.matches(&Request::new("POST", "/").with_body("not json")));

        let path = compile(
            r#"
body:
  type: json_path
  expressions:
    "$.name": "John"
"#,
        );
        assert!(path.matches(&Request::new("POST", "/").with_body(r#"{"name": "John"}"#)));
        assert!(!path.matches(&Request::new("POST", "/").with_body(r#"{"name": "Jane"}"#)));

        let empty = compile("body: {type: empty}");
        assert!(empty.matches(&Request::new("POST", "/")));
        assert!(!empty.matches(&Request::new("POST", "/").with_body("x")));
    }

    #[test]
    fn test_invalid_regex_fails_compilation() {
        let matcher: RequestMatcher =
            serde_yaml::from_str("headers: {x: {type: regex, pattern: '(['}}").unwrap();
        assert!(matches!(
            CompiledPattern::compile(&matcher),
            Err(Error::InvalidStub(_))
        ));
    }

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux");
        assert_eq!(params.get("foo"), Some(&"bar".to_string()));
        assert_eq!(params.get("baz"), Some(&"qux".to_string()));

        let params = parse_query_string("name=John%20Doe&city=S%C3%A3o+Paulo&bad=%zz");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("city"), Some(&"São Paulo".to_string()));
        assert_eq!(params.get("bad"), Some(&"%zz".to_string()));
    }

    #[test]
    fn test_parse_request_line() {
        let request = Request::parse_line("post /orders?id=7");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/orders");
        assert_eq!(request.query.as_deref(), Some("id=7"));

        let request = Request::parse_line("/health");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/health");
        assert!(request.query.is_none());
    }
}
