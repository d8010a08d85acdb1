//! Inbound request representation.
//!
//! The engine dispatches on [`HttpRequest`], a parsed, transport-agnostic
//! view; the `may_minihttp` adapter fills one in per connection and tests
//! build them directly.

use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Header storage: small inline vector of lowercase name / value pairs.
pub type HeaderVec = SmallVec<[(Arc<str>, String); 8]>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderVec,
    pub query_params: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        let query_params = parse_query_params(&path);
        let path = path.split('?').next().unwrap_or("/").to_string();
        HttpRequest {
            method,
            path,
            headers: HeaderVec::new(),
            query_params,
            cookies: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup, last value wins.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Host header with any port stripped.
    pub fn host(&self) -> Option<&str> {
        let raw = self.get_header("host")?;
        if raw.starts_with('[') {
            // IPv6 literal: strip only past the closing bracket
            match raw.find(']') {
                Some(end) => Some(&raw[..=end]),
                None => None,
            }
        } else {
            Some(raw.split(':').next().unwrap_or(raw))
        }
    }

    /// Whether the `Accept` header chooses plain text over JSON.
    pub fn accepts_plain_text(&self) -> bool {
        self.get_header("accept")
            .map(|accept| accept.contains("text/plain"))
            .unwrap_or(false)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

pub fn parse_cookies(headers: &HeaderVec) -> HashMap<String, String> {
    headers
        .iter()
        .rfind(|(k, _)| k.as_ref() == "cookie")
        .map(|(_, c)| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_query_params(path: &str) -> HashMap<String, String> {
    if let Some(pos) = path.find('?') {
        let query_str = &path[pos + 1..];
        url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        HashMap::new()
    }
}

/// Extract an [`HttpRequest`] from a `may_minihttp` request.
///
/// Header names are lowercased on the way in; the raw body is kept as bytes
/// so the context can run it through the app's request processor lazily.
pub fn parse_request(req: may_minihttp::Request, max_body_bytes: usize) -> HttpRequest {
    use std::io::Read;

    let method: Method = req.method().parse().unwrap_or(Method::GET);
    let raw_path = req.path().to_string();

    let headers: HeaderVec = req
        .headers()
        .iter()
        .map(|h| {
            (
                Arc::from(h.name.to_ascii_lowercase()),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let cookies = parse_cookies(&headers);
    let query_params = parse_query_params(&raw_path);
    let path = raw_path.split('?').next().unwrap_or("/").to_string();

    let body = {
        let mut buf = Vec::new();
        let mut limited = req.body().take(max_body_bytes as u64 + 1);
        match limited.read_to_end(&mut buf) {
            Ok(n) if n > 0 => Some(buf),
            _ => None,
        }
    };

    HttpRequest {
        method,
        path,
        headers,
        query_params,
        cookies,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_port() {
        let req = HttpRequest::new(Method::GET, "/ping").with_header("Host", "a.example:8443");
        assert_eq!(req.host(), Some("a.example"));
    }

    #[test]
    fn host_keeps_ipv6_brackets() {
        let req = HttpRequest::new(Method::GET, "/").with_header("host", "[::1]:9000");
        assert_eq!(req.host(), Some("[::1]"));
    }

    #[test]
    fn query_parsed_from_path() {
        let req = HttpRequest::new(Method::GET, "/search?q=hi&limit=2");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_param("q"), Some("hi"));
        assert_eq!(req.query_param("limit"), Some("2"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest::new(Method::GET, "/").with_header("X-Trace", "t1");
        assert_eq!(req.get_header("x-trace"), Some("t1"));
        assert_eq!(req.get_header("X-TRACE"), Some("t1"));
    }
}
