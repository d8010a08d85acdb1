//! Outbound response representation and encoding.

use super::request::HeaderVec;
use crate::error::WrapError;
use serde_json::Value;
use std::io::Read;
use std::sync::{Arc, Mutex};

/// Response payload. Buffered bodies are the norm; `Stream` wraps a shared
/// reader so a recorded response can still be cloned through the middleware
/// chain.
#[derive(Clone)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Json(Value),
    Stream(StreamBody),
}

#[derive(Clone)]
pub struct StreamBody {
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
}

impl StreamBody {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        StreamBody {
            reader: Arc::new(Mutex::new(reader)),
        }
    }

    /// Drain the stream into a buffer. Only one clone of the body gets the
    /// bytes; later drains see an exhausted reader.
    pub fn drain(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.lock().unwrap().read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Json(v) => write!(f, "Json({v})"),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16, body: Body) -> Self {
        Response {
            status,
            headers: HeaderVec::new(),
            body,
        }
    }

    /// `200 OK` with an empty body.
    pub fn ok() -> Self {
        Response::new(200, Body::Empty)
    }

    pub fn json(value: Value) -> Self {
        Response::new(200, Body::Json(value))
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        let mut resp = Response::new(status, Body::Bytes(text.into().into_bytes()));
        resp.set_header("content-type", "text/plain");
        resp
    }

    /// `101 Switching Protocols`, recorded through the chain when a
    /// websocket invocation terminates it.
    pub fn switching_protocols() -> Self {
        Response::new(101, Body::Empty)
    }

    /// Set a header, replacing any existing values for the name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let lower = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| k.as_ref() != lower);
        self.headers.push((Arc::from(lower), value.into()));
    }

    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.into()));
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values recorded for one header name, declaration order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Drop the payload but keep status and headers (HEAD fallback).
    pub fn discard_body(&mut self) {
        self.body = Body::Empty;
    }

    /// Render an error per the wire contract: JSON object by default, plain
    /// text with an extras dump when the client asks for it.
    pub fn from_error(err: &WrapError, plain_text: bool) -> Self {
        if plain_text {
            Response::text(err.status(), err.plain_body())
        } else {
            Response::new(err.status(), Body::Json(err.json_body()))
        }
    }
}

/// `may_minihttp` takes preformatted header lines with a `'static`
/// lifetime, so dynamic lines are interned once per distinct value. Header
/// values the framework emits (CORS policies, content types) come from a
/// small fixed set per app, which bounds the cache.
fn intern_header_line(name: &str, value: &str) -> &'static str {
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::sync::Mutex;

    static LINES: Lazy<Mutex<HashMap<String, &'static str>>> =
        Lazy::new(|| Mutex::new(HashMap::new()));
    let line = format!("{name}: {value}");
    let mut cache = LINES.lock().unwrap();
    if let Some(interned) = cache.get(&line) {
        return interned;
    }
    let leaked: &'static str = Box::leak(line.clone().into_boxed_str());
    cache.insert(line, leaked);
    leaked
}

fn status_reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        417 => "Expectation Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Encode a [`Response`] onto the wire.
pub fn write_response(out: &mut may_minihttp::Response, response: Response) {
    out.status_code(response.status as usize, status_reason(response.status));
    let mut content_type_set = false;
    for (name, value) in &response.headers {
        if name.as_ref() == "content-type" {
            content_type_set = true;
        }
        out.header(intern_header_line(name, value));
    }
    match response.body {
        Body::Empty => {}
        Body::Bytes(bytes) => {
            out.body_vec(bytes);
        }
        Body::Json(value) => {
            if !content_type_set {
                out.header("Content-Type: application/json");
            }
            match serde_json::to_vec(&value) {
                Ok(bytes) => out.body_vec(bytes),
                Err(_) => {
                    out.status_code(500, status_reason(500));
                    out.body_vec(b"{\"error\":\"internal\"}".to_vec());
                }
            }
        }
        Body::Stream(stream) => match stream.drain() {
            Ok(bytes) => out.body_vec(bytes),
            Err(_) => {
                out.status_code(500, status_reason(500));
                out.body_vec(b"{\"error\":\"internal\"}".to_vec());
            }
        },
    }
}
