pub mod request;
pub mod response;
mod service;

pub use request::{parse_cookies, parse_query_params, parse_request, HeaderVec, HttpRequest};
pub use response::{write_response, Body, Response, StreamBody};
pub use service::{serve, EngineService, ServerHandle};
