use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single value or a list of values — how `req.query` and `req.headers`
/// represent keys that may legitimately repeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    /// The key appeared exactly once.
    One(String),
    /// The key appeared more than once, in request order.
    Many(Vec<String>),
}

impl OneOrMany {
    /// Push an additional occurrence, promoting `One` to `Many` as needed.
    pub fn push(&mut self, value: String) {
        match self {
            OneOrMany::One(existing) => {
                *self = OneOrMany::Many(vec![std::mem::take(existing), value]);
            }
            OneOrMany::Many(values) => values.push(value),
        }
    }
}

/// Everything the dispatcher needs to build a script-visible `req` object,
/// captured before the request crosses into the dispatcher thread.
#[derive(Debug, Clone)]
pub struct HttpRequestData {
    /// Upper-case HTTP method (`GET`, `POST`, ...).
    pub method: String,
    /// Path portion of the request target, percent-decoding left to the
    /// transport layer.
    pub path: String,
    /// Original request target (path + query string) as received.
    pub url: String,
    /// Query string parameters, a key may map to one or many values.
    pub query: HashMap<String, OneOrMany>,
    /// Request headers, keyed by canonical lower-case name.
    pub headers: HashMap<String, OneOrMany>,
    /// Cookie name to value; last occurrence in the `Cookie` header wins.
    pub cookies: HashMap<String, String>,
    /// Raw request body, capped by the logger middleware's ceiling.
    pub body: Vec<u8>,
    /// `Content-Type` header value, if present.
    pub content_type: Option<String>,
    /// Best-effort client address (`X-Forwarded-For`, then `X-Real-IP`,
    /// then the transport peer).
    pub remote_addr: String,
    /// `"http"` or `"https"`.
    pub protocol: &'static str,
    /// `Host` header with any port suffix stripped.
    pub hostname: String,
}

/// The result of running a matched handler (or the file registry, or a
/// not-found fallback) to completion, ready to be written to the wire.
#[derive(Debug, Clone)]
pub struct HttpResponseOutcome {
    /// Status code the handler (or the framework default) settled on.
    pub status: u16,
    /// Response headers in insertion order, including any `Set-Cookie`
    /// entries appended via `res.cookie(...)`.
    pub headers: Vec<(String, String)>,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// `"{METHOD} {pattern}"` of the `HandlerRegistry` entry that served this
    /// request, if any (legacy file-registry hits and not-found responses
    /// leave this `None`). Surfaced to the request logger as the handler
    /// name.
    pub matched_route: Option<String>,
}

impl HttpResponseOutcome {
    /// The default response written when a handler returns without ending
    /// the response itself: `200` with an empty body.
    pub fn default_ok() -> Self {
        HttpResponseOutcome {
            status: status::OK,
            headers: Vec::new(),
            body: Vec::new(),
            matched_route: None,
        }
    }
}

/// HTTP status codes named the way scripts see them through the
/// `HttpStatus` global (`HttpStatus.OK`, `HttpStatus.NOT_FOUND`, ...).
pub mod status {
    /// 200 OK
    pub const OK: u16 = 200;
    /// 201 Created
    pub const CREATED: u16 = 201;
    /// 204 No Content
    pub const NO_CONTENT: u16 = 204;
    /// 302 Found (default for `res.redirect`)
    pub const FOUND: u16 = 302;
    /// 400 Bad Request
    pub const BAD_REQUEST: u16 = 400;
    /// 401 Unauthorized
    pub const UNAUTHORIZED: u16 = 401;
    /// 403 Forbidden
    pub const FORBIDDEN: u16 = 403;
    /// 404 Not Found
    pub const NOT_FOUND: u16 = 404;
    /// 409 Conflict
    pub const CONFLICT: u16 = 409;
    /// 500 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    /// 504 Gateway Timeout
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_or_many_promotes_on_second_push() {
        let mut v = OneOrMany::One("a".to_string());
        v.push("b".to_string());
        assert_eq!(v, OneOrMany::Many(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn default_ok_has_empty_body_and_200() {
        let outcome = HttpResponseOutcome::default_ok();
        assert_eq!(outcome.status, status::OK);
        assert!(outcome.body.is_empty());
    }
}
