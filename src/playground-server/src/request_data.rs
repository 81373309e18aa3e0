//! Builds the dispatcher-facing [`HttpRequestData`] from an Axum request,
//! once, in the request-logger middleware — both the logger's
//! [`playground_common::RequestRecord`] and the dynamic-router handler read
//! off the same parsed value via the request extension it installs, so the
//! body is never re-parsed and never diverges between the two consumers.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use playground_common::{HttpRequestData, OneOrMany};

fn push(map: &mut HashMap<String, OneOrMany>, key: String, value: String) {
    map.entry(key)
        .and_modify(|existing| existing.push(value.clone()))
        .or_insert(OneOrMany::One(value));
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|s| u8::from_str_radix(s, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_query(query: Option<&str>) -> HashMap<String, OneOrMany> {
    let mut map = HashMap::new();
    let Some(query) = query else { return map };

    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        push(&mut map, percent_decode(key), percent_decode(value));
    }
    map
}

fn parse_headers(headers: &HeaderMap) -> HashMap<String, OneOrMany> {
    let mut map = HashMap::new();
    for (name, value) in headers.iter() {
        let value = value.to_str().unwrap_or_default().to_string();
        push(&mut map, name.as_str().to_ascii_lowercase(), value);
    }
    map
}

fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for header in headers.get_all(HeaderName::from_static("cookie")) {
        let Ok(header) = header.to_str() else { continue };
        for pair in header.split(';') {
            let pair = pair.trim();
            if let Some((name, value)) = pair.split_once('=') {
                // Last occurrence wins on duplicate cookie names.
                map.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    map
}

fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = parts.headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return real_ip.trim().to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn protocol(parts: &Parts) -> &'static str {
    parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
        .then_some("https")
        .unwrap_or("http")
}

fn hostname(parts: &Parts) -> String {
    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    // Strip a trailing `:port`; IPv6 literals (`[::1]:8080`) keep their
    // brackets and are returned with the bracketed form intact.
    if let Some(bracket_end) = host.rfind(']') {
        return host[..=bracket_end].to_string();
    }
    host.split(':').next().unwrap_or(host).to_string()
}

/// Build the canonical [`HttpRequestData`] for a request, given its parts
/// and fully-buffered body bytes.
pub fn build(parts: &Parts, body: Bytes) -> HttpRequestData {
    let method = parts.method.as_str().to_ascii_uppercase();
    let path = parts.uri.path().to_string();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| path.clone());
    let content_type = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    HttpRequestData {
        method,
        path,
        url,
        query: parse_query(parts.uri.query()),
        headers: parse_headers(&parts.headers),
        cookies: parse_cookies(&parts.headers),
        body: body.to_vec(),
        content_type,
        remote_addr: client_ip(parts),
        protocol: protocol(parts),
        hostname: hostname(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_escapes_and_plus() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%25"), "100%");
    }

    #[test]
    fn query_parsing_promotes_repeated_keys() {
        let parsed = parse_query(Some("tag=a&tag=b&q=hi%20there"));
        assert_eq!(
            parsed.get("tag"),
            Some(&OneOrMany::Many(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(parsed.get("q"), Some(&OneOrMany::One("hi there".to_string())));
    }
}
