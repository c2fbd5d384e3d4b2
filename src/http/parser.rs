//! Request parsing on top of [`RequestEngine`].
//!
//! [`RequestParser`] is the callback receiver that assembles a [`Request`]
//! from engine events; [`parse`] drives it from a stream, suspending on every
//! refill.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::engine::{MessageHead, ParserCallbacks, RequestEngine};
use crate::http::request::{Method, Request};
use crate::io::AsyncStream;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("request head too large")]
    HeadTooLarge,
    #[error("incomplete request")]
    Incomplete,
}

/// Where the parser is inside the current message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    None,
    Url,
    Field,
    Value,
    Body,
    End,
}

/// Assembles a [`Request`] from engine callbacks.
pub struct RequestParser<'r> {
    request: &'r mut Request,
    url: Vec<u8>,
    field: Vec<u8>,
    value: Vec<u8>,
    state: ParserState,
    completed: bool,
}

impl<'r> RequestParser<'r> {
    pub fn new(request: &'r mut Request) -> Self {
        Self {
            request,
            url: Vec::new(),
            field: Vec::new(),
            value: Vec::new(),
            state: ParserState::None,
            completed: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    fn commit_header(&mut self) {
        if self.field.is_empty() {
            return;
        }
        let end = self
            .value
            .iter()
            .rposition(|b| !matches!(b, b' ' | b'\t'))
            .map_or(0, |i| i + 1);
        self.request.headers.push((
            String::from_utf8_lossy(&self.field).into_owned(),
            String::from_utf8_lossy(&self.value[..end]).into_owned(),
        ));
        self.field.clear();
        self.value.clear();
    }
}

impl ParserCallbacks for RequestParser<'_> {
    fn on_message_begin(&mut self) {
        self.url.clear();
        self.state = ParserState::None;
        self.completed = false;
    }

    fn on_url(&mut self, at: &[u8]) {
        if self.state != ParserState::Url {
            self.url.clear();
        }
        self.url.extend_from_slice(at);
        self.state = ParserState::Url;
    }

    fn on_header_field(&mut self, at: &[u8]) {
        if self.state != ParserState::Field {
            self.commit_header();
        }
        self.field.extend_from_slice(at);
        self.state = ParserState::Field;
    }

    fn on_header_value(&mut self, at: &[u8]) {
        if self.state != ParserState::Value {
            self.value.clear();
        }
        self.value.extend_from_slice(at);
        self.state = ParserState::Value;
    }

    fn on_headers_complete(&mut self) {
        self.commit_header();
    }

    fn on_body(&mut self, at: &[u8]) {
        if self.state != ParserState::Body {
            self.request.body.clear();
        }
        self.request.body.extend_from_slice(at);
        self.state = ParserState::Body;
    }

    fn on_message_complete(&mut self, head: &MessageHead) {
        self.state = ParserState::End;
        self.completed = true;

        let request = &mut *self.request;
        request.method = head.method;
        request.http_major = head.http_major;
        request.http_minor = head.http_minor;
        request.keep_alive = head.keep_alive;
        request.url = String::from_utf8_lossy(&self.url).into_owned();
        split_target(request);
    }
}

/// Fills the URL components of `request` from its raw target.
///
/// Components are taken verbatim from the target: no dot-segment removal, no
/// percent decoding, and an explicit port is kept even when it is the
/// scheme's default. Scheme, user info, host and port only exist in
/// absolute-form targets (proxy requests) and in CONNECT authority-form
/// targets.
fn split_target(request: &mut Request) {
    let target = request.url.clone();

    if request.method == Method::CONNECT {
        let (host, port) = split_host_port(&target);
        request.host = Some(host.to_string());
        request.port = port;
        return;
    }

    if target == "*" {
        request.path = Some(target);
        return;
    }

    if target.starts_with('/') {
        split_path_query(request, &target);
        return;
    }

    let valid = url::Url::parse(&target).is_ok_and(|url| url.has_host());
    let Some((scheme, rest)) = target.split_once("://").filter(|_| valid) else {
        tracing::debug!(target = %target, "request target has no recognizable components");
        return;
    };

    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    let host_port = match authority.rsplit_once('@') {
        Some((user_info, host_port)) => {
            if !user_info.is_empty() {
                request.user_info = Some(user_info.to_string());
            }
            host_port
        }
        None => authority,
    };
    let (host, port) = split_host_port(host_port);

    request.scheme = Some(scheme.to_string());
    request.host = Some(host.to_string());
    request.port = port;
    split_path_query(request, tail);
}

fn split_path_query(request: &mut Request, target: &str) {
    let target = target.split('#').next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    if !path.is_empty() {
        request.path = Some(path.to_string());
    }
    request.query = query.map(str::to_string);
}

/// Splits `host[:port]`, unwrapping bracketed IPv6 hosts.
fn split_host_port(authority: &str) -> (&str, Option<u16>) {
    if let Some((host, tail)) = authority
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
    {
        return (host, tail.strip_prefix(':').and_then(|port| port.parse().ok()));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()),
        None => (authority, None),
    }
}

/// Reads one request from `stream` into `request`.
///
/// Returns `true` when a complete request was parsed, and also when the peer
/// closed the connection before sending a single byte (then
/// `request.closed` is set). Returns `false` on malformed input or when the
/// connection ended in the middle of a request. Bytes following the request
/// stay buffered in the stream.
pub async fn parse<S>(stream: &mut AsyncStream<S>, request: &mut Request) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    request.closed = false;
    request.valid = false;
    request.keep_alive = false;

    let mut engine = RequestEngine::new();
    let mut parser = RequestParser::new(request);
    let mut received = 0usize;

    while !parser.completed {
        let chunk = match stream.fill_buf().await {
            Ok(chunk) if !chunk.is_empty() => chunk,
            other => {
                if let Err(e) = other {
                    tracing::debug!(error = %e, "read failed while waiting for request");
                }
                if received == 0 {
                    parser.request.closed = true;
                    return true;
                }
                tracing::debug!(received, "connection ended inside a request");
                break;
            }
        };

        match engine.execute(&mut parser, chunk) {
            Ok(consumed) => {
                stream.consume(consumed);
                received += consumed;
            }
            Err(e) => {
                tracing::debug!(error = %e, "malformed request");
                return false;
            }
        }
    }

    parser.request.valid = parser.completed;
    parser.completed
}

/// Parses one request from a complete buffer.
///
/// Returns the request and the number of bytes it occupied.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let mut request = Request::default();
    let mut engine = RequestEngine::new();
    let mut parser = RequestParser::new(&mut request);

    let consumed = engine.execute(&mut parser, buf)?;
    if !parser.completed() {
        return Err(ParseError::Incomplete);
    }
    request.valid = true;
    Ok((request, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path.as_deref(), Some("/"));
        assert_eq!(parsed.header("Host"), Some("example.com"));
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn header_state_alternates_field_and_value() {
        let mut request = Request::default();
        let mut parser = RequestParser::new(&mut request);

        parser.on_message_begin();
        parser.on_url(b"/");
        parser.on_header_field(b"Ho");
        parser.on_header_field(b"st");
        assert_eq!(parser.state(), ParserState::Field);
        parser.on_header_value(b"a  ");
        parser.on_header_value(b"b  ");
        assert_eq!(parser.state(), ParserState::Value);
        parser.on_header_field(b"X");
        parser.on_header_value(b"1");
        parser.on_headers_complete();

        assert_eq!(
            request.headers,
            vec![
                ("Host".to_string(), "a  b".to_string()),
                ("X".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn absolute_form_target_fills_proxy_components() {
        let req = b"GET http://user:pw@example.com:8080/a/b?x=1&y=2 HTTP/1.1\r\n\r\n";
        let (parsed, _) = parse_http_request(req).unwrap();

        assert_eq!(parsed.scheme.as_deref(), Some("http"));
        assert_eq!(parsed.user_info.as_deref(), Some("user:pw"));
        assert_eq!(parsed.host.as_deref(), Some("example.com"));
        assert_eq!(parsed.port, Some(8080));
        assert_eq!(parsed.path.as_deref(), Some("/a/b"));
        assert_eq!(parsed.query.as_deref(), Some("x=1&y=2"));
    }

    #[test]
    fn absolute_form_components_are_raw() {
        let req = b"GET http://example.com:80/a/../b%zz HTTP/1.1\r\n\r\n";
        let (parsed, _) = parse_http_request(req).unwrap();

        assert_eq!(parsed.host.as_deref(), Some("example.com"));
        assert_eq!(parsed.port, Some(80));
        assert_eq!(parsed.path.as_deref(), Some("/a/../b%zz"));
        assert_eq!(parsed.query, None);

        let (bare, _) = parse_http_request(b"GET http://example.com HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(bare.scheme.as_deref(), Some("http"));
        assert_eq!(bare.host.as_deref(), Some("example.com"));
        assert_eq!(bare.port, None);
        assert_eq!(bare.path, None);

        let (query_only, _) = parse_http_request(b"GET http://h?x=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(query_only.path, None);
        assert_eq!(query_only.query.as_deref(), Some("x=1"));
    }

    #[test]
    fn unrecognized_target_leaves_components_empty() {
        let (parsed, _) = parse_http_request(b"GET relative/path HTTP/1.1\r\n\r\n").unwrap();
        assert!(parsed.valid);
        assert_eq!(parsed.url, "relative/path");
        assert_eq!((parsed.scheme, parsed.host, parsed.path), (None, None, None));
    }

    #[test]
    fn connect_target_is_authority() {
        let req = b"CONNECT [::1]:443 HTTP/1.1\r\n\r\n";
        let (parsed, _) = parse_http_request(req).unwrap();

        assert_eq!(parsed.method, Method::CONNECT);
        assert_eq!(parsed.host.as_deref(), Some("::1"));
        assert_eq!(parsed.port, Some(443));
        assert_eq!(parsed.path, None);
        assert_eq!(parsed.scheme, None);
    }

    #[test]
    fn asterisk_and_fragment_targets() {
        let (parsed, _) = parse_http_request(b"OPTIONS * HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.path.as_deref(), Some("*"));

        let (parsed, _) = parse_http_request(b"GET /doc#top HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(parsed.path.as_deref(), Some("/doc"));
        assert_eq!(parsed.query, None);
    }
}
