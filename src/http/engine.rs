//! Incremental HTTP/1.x request engine.
//!
//! [`RequestEngine`] is fed arbitrary byte chunks and reports what it finds
//! through a [`ParserCallbacks`] implementation. The head is collected until
//! `httparse` sees it complete, then the target and every header are handed
//! over as spans; the body follows in whatever pieces the chunks provide. The
//! engine stops right after a complete message so that bytes of a following
//! request stay with the caller.
//!
//! Only `Content-Length` framing is supported; chunked transfer-encoding and
//! obsolete header line folding are rejected.

use crate::http::parser::ParseError;
use crate::http::request::Method;

/// Upper bound for request line plus headers.
pub const MAX_HEAD_SIZE: usize = 80 * 1024;

const MIN_HEADERS: usize = 64;
const MAX_HEADERS: usize = 1024;

/// Request line facts handed over when a message completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHead {
    pub method: Method,
    pub http_major: u8,
    pub http_minor: u8,
    pub keep_alive: bool,
}

/// Receiver of parse events.
///
/// Body spans may arrive in several calls when the body is split across
/// chunks; the receiver concatenates.
pub trait ParserCallbacks {
    fn on_message_begin(&mut self) {}
    fn on_url(&mut self, _at: &[u8]) {}
    fn on_header_field(&mut self, _at: &[u8]) {}
    fn on_header_value(&mut self, _at: &[u8]) {}
    fn on_headers_complete(&mut self) {}
    fn on_body(&mut self, _at: &[u8]) {}
    fn on_message_complete(&mut self, _head: &MessageHead) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body,
    Done,
    Dead,
}

/// What the header block says about framing and connection reuse.
#[derive(Debug, Default)]
struct Framing {
    size: usize,
    method: Method,
    minor: u8,
    content_length: Option<u64>,
    connection_close: bool,
    connection_keep_alive: bool,
    transfer_encoded: bool,
}

impl Framing {
    fn scan(&mut self, name: &str, value: &[u8]) -> Result<(), ParseError> {
        let value = trim(value);
        if name.eq_ignore_ascii_case("content-length") {
            let length = parse_length(value).ok_or(ParseError::InvalidContentLength)?;
            if self.content_length.is_some_and(|previous| previous != length) {
                return Err(ParseError::InvalidContentLength);
            }
            self.content_length = Some(length);
        } else if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("proxy-connection") {
            for token in value.split(|b| *b == b',').map(trim) {
                if token.eq_ignore_ascii_case(b"close") {
                    self.connection_close = true;
                } else if token.eq_ignore_ascii_case(b"keep-alive") {
                    self.connection_keep_alive = true;
                }
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.transfer_encoded |= value
                .split(|b| *b == b',')
                .map(trim)
                .any(|coding| !coding.is_empty() && !coding.eq_ignore_ascii_case(b"identity"));
        }
        Ok(())
    }
}

pub struct RequestEngine {
    state: State,
    error: Option<ParseError>,
    // head bytes received so far, reparsed on every chunk
    head: Vec<u8>,
    method: Method,
    major: u8,
    minor: u8,
    remaining: u64,
    connection_close: bool,
    connection_keep_alive: bool,
}

impl Default for RequestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestEngine {
    pub fn new() -> Self {
        Self {
            state: State::Head,
            error: None,
            head: Vec::new(),
            method: Method::GET,
            major: 0,
            minor: 0,
            remaining: 0,
            connection_close: false,
            connection_keep_alive: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// Whether the connection may carry another request after this one.
    pub fn should_keep_alive(&self) -> bool {
        if self.major > 1 || (self.major == 1 && self.minor >= 1) {
            !self.connection_close
        } else {
            self.connection_keep_alive && !self.connection_close
        }
    }

    /// Feeds `data` and returns how many bytes were consumed.
    ///
    /// Fewer than `data.len()` bytes are consumed only when a message
    /// completed inside the chunk. After an error every further call fails
    /// with the same error. Calling it again after completion starts the next
    /// message.
    pub fn execute<C: ParserCallbacks>(&mut self, cb: &mut C, data: &[u8]) -> Result<usize, ParseError> {
        match self.state {
            State::Dead => return Err(self.error.clone().unwrap_or(ParseError::InvalidHeader)),
            State::Done => *self = Self::new(),
            State::Head | State::Body => {}
        }

        let mut consumed = 0;
        if self.state == State::Head {
            let before = self.head.len();
            // one byte past the limit is enough to tell an oversized head
            let room = (MAX_HEAD_SIZE + 1).saturating_sub(before);
            self.head.extend_from_slice(&data[..data.len().min(room)]);

            let framing = match parse_head(&self.head, cb) {
                Ok(Some(framing)) => framing,
                Ok(None) if self.head.len() > MAX_HEAD_SIZE => return self.fail(ParseError::HeadTooLarge),
                Ok(None) => return Ok(data.len()),
                Err(e) => return self.fail(e),
            };
            if framing.size > MAX_HEAD_SIZE {
                return self.fail(ParseError::HeadTooLarge);
            }
            consumed = framing.size.saturating_sub(before);
            self.head = Vec::new();

            self.method = framing.method;
            self.major = 1;
            self.minor = framing.minor;
            self.connection_close = framing.connection_close;
            self.connection_keep_alive = framing.connection_keep_alive;

            if framing.transfer_encoded {
                return self.fail(ParseError::UnsupportedTransferEncoding);
            }
            match framing.content_length {
                Some(length) if length > 0 && self.method != Method::CONNECT => {
                    self.remaining = length;
                    self.state = State::Body;
                }
                _ => return Ok(self.complete(cb, consumed)),
            }
        }

        let take = ((data.len() - consumed) as u64).min(self.remaining) as usize;
        if take > 0 {
            cb.on_body(&data[consumed..consumed + take]);
            self.remaining -= take as u64;
            consumed += take;
        }
        if self.remaining == 0 {
            return Ok(self.complete(cb, consumed));
        }
        Ok(consumed)
    }

    fn fail(&mut self, error: ParseError) -> Result<usize, ParseError> {
        self.state = State::Dead;
        self.error = Some(error.clone());
        Err(error)
    }

    fn complete<C: ParserCallbacks>(&mut self, cb: &mut C, consumed: usize) -> usize {
        self.state = State::Done;
        let head = MessageHead {
            method: self.method,
            http_major: self.major,
            http_minor: self.minor,
            keep_alive: self.should_keep_alive(),
        };
        cb.on_message_complete(&head);
        consumed
    }
}

/// Parses the buffered head. `None` means more bytes are needed.
///
/// Callbacks for the target and headers fire only once the head is complete.
fn parse_head<C: ParserCallbacks>(buf: &[u8], cb: &mut C) -> Result<Option<Framing>, ParseError> {
    let mut vec;
    let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut raw = httparse::Request::new(&mut headers);
    let mut result = raw.parse(buf);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut vec);
        result = raw.parse(buf);
    }

    let size = match result.map_err(|e| classify(e, buf))? {
        httparse::Status::Complete(size) => size,
        httparse::Status::Partial => return Ok(None),
    };
    let (Some(token), Some(path), Some(minor)) = (raw.method, raw.path, raw.version) else {
        return Err(ParseError::InvalidMethod);
    };
    let method = Method::from_str(token).ok_or(ParseError::InvalidMethod)?;

    let mut framing = Framing {
        size,
        method,
        minor,
        ..Framing::default()
    };

    cb.on_message_begin();
    cb.on_url(path.as_bytes());
    for header in raw.headers.iter() {
        framing.scan(header.name, header.value)?;
        cb.on_header_field(header.name.as_bytes());
        cb.on_header_value(header.value);
    }
    cb.on_headers_complete();
    Ok(Some(framing))
}

fn classify(error: httparse::Error, buf: &[u8]) -> ParseError {
    match error {
        httparse::Error::Version => ParseError::InvalidVersion,
        httparse::Error::TooManyHeaders => ParseError::HeadTooLarge,
        // a bad token after a well-formed method belongs to the target
        httparse::Error::Token if has_method_token(buf) => ParseError::InvalidUrl,
        httparse::Error::Token => ParseError::InvalidMethod,
        _ => ParseError::InvalidHeader,
    }
}

fn has_method_token(buf: &[u8]) -> bool {
    let line = match buf.iter().position(|b| !matches!(b, b'\r' | b'\n')) {
        Some(start) => &buf[start..],
        None => return false,
    };
    match line.iter().position(|b| *b == b' ') {
        Some(0) | None => false,
        Some(end) => line[..end].iter().all(|b| is_token(*b)),
    }
}

fn parse_length(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 19 {
        return None;
    }
    value.iter().try_fold(0u64, |acc, b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b' ' | b'\t'))
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn is_token(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        head: Option<MessageHead>,
    }

    impl Recorder {
        fn span(&mut self, kind: &str, at: &[u8]) {
            let text = String::from_utf8_lossy(at);
            match self.events.last_mut() {
                Some(last) if last.starts_with(kind) => last.push_str(&text),
                _ => self.events.push(format!("{kind}{text}")),
            }
        }
    }

    impl ParserCallbacks for Recorder {
        fn on_message_begin(&mut self) {
            self.events.push("begin".into());
        }
        fn on_url(&mut self, at: &[u8]) {
            self.span("url:", at);
        }
        fn on_header_field(&mut self, at: &[u8]) {
            self.span("field:", at);
        }
        fn on_header_value(&mut self, at: &[u8]) {
            self.span("value:", at);
        }
        fn on_headers_complete(&mut self) {
            self.events.push("headers".into());
        }
        fn on_body(&mut self, at: &[u8]) {
            self.span("body:", at);
        }
        fn on_message_complete(&mut self, head: &MessageHead) {
            self.events.push("complete".into());
            self.head = Some(*head);
        }
    }

    fn run(input: &[u8]) -> (Recorder, Result<usize, ParseError>) {
        let mut engine = RequestEngine::new();
        let mut recorder = Recorder::default();
        let result = engine.execute(&mut recorder, input);
        (recorder, result)
    }

    #[test]
    fn events_follow_message_structure() {
        let input = b"POST /a HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabc";
        let (rec, result) = run(input);
        assert_eq!(result.unwrap(), input.len());
        assert_eq!(
            rec.events,
            vec![
                "begin",
                "url:/a",
                "field:Host",
                "value:x",
                "field:Content-Length",
                "value:3",
                "headers",
                "body:abc",
                "complete",
            ]
        );
        let head = rec.head.unwrap();
        assert_eq!(head.method, Method::POST);
        assert_eq!((head.http_major, head.http_minor), (1, 1));
        assert!(head.keep_alive);
    }

    #[test]
    fn stops_after_complete_message() {
        let input = b"GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n";
        let (rec, result) = run(input);
        assert_eq!(result.unwrap(), 18);
        assert_eq!(rec.events.last().unwrap(), "complete");
    }

    #[test]
    fn head_split_across_chunks_is_reported_once_complete() {
        let mut engine = RequestEngine::new();
        let mut rec = Recorder::default();

        assert_eq!(engine.execute(&mut rec, b"GET /sp").unwrap(), 7);
        assert_eq!(engine.execute(&mut rec, b"lit HTTP/1.1\r\nHo").unwrap(), 16);
        assert!(rec.events.is_empty());

        let rest = b"st: x\r\n\r\nGET";
        assert_eq!(engine.execute(&mut rec, rest).unwrap(), rest.len() - 3);
        assert!(engine.is_complete());
        assert_eq!(
            rec.events,
            vec!["begin", "url:/split", "field:Host", "value:x", "headers", "complete"]
        );
    }

    #[test]
    fn body_spans_follow_chunks() {
        let mut engine = RequestEngine::new();
        let mut rec = Recorder::default();

        let head = b"PUT /b HTTP/1.1\r\nContent-Length: 6\r\n\r\nab";
        assert_eq!(engine.execute(&mut rec, head).unwrap(), head.len());
        assert!(!engine.is_complete());
        assert_eq!(engine.execute(&mut rec, b"cdefXYZ").unwrap(), 4);
        assert!(engine.is_complete());
        assert!(rec.events.contains(&"body:abcdef".to_string()));
    }

    #[test]
    fn empty_header_value_is_reported() {
        let (rec, result) = run(b"GET / HTTP/1.1\r\nX-Empty:\r\nX-Next: 1\r\n\r\n");
        assert!(result.is_ok());
        assert!(rec.events.contains(&"value:".to_string()));
        assert!(rec.events.contains(&"field:X-Next".to_string()));
    }

    #[test]
    fn bare_lf_and_leading_blank_lines_are_tolerated() {
        let (rec, result) = run(b"\r\n\r\nGET /lf HTTP/1.0\nA: b\n\n");
        assert!(result.is_ok());
        assert!(rec.events.contains(&"url:/lf".to_string()));
        assert!(!rec.head.unwrap().keep_alive);
    }

    #[test]
    fn keep_alive_follows_version_and_connection_header() {
        let cases: [(&[u8], bool); 4] = [
            (b"GET / HTTP/1.1\r\n\r\n", true),
            (b"GET / HTTP/1.1\r\nConnection: Close\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\n\r\n", false),
            (b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", true),
        ];
        for (input, expected) in cases {
            let (rec, _) = run(input);
            assert_eq!(rec.head.unwrap().keep_alive, expected);
        }
    }

    #[test]
    fn connect_completes_at_end_of_headers() {
        let (rec, result) = run(b"CONNECT example.com:443 HTTP/1.1\r\nContent-Length: 5\r\n\r\ntunnel");
        assert_eq!(result.unwrap(), 55);
        assert!(!rec.events.iter().any(|e| e.starts_with("body:")));
    }

    #[test]
    fn rejects_malformed_input() {
        let cases: [(&[u8], ParseError); 8] = [
            (b"FETCH / HTTP/1.1\r\n\r\n", ParseError::InvalidMethod),
            (b"GET /a\x01b HTTP/1.1\r\n\r\n", ParseError::InvalidUrl),
            (b"GET /a b HTTP/1.1\r\n\r\n", ParseError::InvalidVersion),
            (b"GET / HTTP/2.0\r\n\r\n", ParseError::InvalidVersion),
            (b"GET / HTTP/1.1\r\nNo-Colon\r\n\r\n", ParseError::InvalidHeader),
            (b"GET / HTTP/1.1\r\nA: b\r\n  folded\r\n\r\n", ParseError::InvalidHeader),
            (b"POST / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n", ParseError::InvalidContentLength),
            (b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n", ParseError::UnsupportedTransferEncoding),
        ];
        for (input, expected) in cases {
            let (_, result) = run(input);
            assert_eq!(result.unwrap_err(), expected, "{}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn conflicting_content_lengths_are_rejected() {
        let (_, result) = run(b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 3\r\n\r\n");
        assert_eq!(result.unwrap_err(), ParseError::InvalidContentLength);

        let input = b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nok";
        let (_, result) = run(input);
        assert_eq!(result.unwrap(), input.len());
    }

    #[test]
    fn errors_are_sticky() {
        let mut engine = RequestEngine::new();
        let mut rec = Recorder::default();
        assert!(engine.execute(&mut rec, b"BAD\x01").is_err());
        assert_eq!(engine.execute(&mut rec, b"GET / HTTP/1.1\r\n\r\n").unwrap_err(), ParseError::InvalidMethod);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut input = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        input.extend(std::iter::repeat_n(b'a', MAX_HEAD_SIZE));
        let (_, result) = run(&input);
        assert_eq!(result.unwrap_err(), ParseError::HeadTooLarge);
    }
}
