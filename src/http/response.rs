use bytes::BytesMut;

/// HTTP status codes with a known reason phrase.
///
/// A [`Response`] carries a raw `u16`; codes missing from this table are
/// never put on the wire, the writer downgrades them to 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Continue,
    SwitchingProtocols,
    /// 200 OK
    Ok,
    Created,
    Accepted,
    NonAuthoritativeInformation,
    NoContent,
    ResetContent,
    PartialContent,
    MultipleChoices,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    UseProxy,
    TemporaryRedirect,
    /// 400 Bad Request
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    /// 404 Not Found
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestEntityTooLarge,
    RequestUriTooLong,
    UnsupportedMediaType,
    RequestedRangeNotSatisfiable,
    ExpectationFailed,
    /// 500 Internal Server Error
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
}

// Indexed by discriminant: keep in the declaration order of `StatusCode`.
const STATUS_TABLE: &[(StatusCode, u16, &str)] = &[
    (StatusCode::Continue, 100, "Continue"),
    (StatusCode::SwitchingProtocols, 101, "Switching Protocols"),
    (StatusCode::Ok, 200, "OK"),
    (StatusCode::Created, 201, "Created"),
    (StatusCode::Accepted, 202, "Accepted"),
    (StatusCode::NonAuthoritativeInformation, 203, "Non-Authoritative Information"),
    (StatusCode::NoContent, 204, "No Content"),
    (StatusCode::ResetContent, 205, "Reset Content"),
    (StatusCode::PartialContent, 206, "Partial Content"),
    (StatusCode::MultipleChoices, 300, "Multiple Choices"),
    (StatusCode::MovedPermanently, 301, "Moved Permanently"),
    (StatusCode::Found, 302, "Found"),
    (StatusCode::SeeOther, 303, "See Other"),
    (StatusCode::NotModified, 304, "Not Modified"),
    (StatusCode::UseProxy, 305, "Use Proxy"),
    (StatusCode::TemporaryRedirect, 307, "Temporary Redirect"),
    (StatusCode::BadRequest, 400, "Bad Request"),
    (StatusCode::Unauthorized, 401, "Unauthorized"),
    (StatusCode::PaymentRequired, 402, "Payment Required"),
    (StatusCode::Forbidden, 403, "Forbidden"),
    (StatusCode::NotFound, 404, "Not Found"),
    (StatusCode::MethodNotAllowed, 405, "Method Not Allowed"),
    (StatusCode::NotAcceptable, 406, "Not Acceptable"),
    (StatusCode::ProxyAuthenticationRequired, 407, "Proxy Authentication Required"),
    (StatusCode::RequestTimeout, 408, "Request Timeout"),
    (StatusCode::Conflict, 409, "Conflict"),
    (StatusCode::Gone, 410, "Gone"),
    (StatusCode::LengthRequired, 411, "Length Required"),
    (StatusCode::PreconditionFailed, 412, "Precondition Failed"),
    (StatusCode::RequestEntityTooLarge, 413, "Request Entity Too Large"),
    (StatusCode::RequestUriTooLong, 414, "Request-URI Too Long"),
    (StatusCode::UnsupportedMediaType, 415, "Unsupported Media Type"),
    (StatusCode::RequestedRangeNotSatisfiable, 416, "Requested Range Not Satisfiable"),
    (StatusCode::ExpectationFailed, 417, "Expectation Failed"),
    (StatusCode::InternalServerError, 500, "Internal Server Error"),
    (StatusCode::NotImplemented, 501, "Not Implemented"),
    (StatusCode::BadGateway, 502, "Bad Gateway"),
    (StatusCode::ServiceUnavailable, 503, "Service Unavailable"),
    (StatusCode::GatewayTimeout, 504, "Gateway Timeout"),
    (StatusCode::HttpVersionNotSupported, 505, "HTTP Version Not Supported"),
];

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use coserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.entry().1
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        self.entry().2
    }

    /// Looks up a numeric code; `None` for codes without a reason phrase.
    ///
    /// ```
    /// # use coserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::from_u16(503), Some(StatusCode::ServiceUnavailable));
    /// assert_eq!(StatusCode::from_u16(999), None);
    /// ```
    pub fn from_u16(code: u16) -> Option<Self> {
        STATUS_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(status, _, _)| *status)
    }

    fn entry(&self) -> &'static (StatusCode, u16, &'static str) {
        &STATUS_TABLE[*self as usize]
    }
}

/// An HTTP response under construction.
///
/// The body is written incrementally through [`body_mut`](Response::body_mut)
/// (it implements [`std::fmt::Write`]); `Content-Length` is derived from it
/// when the response is serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Numeric status; unknown codes are sent as 500
    pub code: u16,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    pub body: BytesMut,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            code: status.as_u16(),
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl AsRef<[u8]>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NotFound)
            .body(b"404 Not Found")
            .build()
    }

    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.code)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.code = status.as_u16();
    }

    /// Appends a header; earlier headers of the same name are kept.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Replaces every header named `name` with a single one.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// False once the response carries `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        !self
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("Connection"))
            .any(|(_, v)| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
    }
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use coserve::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}")
///     .build();
/// assert_eq!(response.header("content-type"), Some("application/json"));
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response::new(status),
        }
    }

    /// Appends a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.add_header(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.response.body.clear();
        self.response.body.extend_from_slice(body.as_ref());
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_follows_declaration_order() {
        for (i, (status, code, _)) in STATUS_TABLE.iter().enumerate() {
            assert_eq!(*status as usize, i);
            assert_eq!(StatusCode::from_u16(*code), Some(*status));
        }
    }

    #[test]
    fn connection_close_vetoes_keep_alive() {
        let mut response = Response::default();
        assert!(response.keep_alive());

        response.add_header("connection", "Upgrade, close");
        assert!(!response.keep_alive());
    }
}
