use std::fmt;

/// HTTP request methods understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// GET - Retrieve a resource
    #[default]
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// CONNECT - Open a tunnel, the target is `host:port`
    CONNECT,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// TRACE - Loop the request back
    TRACE,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from its token.
    ///
    /// # Example
    ///
    /// ```
    /// # use coserve::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::from_bytes(s.as_bytes())
    }

    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Method::GET),
            b"HEAD" => Some(Method::HEAD),
            b"POST" => Some(Method::POST),
            b"PUT" => Some(Method::PUT),
            b"DELETE" => Some(Method::DELETE),
            b"CONNECT" => Some(Method::CONNECT),
            b"OPTIONS" => Some(Method::OPTIONS),
            b"TRACE" => Some(Method::TRACE),
            b"PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as produced by one parse attempt.
///
/// URL components are only set when present in the request target: scheme,
/// user info, host and port appear in absolute-form (proxy) targets, host and
/// port also in CONNECT targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub method: Method,
    pub http_major: u8,
    pub http_minor: u8,
    /// The raw request target
    pub url: String,
    pub scheme: Option<String>,
    pub user_info: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
    /// Headers in arrival order, duplicates kept
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// The parse completed with a full message.
    pub valid: bool,
    /// The peer closed the connection before sending anything.
    pub closed: bool,
    /// The protocol version and `Connection` header allow another request.
    pub keep_alive: bool,
}

impl Request {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of the headers named `name`, in arrival order.
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn version(&self) -> String {
        format!("HTTP/{}.{}", self.http_major, self.http_minor)
    }
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: Request {
                http_major: 1,
                http_minor: 1,
                valid: true,
                keep_alive: true,
                ..Request::default()
            },
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    /// Sets the raw target and the path/query split of it.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (url.clone(), None),
        };
        self.request.path = Some(path);
        self.request.query = query;
        self.request.url = url;
        self
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.request.http_major = major;
        self.request.http_minor = minor;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.request.body = body;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
