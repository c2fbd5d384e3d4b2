use coserve::http::request::{Method, Request, RequestBuilder};

#[test]
fn test_request_header_lookup_is_case_insensitive() {
    let req = RequestBuilder::new()
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build();

    assert_eq!(req.header("host"), Some("example.com"));
    assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_keeps_duplicate_headers_in_order() {
    let req = RequestBuilder::new()
        .header("Accept", "text/html")
        .header("X-Other", "1")
        .header("accept", "text/plain")
        .build();

    assert_eq!(req.header("Accept"), Some("text/html"));
    assert_eq!(
        req.header_all("Accept").collect::<Vec<_>>(),
        vec!["text/html", "text/plain"]
    );
}

#[test]
fn test_request_builder_splits_query() {
    let req = RequestBuilder::new()
        .method(Method::DELETE)
        .url("/items/7?force=true")
        .version(1, 0)
        .build();

    assert_eq!(req.method, Method::DELETE);
    assert_eq!(req.url, "/items/7?force=true");
    assert_eq!(req.path.as_deref(), Some("/items/7"));
    assert_eq!(req.query.as_deref(), Some("force=true"));
    assert_eq!(req.version(), "HTTP/1.0");
    assert!(req.valid);
}

#[test]
fn test_default_request_is_neither_valid_nor_closed() {
    let req = Request::default();
    assert!(!req.valid);
    assert!(!req.closed);
    assert_eq!(req.path, None);
}

#[test]
fn test_method_tokens() {
    for method in [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::CONNECT,
        Method::OPTIONS,
        Method::TRACE,
        Method::PATCH,
    ] {
        assert_eq!(Method::from_str(method.as_str()), Some(method));
        assert_eq!(method.to_string(), method.as_str());
    }
    assert_eq!(Method::from_str("BREW"), None);
}
