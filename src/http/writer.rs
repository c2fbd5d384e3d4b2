use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::response::{Response, StatusCode};
use crate::io::AsyncStream;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Value of the `Server` header on every serialized response.
pub const SERVER_NAME: &str = concat!("coserve/", env!("CARGO_PKG_VERSION"));

/// Serializes a response to its wire form.
///
/// `Content-Length` is computed from the body and goes after the handler's
/// headers, replacing any value the handler set. A code without a reason
/// phrase produces an empty 500 response instead.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let Some(status) = resp.status() else {
        tracing::warn!(code = resp.code, "unknown status code, sending 500");
        return serialize_parts(StatusCode::InternalServerError, &[], &[]);
    };
    serialize_parts(status, &resp.headers, &resp.body)
}

fn serialize_parts(status: StatusCode, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());
    buf.extend_from_slice(b"Server: ");
    buf.extend_from_slice(SERVER_NAME.as_bytes());
    buf.extend_from_slice(b"\r\n");

    for (k, v) in headers {
        if k.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf.extend_from_slice(body);
    buf
}

/// Writes the serialized response into the stream's output buffer.
///
/// Nothing is flushed unless the buffer fills up.
pub async fn write_response<S>(stream: &mut AsyncStream<S>, resp: &Response) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&serialize_response(resp)).await
}
