//! Demo application that echoes the parsed request back as plain text.

use std::fmt::Write;

use crate::http::connection::Application;
use crate::http::request::Request;
use crate::http::session::Session;
use crate::io::Device;

#[derive(Debug, Clone, Copy, Default)]
pub struct Inspect;

impl Application for Inspect {
    async fn handle<S: Device>(&self, session: &mut Session<'_, S>) -> anyhow::Result<bool> {
        let request = session.request.clone();
        let body = session.defer(move || render(&request)).await??;

        session.response.set_header("Content-Type", "text/plain; charset=utf-8");
        session.response.body_mut().extend_from_slice(body.as_bytes());
        Ok(true)
    }
}

/// Text report of every request component that was present.
pub fn render(request: &Request) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "{} {} {}", request.method, request.url, request.version())?;

    let parts = [
        ("scheme", request.scheme.as_deref()),
        ("user-info", request.user_info.as_deref()),
        ("host", request.host.as_deref()),
        ("path", request.path.as_deref()),
        ("query", request.query.as_deref()),
    ];
    for (name, value) in parts {
        if let Some(value) = value {
            writeln!(out, "{name}: {value}")?;
        }
    }
    if let Some(port) = request.port {
        writeln!(out, "port: {port}")?;
    }

    writeln!(out, "\nheaders:")?;
    for (name, value) in &request.headers {
        writeln!(out, "  {name}: {value}")?;
    }
    if !request.body.is_empty() {
        writeln!(out, "\nbody: {} bytes", request.body.len())?;
    }
    Ok(out)
}
