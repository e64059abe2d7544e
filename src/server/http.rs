//! Glue between `tiny_http` requests and the service's replies

use crate::error::{BgRemovalError, Result};
use std::io::{self, Cursor, Read};
use tiny_http::{Header, Request, StatusCode};

/// Response type handed to `tiny_http`
pub type HttpResponse = tiny_http::Response<Cursor<Vec<u8>>>;

/// Buffered reply produced by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub extra_headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    #[must_use]
    pub fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            extra_headers: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Self::new(200, content_type, body)
    }

    /// Plain-text reply, body terminated by a newline
    #[must_use]
    pub fn text(status: u16, message: &str) -> Self {
        Self::new(
            status,
            "text/plain; charset=UTF-8",
            format!("{message}\n").into_bytes(),
        )
    }

    /// Error reply derived from the error's status code
    ///
    /// Server-side failures only expose the reason phrase.
    #[must_use]
    pub fn from_error(error: &BgRemovalError) -> Self {
        let status = error.status_code();
        let message = if error.is_client_error() {
            error.to_string()
        } else {
            reason_phrase(status).to_string()
        };
        Self::text(status, &message)
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.extra_headers.push((name, value));
        self
    }

    /// Header value set through [`Reply::with_header`]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Convert into a `tiny_http` response, always framed by `Content-Length`
    #[must_use]
    pub fn into_response(self) -> HttpResponse {
        let mut response = tiny_http::Response::from_data(self.body)
            .with_status_code(StatusCode(self.status))
            .with_chunked_threshold(usize::MAX);

        let headers = std::iter::once(("Content-Type", self.content_type.to_string()))
            .chain(self.extra_headers);
        for (name, value) in headers {
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(header) => response = response.with_header(header),
                Err(()) => log::warn!("Dropping invalid header {}: {:?}", name, value),
            }
        }
        response
    }
}

/// Standard reason phrase for a status code
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode(status).default_reason_phrase()
}

fn header_value<'a>(request: &'a Request, name: &'static str) -> Option<&'a str> {
    request
        .headers()
        .iter()
        .find(|header| header.field.equiv(name))
        .map(|header| header.value.as_str())
}

/// Whether the client holds the body back until it sees `100 Continue`
#[must_use]
pub fn expects_continue(request: &Request) -> bool {
    header_value(request, "Expect").is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
}

/// Read the whole request body, refusing chunked uploads and bodies over `limit`
///
/// `tiny_http` answers `Expect: 100-continue` once the body is read.
///
/// # Errors
/// - `BgRemovalError::MalformedRequest` for chunked bodies or a body shorter than declared
/// - `BgRemovalError::PayloadTooLarge` when the body exceeds `limit`
/// - `BgRemovalError::Io` for socket errors
pub fn read_body(request: &mut Request, limit: usize) -> Result<Vec<u8>> {
    if header_value(request, "Transfer-Encoding")
        .is_some_and(|te| !te.eq_ignore_ascii_case("identity"))
    {
        return Err(BgRemovalError::malformed_request(
            "Chunked request bodies are not supported, send Content-Length",
        ));
    }

    let declared = request.body_length();
    if let Some(size) = declared.filter(|&size| size > limit) {
        return Err(BgRemovalError::PayloadTooLarge { size, limit });
    }

    let mut body = Vec::with_capacity(declared.unwrap_or(0));
    request
        .as_reader()
        .take(limit as u64 + 1)
        .read_to_end(&mut body)?;

    if body.len() > limit {
        return Err(BgRemovalError::PayloadTooLarge {
            size: body.len(),
            limit,
        });
    }
    if let Some(size) = declared.filter(|&size| body.len() < size) {
        return Err(BgRemovalError::malformed_request(format!(
            "Request body shorter than Content-Length {size}"
        )));
    }
    Ok(body)
}

/// Consume up to `limit` body bytes so the peer sees the reply instead of a reset
///
/// Clients waiting for `100 Continue` have not sent their body and are left alone.
pub fn discard_body(request: &mut Request, limit: usize) -> u64 {
    if expects_continue(request) || request.body_length() == Some(0) {
        return 0;
    }
    match io::copy(&mut request.as_reader().take(limit as u64), &mut io::sink()) {
        Ok(discarded) => discarded,
        Err(e) => {
            log::debug!("Failed to discard request body: {}", e);
            0
        },
    }
}
