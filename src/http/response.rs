//! Response builders for the HTTP surface

use crate::error::SwordError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderName};
use hyper::http::response::Builder;
use hyper::{Response, StatusCode};
use tracing::error;

pub type HttpResponse = Response<Full<Bytes>>;

pub const XML_TYPE: &str = "application/xml";

fn finish(builder: Builder, body: impl Into<Bytes>) -> HttpResponse {
    builder.body(Full::new(body.into())).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        internal_error()
    })
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Bare 500; fault details stay in the log
pub fn internal_error() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

pub fn empty(status: StatusCode) -> HttpResponse {
    finish(Response::builder().status(status), Bytes::new())
}

pub fn not_found() -> HttpResponse {
    finish(
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_TYPE, "text/plain"),
        "Not found",
    )
}

/// Method not supported on the resource (as opposed to disabled by config)
pub fn method_not_allowed(allow: &str) -> HttpResponse {
    finish(
        Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, allow),
        Bytes::new(),
    )
}

/// 401, with a Basic challenge when no credentials were sent
pub fn unauthorized(challenge: bool) -> HttpResponse {
    let mut builder = Response::builder().status(StatusCode::UNAUTHORIZED);
    if challenge {
        builder = builder.header(header::WWW_AUTHENTICATE, "Basic realm=\"SSS\"");
    }
    finish(builder, Bytes::new())
}

/// SWORD error document under the error's status
pub fn sword_error(err: &SwordError) -> HttpResponse {
    match err.to_xml() {
        Ok(body) => finish(
            Response::builder()
                .status(status_code(err.status))
                .header(header::CONTENT_TYPE, XML_TYPE),
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to render error document");
            internal_error()
        }
    }
}

pub fn document(status: StatusCode, content_type: &str, body: String) -> HttpResponse {
    finish(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type),
        body,
    )
}

/// Deposit outcome: `Location` plus the receipt, if one is to be returned
pub fn receipt(status: StatusCode, location: &str, body: Option<String>) -> HttpResponse {
    let builder = Response::builder()
        .status(status)
        .header(header::LOCATION, location);
    match body {
        Some(body) => finish(
            builder.header(header::CONTENT_TYPE, "application/atom+xml;type=entry"),
            body,
        ),
        None => finish(builder, Bytes::new()),
    }
}

pub fn redirect(status: StatusCode, location: &str) -> HttpResponse {
    finish(
        Response::builder()
            .status(status)
            .header(header::LOCATION, location),
        Bytes::new(),
    )
}

/// File content with any extra headers (e.g. `Packaging`)
pub fn content(
    content_type: &str,
    extra: &[(HeaderName, String)],
    body: Vec<u8>,
) -> HttpResponse {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    for (name, value) in extra {
        builder = builder.header(name, value.as_str());
    }
    finish(builder, body)
}

pub fn json(status: StatusCode, value: &serde_json::Value) -> HttpResponse {
    finish(
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json"),
        value.to_string(),
    )
}
