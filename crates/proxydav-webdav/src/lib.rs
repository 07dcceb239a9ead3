//! WebDAV protocol layer for ProxyDAV.
//!
//! Translates WebDAV verbs into operations on the virtual filesystem
//! and serves file content from the mapped origins:
//!
//! - [`DavHandler`]: per-request dispatch for OPTIONS, PROPFIND, GET,
//!   HEAD, DELETE, MOVE, COPY
//! - [`MetadataResolver`]: remote size/mtime lookup through the cache,
//!   the store, and bounded HEAD probes
//! - [`ContentDelivery`]: proxy or redirect delivery of file content
//! - [`ProxyDavServer`]: HTTP server lifecycle
//!
//! The handler is stateless per request; all shared state lives in the
//! filesystem, the store, and the cache it is constructed with.

mod delivery;
mod handler;
mod metadata;
mod server;
pub mod xml;

pub use delivery::{ContentDelivery, DeliveryMode};
pub use handler::DavHandler;
pub use metadata::MetadataResolver;
pub use server::{ProxyDavServer, ServerConfig};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};

/// Response body type used across the protocol layer: either buffered
/// XML/short messages or a streamed origin body.
pub(crate) type Body = UnsyncBoxBody<Bytes, std::io::Error>;

pub(crate) fn full_body(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub(crate) fn empty_body() -> Body {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

/// Builds a plain-text response carrying only a short reason phrase;
/// internals stay in the logs.
pub(crate) fn status_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(full_body(format!("{message}\n")));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
