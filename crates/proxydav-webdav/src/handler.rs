//! WebDAV request handling.
//!
//! One stateless handler dispatches every request by verb against the
//! shared virtual filesystem. Reads resolve remote metadata outside the
//! filesystem lock; mutations map filesystem errors onto HTTP status
//! codes and never leak internals into response bodies.

use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use proxydav_core::{VfsError, VirtualFs, paths};
use tracing::{debug, warn};

use crate::delivery::ContentDelivery;
use crate::metadata::MetadataResolver;
use crate::xml::{self, DavResponse, Multistatus, Prop};
use crate::{Body, empty_body, full_body, status_response};

/// Verbs this server understands. Anything else answers 405.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DavMethod {
    Options,
    PropFind,
    Get,
    Head,
    Delete,
    Move,
    Copy,
}

impl DavMethod {
    fn from_request(method: &Method) -> Option<Self> {
        match method.as_str() {
            "OPTIONS" => Some(Self::Options),
            "PROPFIND" => Some(Self::PropFind),
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "DELETE" => Some(Self::Delete),
            "MOVE" => Some(Self::Move),
            "COPY" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// Verb set advertised by OPTIONS.
const ALLOWED_METHODS: &str = "OPTIONS, PROPFIND, GET, HEAD, DELETE, MOVE, COPY";

#[derive(Debug, Clone, Copy)]
enum RelocateKind {
    Move,
    Copy,
}

/// Stateless WebDAV dispatcher over the shared filesystem.
pub struct DavHandler {
    vfs: Arc<VirtualFs>,
    resolver: MetadataResolver,
    delivery: ContentDelivery,
}

impl DavHandler {
    pub fn new(vfs: Arc<VirtualFs>, resolver: MetadataResolver, delivery: ContentDelivery) -> Self {
        Self {
            vfs,
            resolver,
            delivery,
        }
    }

    /// Serves one request.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Body> {
        let Some(method) = DavMethod::from_request(req.method()) else {
            return status_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        };
        let Some(raw_path) = decode_path(req.uri().path()) else {
            return status_response(StatusCode::BAD_REQUEST, "Malformed request path");
        };
        let path = paths::normalize(&raw_path);

        let (parts, body) = req.into_parts();
        match method {
            DavMethod::Options => options(),
            DavMethod::PropFind => self.propfind(&path, &parts.headers, body).await,
            DavMethod::Get | DavMethod::Head => {
                self.get_head(&parts.method, &path, &parts.headers).await
            }
            DavMethod::Delete => self.delete(&path),
            DavMethod::Move => self.relocate(&path, &parts.headers, RelocateKind::Move),
            DavMethod::Copy => self.relocate(&path, &parts.headers, RelocateKind::Copy),
        }
    }

    async fn propfind(&self, path: &str, headers: &HeaderMap, body: Incoming) -> Response<Body> {
        if !self.vfs.exists(path) {
            return status_response(StatusCode::NOT_FOUND, "Not Found");
        }

        // "0" limits the answer to the node itself; anything else
        // (including an absent header) means self plus direct children.
        let depth = headers
            .get("depth")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("1")
            .to_string();
        // Requested-property bodies are accepted but ignored; every
        // supported property is always returned.
        let _ = body.collect().await;

        let mut multistatus = Multistatus::default();
        if let Some(response) = self.describe(path).await {
            multistatus.responses.push(response);
        }
        if depth != "0" && self.vfs.is_dir(path) {
            if let Some(children) = self.vfs.list_dir(path) {
                for child in children {
                    if let Some(response) = self.describe(&child.path).await {
                        multistatus.responses.push(response);
                    }
                }
            }
        }

        let mut response = Response::new(full_body(multistatus.to_xml()));
        *response.status_mut() = StatusCode::MULTI_STATUS;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        response
    }

    /// Builds the multistatus entry for one node.
    async fn describe(&self, path: &str) -> Option<DavResponse> {
        let item = self.vfs.get_item(path);
        let is_dir = match &item {
            Some(item) => item.is_dir,
            // The root is a directory without an item.
            None if self.vfs.is_dir(path) => true,
            None => return None,
        };

        if is_dir {
            let display_name = if path == "/" {
                "Root".to_string()
            } else {
                paths::file_name(path).to_string()
            };
            let href = if path == "/" {
                "/".to_string()
            } else {
                format!("{path}/")
            };
            return Some(DavResponse {
                href,
                prop: Prop {
                    display_name,
                    is_collection: true,
                    ..Prop::default()
                },
            });
        }

        let item = item?;
        let mut prop = Prop {
            display_name: item.name.clone(),
            content_type: content_type_for(&item.name),
            ..Prop::default()
        };
        if let Some(metadata) = self.resolver.resolve(&item.url).await {
            prop.content_length = Some(metadata.size);
            prop.last_modified = Some(metadata.last_modified);
            prop.etag = Some(xml::generate_etag(&metadata.url, metadata.last_modified));
        }
        Some(DavResponse {
            href: item.path.clone(),
            prop,
        })
    }

    async fn get_head(&self, method: &Method, path: &str, headers: &HeaderMap) -> Response<Body> {
        if self.vfs.is_dir(path) {
            return status_response(StatusCode::BAD_REQUEST, "Cannot GET a directory");
        }
        let Some(item) = self.vfs.get_item(path) else {
            return status_response(StatusCode::NOT_FOUND, "Not Found");
        };
        self.delivery.deliver(method, headers, &item.url).await
    }

    fn delete(&self, path: &str) -> Response<Body> {
        if !self.vfs.exists(path) {
            return status_response(StatusCode::NOT_FOUND, "Not Found");
        }

        let result = if self.vfs.is_dir(path) {
            self.vfs.remove_directory(path)
        } else {
            self.vfs.remove_file(path)
        };
        match result {
            Ok(()) => {
                let mut response = Response::new(empty_body());
                *response.status_mut() = StatusCode::NO_CONTENT;
                response
            }
            Err(err) => error_response(path, &err),
        }
    }

    fn relocate(&self, src: &str, headers: &HeaderMap, kind: RelocateKind) -> Response<Body> {
        let Some(destination) = headers
            .get("destination")
            .and_then(|value| value.to_str().ok())
        else {
            return status_response(StatusCode::BAD_REQUEST, "Missing Destination header");
        };
        let Some(dst) = parse_destination(destination) else {
            return status_response(StatusCode::BAD_REQUEST, "Bad Destination");
        };
        let dst = paths::normalize(&dst);

        if !self.vfs.exists(src) {
            return status_response(StatusCode::NOT_FOUND, "Not Found");
        }
        if dst == src {
            return status_response(StatusCode::BAD_REQUEST, "Destination equals source");
        }

        let overwrite = headers
            .get("overwrite")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("T");
        let dst_existed = self.vfs.exists(&dst);
        if dst_existed {
            if overwrite == "F" {
                return status_response(
                    StatusCode::PRECONDITION_FAILED,
                    "Destination exists and overwrite is forbidden",
                );
            }
            let cleared = if self.vfs.is_dir(&dst) {
                self.vfs.remove_directory(&dst)
            } else {
                self.vfs.remove_file(&dst)
            };
            if let Err(err) = cleared {
                warn!(path = %dst, error = %err, "failed to clear destination");
                return status_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to overwrite destination",
                );
            }
        }

        let result = match (kind, self.vfs.is_dir(src)) {
            (RelocateKind::Move, true) => self.vfs.move_directory(src, &dst),
            (RelocateKind::Move, false) => self.vfs.move_file(src, &dst),
            (RelocateKind::Copy, true) => self.vfs.copy_directory(src, &dst),
            (RelocateKind::Copy, false) => self.vfs.copy_file(src, &dst),
        };
        match result {
            Ok(()) => {
                let mut response = Response::new(empty_body());
                *response.status_mut() = if dst_existed {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::CREATED
                };
                response
            }
            Err(err) => error_response(src, &err),
        }
    }
}

fn options() -> Response<Body> {
    let mut response = Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(HeaderName::from_static("dav"), HeaderValue::from_static("1"));
    headers.insert(
        HeaderName::from_static("ms-author-via"),
        HeaderValue::from_static("DAV"),
    );
    response
}

/// Maps a filesystem error onto its HTTP status; internals go to the
/// log, not the client.
fn error_response(path: &str, err: &VfsError) -> Response<Body> {
    let status = match err {
        VfsError::NotFound(_) => StatusCode::NOT_FOUND,
        VfsError::Conflict(_) => StatusCode::CONFLICT,
        VfsError::InvalidOperation { .. } => StatusCode::BAD_REQUEST,
        VfsError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(path, error = %err, "filesystem operation failed");
    } else {
        debug!(path, error = %err, "filesystem operation rejected");
    }
    status_response(status, status.canonical_reason().unwrap_or("Error"))
}

/// Extracts the path from a `Destination` header: either a bare path or
/// a full URL, where the path is everything after the third slash.
fn parse_destination(destination: &str) -> Option<String> {
    let raw = if destination.starts_with("http://") || destination.starts_with("https://") {
        match destination.splitn(4, '/').nth(3) {
            Some(rest) => format!("/{rest}"),
            None => "/".to_string(),
        }
    } else {
        destination.to_string()
    };
    decode_path(&raw)
}

/// Percent-decodes a request path. `None` for malformed escapes or
/// paths that decode to invalid UTF-8.
fn decode_path(path: &str) -> Option<String> {
    if !path.contains('%') {
        return Some(path.to_string());
    }

    let bytes = path.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16))?;
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16))?;
            decoded.push(u8::try_from(hi * 16 + lo).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Content type guessed from the file extension; `None` when unknown so
/// the property is omitted.
fn content_type_for(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.to_string())
}
