//! Content delivery: stream the origin through this server, or send the
//! client there with a redirect.

use std::time::Duration;

use futures::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HOST, HeaderValue, LOCATION};
use hyper::{HeaderMap, Method, Response, StatusCode};
use reqwest::Client;
use tracing::warn;

use crate::{Body, empty_body, status_response};

/// Timeout for proxied origin requests.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// How fetched content reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Stream origin responses through this server.
    Proxy,
    /// Answer 302 and let the client fetch the origin directly.
    Redirect,
}

pub struct ContentDelivery {
    client: Client,
    mode: DeliveryMode,
}

impl ContentDelivery {
    pub fn new(client: Client, mode: DeliveryMode) -> Self {
        Self { client, mode }
    }

    /// Serves the remote `url` for a GET/HEAD request.
    pub async fn deliver(&self, method: &Method, headers: &HeaderMap, url: &str) -> Response<Body> {
        match self.mode {
            DeliveryMode::Redirect => redirect(url),
            DeliveryMode::Proxy => self.proxy(method, headers, url).await,
        }
    }

    async fn proxy(&self, method: &Method, headers: &HeaderMap, url: &str) -> Response<Body> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(PROXY_TIMEOUT);
        for (name, value) in headers {
            // Host belongs to this server; X- headers stay private to it.
            if name == &HOST || name.as_str().starts_with("x-") {
                continue;
            }
            request = request.header(name, value);
        }

        let upstream = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "proxy request failed");
                return status_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

        let mut builder = Response::builder().status(upstream.status());
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                headers.append(name, value.clone());
            }
        }

        let body = if method == Method::HEAD {
            empty_body()
        } else {
            let stream = upstream
                .bytes_stream()
                .map_ok(Frame::data)
                .map_err(std::io::Error::other);
            StreamBody::new(stream).boxed_unsync()
        };

        match builder.body(body) {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "failed to assemble proxied response");
                status_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
            }
        }
    }
}

fn redirect(url: &str) -> Response<Body> {
    let Ok(location) = HeaderValue::from_str(url) else {
        warn!(url, "mapped URL is not a valid Location header value");
        return status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    };
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, location);
    response
}
