//! Shared harness for integration tests: a ProxyDAV server over a
//! fresh temporary store, plus a local stub origin so metadata probes
//! and proxying run without touching the network.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, LAST_MODIFIED};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use proxydav_core::{MetadataCache, PersistentStore, RocksStore, VirtualFs};
use proxydav_webdav::{
    ContentDelivery, DavHandler, DeliveryMode, MetadataResolver, ProxyDavServer, ServerConfig,
};
use reqwest::{Client, Method, StatusCode};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Fixed Last-Modified every stub origin response carries; its compact
/// form shows up in ETags.
pub const ORIGIN_LAST_MODIFIED: &str = "Fri, 15 Mar 2024 10:30:00 GMT";
pub const ORIGIN_LAST_MODIFIED_COMPACT: &str = "20240315103000";

/// Body the stub origin serves for a given path.
pub fn origin_body(path: &str) -> String {
    format!("remote content for {path}")
}

/// Minimal HTTP origin serving canned bodies with stable metadata.
pub struct OriginStub {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl OriginStub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind origin stub");
        let addr = listener.local_addr().expect("origin stub addr");

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        Ok::<_, Infallible>(origin_response(&req))
                    });
                    let _ = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            handle,
        }
    }
}

impl Drop for OriginStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn origin_response(req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let body = origin_body(req.uri().path());
    let mut response = Response::new(Full::new(Bytes::from(body.clone())));
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(LAST_MODIFIED, HeaderValue::from_static(ORIGIN_LAST_MODIFIED));
    // Reflect what the proxy forwarded, so tests can assert on header
    // filtering.
    headers.insert(
        HeaderName::from_static("origin-saw-x-secret"),
        HeaderValue::from_static(if req.headers().contains_key("x-secret") {
            "yes"
        } else {
            "no"
        }),
    );
    if let Some(lang) = req.headers().get("accept-language") {
        headers.insert(HeaderName::from_static("origin-saw-lang"), lang.clone());
    }
    response
}

/// A running ProxyDAV server wired to a temporary store and the stub
/// origin, with HTTP convenience methods.
pub struct TestServer {
    pub base_url: String,
    pub origin: OriginStub,
    pub vfs: Arc<VirtualFs>,
    client: Client,
    server: ProxyDavServer,
    _data_dir: TempDir,
}

impl TestServer {
    /// Start a proxy-mode server over a fresh temporary store.
    pub async fn start() -> Self {
        Self::with_mode(DeliveryMode::Proxy).await
    }

    pub async fn with_mode(mode: DeliveryMode) -> Self {
        let data_dir = TempDir::new().expect("create temp dir");
        let kv = RocksStore::open(data_dir.path()).expect("open store");
        let store = PersistentStore::new(Arc::new(kv));
        let vfs = Arc::new(VirtualFs::new(store.clone()).expect("build vfs"));
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(60), 128));

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .expect("build http client");

        let resolver = MetadataResolver::new(store, cache, client.clone());
        let delivery = ContentDelivery::new(client.clone(), mode);
        let handler = DavHandler::new(Arc::clone(&vfs), resolver, delivery);

        let server = ProxyDavServer::start(handler, ServerConfig::default())
            .await
            .expect("start server");
        let base_url = server.url();
        let origin = OriginStub::start().await;

        Self {
            base_url,
            origin,
            vfs,
            client,
            server,
            _data_dir: data_dir,
        }
    }

    /// Registers a mapping from `path` to the stub origin.
    pub fn add_file(&self, path: &str, origin_path: &str) {
        self.vfs
            .add_file(path, &format!("{}{}", self.origin.base_url, origin_path))
            .expect("add file");
    }

    pub fn origin_url(&self, origin_path: &str) -> String {
        format!("{}{}", self.origin.base_url, origin_path)
    }

    pub async fn propfind(&self, path: &str, depth: &str) -> reqwest::Response {
        self.client
            .request(
                Method::from_bytes(b"PROPFIND").expect("method"),
                format!("{}{}", self.base_url, path),
            )
            .header("Depth", depth)
            .send()
            .await
            .expect("PROPFIND request")
    }

    pub async fn propfind_body(&self, path: &str, depth: &str) -> (StatusCode, String) {
        let response = self.propfind(path, depth).await;
        let status = response.status();
        let body = response.text().await.expect("PROPFIND body");
        (status, body)
    }

    pub async fn options(&self) -> reqwest::Response {
        self.client
            .request(Method::OPTIONS, format!("{}/", self.base_url))
            .send()
            .await
            .expect("OPTIONS request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request")
    }

    pub async fn head(&self, path: &str) -> reqwest::Response {
        self.client
            .head(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("HEAD request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("DELETE request")
    }

    pub async fn move_(&self, src: &str, dst: &str, overwrite: Option<&str>) -> reqwest::Response {
        self.relocate("MOVE", src, dst, overwrite).await
    }

    pub async fn copy_(&self, src: &str, dst: &str, overwrite: Option<&str>) -> reqwest::Response {
        self.relocate("COPY", src, dst, overwrite).await
    }

    async fn relocate(
        &self,
        verb: &str,
        src: &str,
        dst: &str,
        overwrite: Option<&str>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .request(
                Method::from_bytes(verb.as_bytes()).expect("method"),
                format!("{}{}", self.base_url, src),
            )
            .header("Destination", dst);
        if let Some(flag) = overwrite {
            request = request.header("Overwrite", flag);
        }
        request.send().await.expect("relocate request")
    }
}

/// Number of `<response>` elements in a multistatus body.
pub fn response_count(body: &str) -> usize {
    body.matches("<response>").count()
}
