//! PROPFIND and discovery tests.
//!
//! Covers depth handling, multistatus shape, collection semantics, href
//! conventions, and metadata properties resolved from the stub origin.

mod common;

use common::{ORIGIN_LAST_MODIFIED_COMPACT, TestServer, origin_body, response_count};
use reqwest::{Method, StatusCode};

#[tokio::test]
async fn propfind_root_depth_0_is_exactly_one_response() {
    let server = TestServer::start().await;
    server.add_file("/docs/a.txt", "/a.txt");

    let (status, body) = server.propfind_body("/", "0").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(response_count(&body), 1);
    assert!(body.contains("<displayname>Root</displayname>"));
    assert!(body.contains("<resourcetype><collection/></resourcetype>"));
}

#[tokio::test]
async fn propfind_depth_1_returns_children_plus_self() {
    let server = TestServer::start().await;
    server.add_file("/docs/a.txt", "/a.txt");
    server.add_file("/docs/b.txt", "/b.txt");
    server.add_file("/docs/sub/c.txt", "/c.txt");

    let (status, body) = server.propfind_body("/docs", "1").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    // Self + a.txt + b.txt + sub; nothing from inside sub.
    assert_eq!(response_count(&body), 4);
    assert!(body.contains("a.txt"));
    assert!(body.contains("b.txt"));
    assert!(body.contains("sub"));
    assert!(!body.contains("c.txt"));
}

#[tokio::test]
async fn propfind_without_depth_header_defaults_to_children() {
    let server = TestServer::start().await;
    server.add_file("/docs/a.txt", "/a.txt");

    let response = server
        .propfind("/docs", "1")
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    // No Depth header at all.
    let client = reqwest::Client::new();
    let body = client
        .request(
            Method::from_bytes(b"PROPFIND").expect("method"),
            format!("{}/docs", server.base_url),
        )
        .send()
        .await
        .expect("PROPFIND")
        .text()
        .await
        .expect("body");
    assert_eq!(response_count(&body), 2);
}

#[tokio::test]
async fn propfind_file_carries_metadata_properties() {
    let server = TestServer::start().await;
    server.add_file("/docs/report.pdf", "/report.pdf");

    let (status, body) = server.propfind_body("/docs/report.pdf", "0").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(response_count(&body), 1);

    assert!(body.contains("<displayname>report.pdf</displayname>"));
    assert!(!body.contains("<collection/>"), "files are not collections");

    let expected_length = origin_body("/report.pdf").len().to_string();
    assert!(body.contains(&format!("<getcontentlength>{expected_length}</getcontentlength>")));
    assert!(body.contains("<getcontenttype>application/pdf</getcontenttype>"));
    assert!(body.contains("<getlastmodified>Fri, 15 Mar 2024 10:30:00 GMT</getlastmodified>"));
    // ETag is the origin URL plus the compact modification stamp.
    assert!(body.contains(&format!("-{ORIGIN_LAST_MODIFIED_COMPACT}&quot;")));
}

#[tokio::test]
async fn propfind_directory_href_has_trailing_slash() {
    let server = TestServer::start().await;
    server.add_file("/docs/sub/c.txt", "/c.txt");

    let (_, body) = server.propfind_body("/docs/sub", "0").await;
    assert!(body.contains("<href>/docs/sub/</href>"));
    assert!(body.contains("<resourcetype><collection/></resourcetype>"));
}

#[tokio::test]
async fn propfind_missing_path_is_404() {
    let server = TestServer::start().await;

    let response = server.propfind("/nowhere", "0").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propfind_ignores_request_body() {
    let server = TestServer::start().await;
    server.add_file("/docs/a.txt", "/a.txt");

    let client = reqwest::Client::new();
    let body = r#"<?xml version="1.0"?><propfind xmlns="DAV:"><prop><displayname/></prop></propfind>"#;
    let response = client
        .request(
            Method::from_bytes(b"PROPFIND").expect("method"),
            format!("{}/docs/a.txt", server.base_url),
        )
        .header("Depth", "0")
        .body(body)
        .send()
        .await
        .expect("PROPFIND");
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    // All supported properties come back regardless of the request list.
    let text = response.text().await.expect("body");
    assert!(text.contains("<displayname>a.txt</displayname>"));
    assert!(text.contains("getcontentlength"));
}

#[tokio::test]
async fn options_advertises_dav_verbs() {
    let server = TestServer::start().await;

    let response = server.options().await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("dav").map(|v| v.to_str().unwrap()),
        Some("1")
    );
    let allow = response
        .headers()
        .get("allow")
        .map(|v| v.to_str().unwrap())
        .unwrap_or_default();
    for verb in ["OPTIONS", "PROPFIND", "GET", "HEAD", "DELETE", "MOVE", "COPY"] {
        assert!(allow.contains(verb), "Allow should list {verb}");
    }
}

#[tokio::test]
async fn unsupported_method_is_405() {
    let server = TestServer::start().await;

    let client = reqwest::Client::new();
    let response = client
        .put(format!("{}/anything", server.base_url))
        .body("data")
        .send()
        .await
        .expect("PUT");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn propfind_handles_percent_encoded_paths() {
    let server = TestServer::start().await;
    server.add_file("/docs/with space.txt", "/spaced.txt");

    let (status, body) = server.propfind_body("/docs/with%20space.txt", "0").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(body.contains("<displayname>with space.txt</displayname>"));
}
