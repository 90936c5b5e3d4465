//! Legacy content locator against a mock HTTP store.

use futures::TryStreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use freyja_core::{ContentSource, Error, LegacyLocatorConfig};
use freyja_jobs::LegacyContentLocator;

/// Legacy identifier pointing at `path` on the mock server.
fn legacy_identifier(server: &MockServer, path: &str) -> String {
    format!("{}{}", server.uri().replacen("http:", "fedora:", 1), path)
}

fn locator() -> LegacyContentLocator {
    LegacyContentLocator::new(LegacyLocatorConfig::new("fedora:", "http:")).unwrap()
}

#[tokio::test]
async fn test_open_streams_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/prod/ab/cd/f1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"original tiff bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let locator = locator();
    let id = legacy_identifier(&server, "/rest/prod/ab/cd/f1");
    assert!(locator.is_legacy(&id));

    let chunks: Vec<bytes::Bytes> = locator.open(&id).await.unwrap().try_collect().await.unwrap();
    assert_eq!(chunks.concat(), b"original tiff bytes");
}

#[tokio::test]
async fn test_open_missing_content_is_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let id = legacy_identifier(&server, "/rest/prod/missing");
    let err = match locator().open(&id).await {
        Err(e) => e,
        Ok(_) => panic!("expected a request error"),
    };
    assert!(matches!(err, Error::Request(ref msg) if msg.contains("404")));
}

#[tokio::test]
async fn test_unreachable_store_is_error() {
    let server = MockServer::start().await;
    let id = legacy_identifier(&server, "/rest/prod/f1");
    drop(server);

    assert!(locator().open(&id).await.is_err());
}
