//! `HttpFetcher` against a local mock server.

use lectern_pipeline::HttpFetcher;
use lectern_source_core::{FetchError, FetchMethod, FetchRequest, Fetcher};
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new("LecternTest/1.0", Duration::from_secs(5))
}

#[tokio::test]
async fn test_get_sends_headers_and_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .and(header("x-token", "abc"))
        .and(header("user-agent", "LecternTest/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Dune</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let headers = BTreeMap::from([("X-Token".to_string(), "abc".to_string())]);
    let request = FetchRequest::get(format!("{}/book/1", server.uri()), 2_000)
        .with_headers(headers);
    let response = fetcher().fetch(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<h1>Dune</h1>");
    assert_eq!(response.url, format!("{}/book/1", server.uri()));
}

#[tokio::test]
async fn test_post_sends_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_string("key=dune"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let mut request = FetchRequest::get(format!("{}/search", server.uri()), 2_000);
    request.method = FetchMethod::Post;
    request.body = Some("key=dune".to_string());

    let response = fetcher().fetch(&request).await.unwrap();
    assert_eq!(response.body, "[]");
}

#[tokio::test]
async fn test_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let err = fetcher()
        .fetch(&FetchRequest::get(url.clone(), 2_000))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Status { status: 404, url });
}

#[tokio::test]
async fn test_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1_500)))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&FetchRequest::get(format!("{}/slow", server.uri()), 100))
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::Timeout(100));
}
