use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use token_exchange_proxy::{AppState, ProxyConfig, RetryPolicy, TokenRequestFormat, router};
use tower::ServiceExt;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header as header_is, method, path,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/login/oauth/access_token";
const APP_ORIGIN: &str = "http://app.example";
const TOKEN_PAYLOAD: &str = r#"{"access_token":"xyz","token_type":"bearer"}"#;

fn config(server_uri: &str) -> ProxyConfig {
    ProxyConfig::new(
        "client-id",
        "s3cret",
        "http://app.example/callback",
        format!("{server_uri}{TOKEN_PATH}"),
    )
    .with_allowed_origin(APP_ORIGIN)
    .with_upstream_timeout(Duration::from_secs(5))
}

fn state(config: ProxyConfig) -> AppState {
    AppState::new(config).unwrap()
}

async fn post(state: AppState, origin: Option<&str>, body: &str) -> (StatusCode, HeaderMap, String) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(origin) = origin {
        request = request.header(header::ORIGIN, origin);
    }
    let request = request.body(Body::from(body.to_string())).unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn disallowed_origin_never_reaches_provider() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(0)
        .mount(&provider)
        .await;

    for origin in [Some("http://evil.com"), None] {
        let (status, headers, body) =
            post(state(config(&provider.uri())), origin, r#"{"code":"abc"}"#).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, r#"{"success":false,"error":"origin not allowed"}"#);
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    provider.verify().await;
}

#[tokio::test]
async fn allowed_origin_gets_provider_payload_verbatim() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header_is("accept", "application/json"))
        .and(header_is("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "grant_type": "authorization_code",
            "code": "abc123",
            "client_id": "client-id",
            "client_secret": "s3cret",
            "redirect_uri": "http://app.example/callback",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(1)
        .mount(&provider)
        .await;

    let (status, headers, body) = post(
        state(config(&provider.uri())),
        Some(APP_ORIGIN),
        r#"{"code":"abc123"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        r#"{"success":true,"body":{"access_token":"xyz","token_type":"bearer"}}"#
    );
    assert!(!body.contains("s3cret"));
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        APP_ORIGIN
    );

    provider.verify().await;
}

#[tokio::test]
async fn missing_code_never_reaches_provider() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(0)
        .mount(&provider)
        .await;

    let (status, _, body) = post(
        state(config(&provider.uri())),
        Some(APP_ORIGIN),
        r#"{"state":"xyz"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"success":false,"error":"missing code"}"#);

    let (status, _, body) = post(state(config(&provider.uri())), Some(APP_ORIGIN), "{").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"success":false,"error":"malformed request body"}"#);

    provider.verify().await;
}

#[tokio::test]
async fn hanging_provider_times_out() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(TOKEN_PAYLOAD, "application/json")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&provider)
        .await;

    let timeout = Duration::from_millis(200);
    let config = config(&provider.uri()).with_upstream_timeout(timeout);

    let started = Instant::now();
    let (status, _, body) = post(state(config), Some(APP_ORIGIN), r#"{"code":"abc123"}"#).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body, r#"{"success":false,"error":"timeout"}"#);
    assert!(elapsed >= timeout, "{elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(1), "{elapsed:?}");
}

#[tokio::test]
async fn reused_code_gets_provider_error_on_second_attempt() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"error":"bad_verification_code","error_description":"The code passed is incorrect or expired."}"#,
            "application/json",
        ))
        .mount(&provider)
        .await;

    let app = state(config(&provider.uri()));
    let (first_status, _, first) = post(app.clone(), Some(APP_ORIGIN), r#"{"code":"abc123"}"#).await;
    let (second_status, _, second) = post(app, Some(APP_ORIGIN), r#"{"code":"abc123"}"#).await;

    assert_eq!(first_status, StatusCode::OK);
    assert!(first.starts_with(r#"{"success":true"#));
    assert_eq!(second_status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        second,
        r#"{"success":false,"error":"bad_verification_code: The code passed is incorrect or expired."}"#
    );

    let requests = provider.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn provider_rejection_is_not_retried() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_raw(r#"{"error":"invalid_grant"}"#, "application/json"),
        )
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(&provider.uri()).with_retry(RetryPolicy {
        max_retries: 5,
        initial_backoff: Duration::from_millis(1),
    });
    let (status, _, body) = post(state(config), Some(APP_ORIGIN), r#"{"code":"used"}"#).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, r#"{"success":false,"error":"invalid_grant"}"#);
    provider.verify().await;
}

#[tokio::test]
async fn form_encoding_and_pkce_verifier_are_forwarded() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(header_is("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("client_secret=s3cret"))
        .and(body_string_contains("code_verifier=verifier-123"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(1)
        .mount(&provider)
        .await;

    let config = config(&provider.uri()).with_token_format(TokenRequestFormat::Form);
    let (status, _, _) = post(
        state(config),
        Some(APP_ORIGIN),
        r#"{"code":"abc123","code_verifier":"verifier-123"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    provider.verify().await;
}

#[tokio::test]
async fn unreachable_provider_is_reported_without_details() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = config(&uri).with_retry(RetryPolicy {
        max_retries: 1,
        initial_backoff: Duration::from_millis(1),
    });
    let (status, _, body) = post(state(config), Some(APP_ORIGIN), r#"{"code":"abc123"}"#).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, r#"{"success":false,"error":"upstream unavailable"}"#);
}

#[tokio::test]
async fn concurrent_exchanges_are_independent() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(8)
        .mount(&provider)
        .await;

    let app = state(config(&provider.uri()));
    let mut handles = Vec::new();
    for i in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            post(app, Some(APP_ORIGIN), &format!(r#"{{"code":"code-{i}"}}"#)).await
        }));
    }
    for handle in handles {
        let (status, _, _) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    provider.verify().await;
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn exchange_transitions_are_logged_at_debug() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TOKEN_PAYLOAD, "application/json"))
        .expect(1)
        .mount(&provider)
        .await;

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("token_exchange_proxy=debug"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (status, _, _) =
        post(state(config(&provider.uri())), Some("http://evil.com"), r#"{"code":"abc"}"#).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) =
        post(state(config(&provider.uri())), Some(APP_ORIGIN), r#"{"code":"abc123"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let lines = logs.lines();
    for message in ["request rejected", "request validated", "exchange succeeded"] {
        let line = lines
            .iter()
            .find(|line| line.contains(message))
            .unwrap_or_else(|| panic!("no log line for {message:?} in {lines:#?}"));
        assert!(line.trim_start().starts_with("DEBUG"), "{line}");
    }
    for line in &lines {
        let line = line.trim_start();
        assert!(!line.starts_with("INFO") && !line.starts_with("WARN"), "{line}");
    }

    provider.verify().await;
}
