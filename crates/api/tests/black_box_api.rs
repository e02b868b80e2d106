use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};

use storefront_api::app::{self, services::AppServices};
use storefront_api::config::AppConfig;
use storefront_realtime::{InMemoryNotificationSource, ListenerState, RealtimeConfig, RealtimeHub};

/// Short enough that a dropped client is noticed on the next ping write.
const TEST_KEEPALIVE: Duration = Duration::from_millis(100);
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    base_url: String,
    hub: Arc<RealtimeHub>,
    source: Arc<InMemoryNotificationSource>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            database_url: None,
            realtime: RealtimeConfig::default().with_keepalive_interval(TEST_KEEPALIVE),
        };
        let AppServices { hub, in_memory } = app::services::build_services(&config).unwrap();
        let source = in_memory.expect("in-memory source without DATABASE_URL");

        // Same router as prod, bound to an ephemeral port.
        let app = app::build_app(hub.clone());
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            hub,
            source,
            handle,
        }
    }

    async fn open_stream(&self, client: &reqwest::Client) -> FrameReader {
        let res = client
            .get(format!("{}/realtime", self.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        FrameReader::new(res)
    }

    async fn control(&self, client: &reqwest::Client, body: JsonValue) -> (StatusCode, JsonValue) {
        let res = client
            .post(format!("{}/realtime", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn wait_listening(&self) {
        for _ in 0..500 {
            if self.hub.listener_state() == ListenerState::Listening {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener did not start within timeout");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.hub.shutdown();
        self.handle.abort();
    }
}

/// Splits the response body into `data: ...\n\n` frames.
struct FrameReader {
    res: reqwest::Response,
    buf: Vec<u8>,
}

impl FrameReader {
    fn new(res: reqwest::Response) -> Self {
        Self {
            res,
            buf: Vec::new(),
        }
    }

    async fn next_raw(&mut self) -> String {
        loop {
            if let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
                let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
                return String::from_utf8(frame).unwrap();
            }
            let chunk = tokio::time::timeout(FRAME_TIMEOUT, self.res.chunk())
                .await
                .expect("timed out waiting for frame")
                .unwrap()
                .expect("stream ended");
            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Next frame that is not a keepalive ping, as raw text.
    async fn next_message_raw(&mut self) -> String {
        loop {
            let raw = self.next_raw().await;
            if parse_frame(&raw)["type"] != "ping" {
                return raw;
            }
        }
    }

    async fn next_message(&mut self) -> JsonValue {
        parse_frame(&self.next_message_raw().await)
    }
}

fn parse_frame(raw: &str) -> JsonValue {
    let body = raw
        .strip_prefix("data: ")
        .and_then(|r| r.strip_suffix("\n\n"))
        .unwrap_or_else(|| panic!("not an event-stream frame: {raw:?}"));
    serde_json::from_str(body).unwrap()
}

async fn stats_eventually(
    srv: &TestServer,
    client: &reqwest::Client,
    active: u64,
) -> JsonValue {
    // Client aborts are noticed asynchronously (on the next write).
    for _ in 0..500 {
        let (status, body) = srv.control(client, json!({"action": "stats"})).await;
        assert_eq!(status, StatusCode::OK);
        if body["activeConnections"] == active {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("active connections did not reach {active} within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn stream_starts_with_connected_frame() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/realtime", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/event-stream");
    assert_eq!(res.headers()["cache-control"], "no-cache");

    let mut stream = FrameReader::new(res);
    let connected = parse_frame(&stream.next_raw().await);
    assert_eq!(connected["type"], "connected");
    let id = connected["connectionId"].as_str().unwrap().to_string();

    let (_, stats) = srv.control(&client, json!({"action": "stats"})).await;
    assert_eq!(stats, json!({"activeConnections": 1, "connectionIds": [id]}));
}

#[tokio::test]
async fn stream_sends_keepalive_pings() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut stream = srv.open_stream(&client).await;
    stream.next_raw().await;

    let ping = parse_frame(&stream.next_raw().await);

    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn database_change_reaches_every_stream() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut c1 = srv.open_stream(&client).await;
    let mut c2 = srv.open_stream(&client).await;
    c1.next_raw().await;
    c2.next_raw().await;
    srv.wait_listening().await;

    srv.source
        .notify("orders", r#"{"operation":"INSERT","record":{"id":"42"}}"#);

    let expected = "data: {\"channel\":\"orders\",\"event\":\"insert\",\"payload\":{\"id\":\"42\"}}\n\n";
    assert_eq!(c1.next_message_raw().await, expected);
    assert_eq!(c2.next_message_raw().await, expected);
}

#[tokio::test]
async fn malformed_notification_does_not_block_later_ones() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut stream = srv.open_stream(&client).await;
    stream.next_raw().await;
    srv.wait_listening().await;

    srv.source.notify("orders", "{not json");
    srv.source
        .notify("orders", r#"{"operation":"DELETE","record":{"id":"7"}}"#);

    assert_eq!(
        stream.next_message().await,
        json!({"channel": "orders", "event": "delete", "payload": {"id": "7"}})
    );
}

#[tokio::test]
async fn dropped_client_is_unregistered_and_others_keep_receiving() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut c1 = srv.open_stream(&client).await;
    let mut c2 = srv.open_stream(&client).await;
    c1.next_raw().await;
    let c2_id = parse_frame(&c2.next_raw().await)["connectionId"].clone();
    srv.wait_listening().await;

    drop(c1);

    let stats = stats_eventually(&srv, &client, 1).await;
    assert_eq!(stats["connectionIds"], json!([c2_id]));

    srv.source
        .notify("orders", r#"{"operation":"UPDATE","record":{"id":"42"}}"#);
    assert_eq!(
        c2.next_message().await,
        json!({"channel": "orders", "event": "update", "payload": {"id": "42"}})
    );
}

#[tokio::test]
async fn manual_broadcast_reaches_streams() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut stream = srv.open_stream(&client).await;
    stream.next_raw().await;

    let (status, body) = srv
        .control(
            &client,
            json!({"action": "broadcast", "channel": "orders", "event": "test", "payload": {"x": 1}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    assert_eq!(
        stream.next_message().await,
        json!({"channel": "orders", "event": "test", "payload": {"x": 1}})
    );
}

#[tokio::test]
async fn broadcast_requires_channel_and_event() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = srv
        .control(&client, json!({"action": "broadcast", "event": "test"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv
        .control(&client, json!({"action": "broadcast", "channel": "orders"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn stats_without_connections() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = srv.control(&client, json!({"action": "stats"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"activeConnections": 0, "connectionIds": []}));
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = srv.control(&client, json!({"action": "explode"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_action");
    assert!(body["message"].as_str().unwrap().contains("explode"));

    let (status, body) = srv.control(&client, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_action");
}

#[tokio::test]
async fn non_json_body_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/realtime", srv.base_url))
        .body("action=stats")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn status_reports_listener_state() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut stream = srv.open_stream(&client).await;
    stream.next_raw().await;
    srv.wait_listening().await;

    let body: JsonValue = client
        .get(format!("{}/status", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({"activeConnections": 1, "listener": "listening", "channels": ["orders"]})
    );
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let mut stream = srv.open_stream(&client).await;
    stream.next_raw().await;

    srv.hub.shutdown();

    let ended = tokio::time::timeout(FRAME_TIMEOUT, async {
        loop {
            match stream.res.chunk().await {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "stream kept running after shutdown");

    let res = client
        .get(format!("{}/realtime", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}
