//! Router behavior of the gateway with in-memory transports and protocol server.

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use openapi_mcp::error::{Result, ServerError};
use openapi_mcp::transport::{McpChannel, OnClose, SessionTransport, TransportFactory};
use openapi_mcp::{Gateway, ProtocolServer, TransportStore};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt;

#[derive(Default)]
struct FakeTransport {
    id: String,
    fail_post: bool,
    closes: AtomicUsize,
    posts: Mutex<Vec<Bytes>>,
    on_close: Mutex<Option<OnClose>>,
}

impl FakeTransport {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ..Default::default()
        })
    }

    fn failing_posts(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            fail_post: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn set_on_close(&self, on_close: OnClose) {
        *self.on_close.lock() = Some(on_close);
    }

    fn take_channel(&self) -> Option<McpChannel> {
        None
    }

    async fn start(&self) -> Result<Response> {
        Ok((StatusCode::OK, format!("stream {}", self.id)).into_response())
    }

    async fn handle_post_message(&self, payload: Bytes) -> Result<Response> {
        if self.fail_post {
            return Err(ServerError::Transport("broken".into()));
        }
        self.posts.lock().push(payload);
        Ok((StatusCode::OK, "Accepted").into_response())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let on_close = self.on_close.lock().take();
        if let Some(on_close) = on_close {
            on_close();
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    queue: Mutex<VecDeque<Arc<FakeTransport>>>,
}

impl FakeFactory {
    fn with(transports: impl IntoIterator<Item = Arc<FakeTransport>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(transports.into_iter().collect()),
        })
    }
}

impl TransportFactory for FakeFactory {
    fn create(&self, _endpoint: &str) -> Arc<dyn SessionTransport> {
        self.queue
            .lock()
            .pop_front()
            .expect("test queued enough transports")
    }
}

#[derive(Default)]
struct FakeServer {
    fail_connect: bool,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

#[async_trait]
impl ProtocolServer for FakeServer {
    async fn connect(&self, _transport: Arc<dyn SessionTransport>) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(ServerError::Connect("refused".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn gateway(server: Arc<FakeServer>, factory: Arc<FakeFactory>) -> Gateway {
    Gateway::with_transport_factory(server, Arc::new(TransportStore::new()), factory)
}

async fn send(gateway: &Gateway, request: Request<Body>) -> (StatusCode, String) {
    let response = gateway.router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn open_stream() -> Request<Body> {
    Request::builder().uri("/mcp").body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn post_without_session_id_is_bad_request() {
    let gw = gateway(Arc::default(), Arc::default());

    let (status, body) = send(&gw, post("/messages", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing sessionId parameter");

    let (status, body) = send(&gw, post("/messages?sessionId=", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Missing sessionId parameter");
}

#[tokio::test]
async fn post_to_unknown_session_is_not_found() {
    let gw = gateway(Arc::default(), Arc::default());

    let (status, body) = send(&gw, post("/messages?sessionId=nope", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Session not found");
}

#[tokio::test]
async fn stream_establish_registers_and_routes_messages() {
    let server = Arc::new(FakeServer::default());
    let transport = FakeTransport::new("s1");
    let gw = gateway(server.clone(), FakeFactory::with([transport.clone()]));

    let (status, body) = send(&gw, open_stream()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "stream s1");
    assert_eq!(server.connects.load(Ordering::SeqCst), 1);
    assert!(gw.store().get("s1").is_some());

    let (status, body) = send(&gw, post("/messages?sessionId=s1", r#"{"x":1}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Accepted");
    assert_eq!(transport.posts.lock().as_slice(), [Bytes::from(r#"{"x":1}"#)]);
}

#[tokio::test]
async fn handler_failure_is_internal_error() {
    let gw = gateway(
        Arc::default(),
        FakeFactory::with([FakeTransport::failing_posts("s1")]),
    );
    send(&gw, open_stream()).await;

    let (status, body) = send(&gw, post("/messages?sessionId=s1", "{}")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error handling request");
}

#[tokio::test]
async fn connect_failure_is_internal_error_and_leaves_no_session() {
    let server = Arc::new(FakeServer {
        fail_connect: true,
        ..Default::default()
    });
    let transport = FakeTransport::new("s1");
    let gw = gateway(server, FakeFactory::with([transport.clone()]));

    let (status, body) = send(&gw, open_stream()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error establishing SSE stream");
    assert!(gw.store().is_empty());
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_transport_is_removed_from_the_store() {
    let transport = FakeTransport::new("s1");
    let gw = gateway(Arc::default(), FakeFactory::with([transport.clone()]));
    send(&gw, open_stream()).await;

    transport.close().await.unwrap();

    assert!(gw.store().is_empty());
    let (status, _) = send(&gw, post("/messages?sessionId=s1", "{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sessions_are_independent() {
    let a = FakeTransport::new("a");
    let b = FakeTransport::new("b");
    let gw = gateway(Arc::default(), FakeFactory::with([a.clone(), b.clone()]));
    send(&gw, open_stream()).await;
    send(&gw, open_stream()).await;
    assert_eq!(gw.store().len(), 2);

    send(&gw, post("/messages?sessionId=b", "1")).await;
    assert!(a.posts.lock().is_empty());
    assert_eq!(b.posts.lock().len(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let server = Arc::new(FakeServer::default());
    let a = FakeTransport::new("a");
    let b = FakeTransport::new("b");
    let gw = gateway(server.clone(), FakeFactory::with([a.clone(), b.clone()]));
    send(&gw, open_stream()).await;
    send(&gw, open_stream()).await;

    gw.shutdown().await.unwrap();
    gw.shutdown().await.unwrap();

    assert!(gw.store().is_empty());
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    assert_eq!(server.closes.load(Ordering::SeqCst), 1);
}
