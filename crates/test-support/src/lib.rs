use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request as seen by [`MockApi`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Clone)]
enum Reply {
    /// Echo the request back as JSON.
    Echo,
    Fixed {
        status: StatusCode,
        content_type: &'static str,
        body: String,
    },
}

#[derive(Clone)]
struct MockState {
    reply: Reply,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// In-process HTTP backend bound to an ephemeral localhost port that records every request.
pub struct MockApi {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl MockApi {
    /// A backend answering `200` with a JSON echo of the request:
    /// `{"method", "path", "query", "headers", "body"}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn echo() -> anyhow::Result<Self> {
        Self::start(Reply::Echo).await
    }

    /// A backend answering every request with a fixed JSON body and status.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn json(status: StatusCode, body: serde_json::Value) -> anyhow::Result<Self> {
        Self::start(Reply::Fixed {
            status,
            content_type: "application/json",
            body: body.to_string(),
        })
        .await
    }

    /// A backend answering every request with a fixed plain-text body and status.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn text(status: StatusCode, body: impl Into<String>) -> anyhow::Result<Self> {
        Self::start(Reply::Fixed {
            status,
            content_type: "text/plain",
            body: body.into(),
        })
        .await
    }

    async fn start(reply: Reply) -> anyhow::Result<Self> {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            reply,
            requests: Arc::clone(&requests),
        };
        let app = Router::new()
            .route("/", any(record_and_reply))
            .route("/{*path}", any(record_and_reply))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock api")?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let handle = tokio::spawn(async move { server.await });

        Ok(Self {
            addr,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Stop the server and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task panicked or failed.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.context("mock api task join")??;
        }
        Ok(())
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn record_and_reply(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = RecordedRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    state.requests.lock().push(recorded.clone());

    match state.reply {
        Reply::Echo => axum::Json(serde_json::json!({
            "method": recorded.method,
            "path": recorded.path,
            "query": recorded.query,
            "headers": recorded.headers,
            "body": recorded.body,
        }))
        .into_response(),
        Reply::Fixed {
            status,
            content_type,
            body,
        } => (status, [(header::CONTENT_TYPE, content_type)], body).into_response(),
    }
}

/// One server-sent event with a non-empty payload.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental reader over a `text/event-stream` response.
pub struct SseReader {
    stream: BoxStream<'static, anyhow::Result<sse_stream::Sse>>,
}

impl SseReader {
    #[must_use]
    pub fn new(resp: reqwest::Response) -> Self {
        let stream = sse_stream::SseStream::from_byte_stream(resp.bytes_stream())
            .map(|evt| evt.context("read SSE event"))
            .boxed();
        Self { stream }
    }

    /// Wait for the next event carrying data; keep-alive comments are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, on a malformed stream, or when the stream ends.
    pub async fn next_event(&mut self, timeout_dur: Duration) -> anyhow::Result<SseEvent> {
        tokio::time::timeout(timeout_dur, async {
            while let Some(evt) = self.stream.next().await {
                let evt = evt?;
                let data = evt.data.unwrap_or_default();
                if data.trim().is_empty() {
                    continue;
                }
                return Ok(SseEvent {
                    event: evt.event,
                    data,
                });
            }
            anyhow::bail!("event-stream ended")
        })
        .await
        .context("timed out waiting for SSE event")?
    }

    /// Wait for the next `message` event and parse its data as JSON.
    ///
    /// # Errors
    ///
    /// See [`SseReader::next_event`]; also fails if the payload is not JSON.
    pub async fn next_json_message(
        &mut self,
        timeout_dur: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        loop {
            let evt = self.next_event(timeout_dur).await?;
            if evt.event.as_deref().is_none_or(|e| e == "message") {
                return serde_json::from_str(&evt.data).context("parse SSE data as JSON");
            }
        }
    }
}
