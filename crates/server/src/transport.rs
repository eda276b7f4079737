//! Session transports: one bidirectional MCP message channel per client session.
//!
//! [`SseTransport`] implements the HTTP+SSE transport: server->client messages are pushed as
//! `message` events on a long-lived `text/event-stream` response, client->server messages
//! arrive as individual `POST`s addressed by session id.

use crate::error::{Result, ServerError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt as _;
use futures::channel::mpsc;
use futures::stream;
use parking_lot::Mutex;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Callback fired once when a transport closes.
pub type OnClose = Box<dyn FnOnce() + Send + 'static>;

/// The MCP-facing side of a transport: outbound server messages, inbound client messages.
pub type McpChannel = (
    mpsc::UnboundedSender<ServerJsonRpcMessage>,
    mpsc::UnboundedReceiver<ClientJsonRpcMessage>,
);

/// A bidirectional channel bound to one session.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    fn session_id(&self) -> &str;

    /// Register the close callback, replacing any earlier one.
    fn set_on_close(&self, on_close: OnClose);

    /// Hand the MCP-facing channel to the protocol server; `None` once taken.
    fn take_channel(&self) -> Option<McpChannel>;

    /// Produce the streaming response for the client. May be called once.
    async fn start(&self) -> Result<Response>;

    /// Deliver one raw client payload.
    async fn handle_post_message(&self, payload: Bytes) -> Result<Response>;

    /// Close the transport; idempotent.
    async fn close(&self) -> Result<()>;
}

/// Creates a fresh transport for every stream-establish request.
pub trait TransportFactory: Send + Sync {
    /// `endpoint` is the path clients post messages to.
    fn create(&self, endpoint: &str) -> Arc<dyn SessionTransport>;
}

/// Builds [`SseTransport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SseTransportFactory;

impl TransportFactory for SseTransportFactory {
    fn create(&self, endpoint: &str) -> Arc<dyn SessionTransport> {
        Arc::new(SseTransport::new(endpoint))
    }
}

#[derive(Default)]
struct Inner {
    session_id: String,
    endpoint: String,
    started: AtomicBool,
    closed: CancellationToken,
    on_close: Mutex<Option<OnClose>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<ClientJsonRpcMessage>>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerJsonRpcMessage>>>,
    channel: Mutex<Option<McpChannel>>,
}

impl Inner {
    fn shutdown(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        // Ends the MCP service's inbound stream.
        self.inbound_tx.lock().take();
        self.channel.lock().take();
        self.outbound_rx.lock().take();

        let on_close = self.on_close.lock().take();
        if let Some(on_close) = on_close {
            on_close();
        }
    }
}

/// Closes the transport when the event stream is dropped (client went away).
struct CloseOnDrop(Arc<Inner>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// HTTP+SSE session transport.
pub struct SseTransport {
    inner: Arc<Inner>,
}

impl SseTransport {
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        let (outbound_tx, outbound_rx) = mpsc::unbounded();

        Self {
            inner: Arc::new(Inner {
                session_id: uuid::Uuid::new_v4().to_string(),
                endpoint: endpoint.to_string(),
                inbound_tx: Mutex::new(Some(inbound_tx)),
                outbound_rx: Mutex::new(Some(outbound_rx)),
                channel: Mutex::new(Some((outbound_tx, inbound_rx))),
                ..Default::default()
            }),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    fn endpoint_event(&self) -> Event {
        Event::default().event("endpoint").data(format!(
            "{}?sessionId={}",
            self.inner.endpoint, self.inner.session_id
        ))
    }
}

#[async_trait]
impl SessionTransport for SseTransport {
    fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    fn set_on_close(&self, on_close: OnClose) {
        *self.inner.on_close.lock() = Some(on_close);
    }

    fn take_channel(&self) -> Option<McpChannel> {
        self.inner.channel.lock().take()
    }

    async fn start(&self) -> Result<Response> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::Protocol(
                "SSE transport already started".to_string(),
            ));
        }
        let outbound_rx = self
            .inner
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| ServerError::Transport("SSE transport is closed".to_string()))?;

        let guard = CloseOnDrop(Arc::clone(&self.inner));
        let session_id = self.inner.session_id.clone();
        let messages = outbound_rx.filter_map(move |msg| {
            let event = match Event::default().event("message").json_data(&msg) {
                Ok(event) => Some(Ok::<_, Infallible>(event)),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "dropping unserializable message");
                    None
                }
            };
            futures::future::ready(event)
        });

        let events = stream::once(futures::future::ready(Ok(self.endpoint_event())))
            .chain(messages)
            .take_until(self.inner.closed.clone().cancelled_owned())
            .map(move |event| {
                let _guard = &guard;
                event
            });

        tracing::debug!(session_id = %self.inner.session_id, "SSE stream started");
        Ok(Sse::new(events)
            .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
            .into_response())
    }

    async fn handle_post_message(&self, payload: Bytes) -> Result<Response> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(ServerError::Transport(
                "SSE connection not established".to_string(),
            ));
        }

        let message: ClientJsonRpcMessage = serde_json::from_slice(&payload)
            .map_err(|e| ServerError::Transport(format!("Invalid message: {e}")))?;

        let sender = self.inner.inbound_tx.lock().clone();
        let sender =
            sender.ok_or_else(|| ServerError::Transport("SSE transport is closed".to_string()))?;
        sender
            .unbounded_send(message)
            .map_err(|e| ServerError::Transport(format!("Failed to deliver message: {e}")))?;

        Ok((StatusCode::OK, "Accepted").into_response())
    }

    async fn close(&self) -> Result<()> {
        self.inner.shutdown();
        Ok(())
    }
}
