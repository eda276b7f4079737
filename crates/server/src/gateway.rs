//! HTTP surface: `GET /mcp` opens a session stream, `POST /messages?sessionId=` feeds it.

use crate::error::{Result, ServerError};
use crate::store::TransportStore;
use crate::transport::{SessionTransport, SseTransportFactory, TransportFactory};
use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use rmcp::{ServerHandler, ServiceExt as _};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

pub const STREAM_PATH: &str = "/mcp";
pub const MESSAGES_PATH: &str = "/messages";

/// The protocol engine sessions are attached to.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    /// Attach a transport and start serving it in the background.
    async fn connect(&self, transport: Arc<dyn SessionTransport>) -> Result<()>;

    /// Stop every session started through [`ProtocolServer::connect`].
    async fn close(&self) -> Result<()>;
}

/// Serves an `rmcp` handler over session transports; one service task per session.
pub struct McpServer<H> {
    handler: H,
    shutdown: CancellationToken,
}

impl<H> McpServer<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[async_trait]
impl<H> ProtocolServer for McpServer<H>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    async fn connect(&self, transport: Arc<dyn SessionTransport>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ServerError::Connect("server is closed".to_string()));
        }
        let channel = transport
            .take_channel()
            .ok_or_else(|| ServerError::Connect("transport is already connected".to_string()))?;

        let handler = self.handler.clone();
        let ct = self.shutdown.child_token();
        let session_id = transport.session_id().to_string();

        // The initialize handshake arrives later through POST, so the service runs detached.
        tokio::spawn(async move {
            match handler.serve_with_ct(channel, ct).await {
                Ok(running) => match running.waiting().await {
                    Ok(reason) => {
                        tracing::debug!(session_id = %session_id, ?reason, "MCP session ended");
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "MCP session task failed");
                    }
                },
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "MCP session initialization failed");
                }
            }
            if let Err(e) = transport.close().await {
                tracing::error!(session_id = %session_id, error = %e, "Error closing transport");
            }
        });

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

struct GatewayInner {
    store: Arc<TransportStore>,
    server: Arc<dyn ProtocolServer>,
    transports: Arc<dyn TransportFactory>,
    shut_down: AtomicBool,
}

/// Lifecycle owner of the HTTP surface, the session store, and the protocol server.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(server: Arc<dyn ProtocolServer>, store: Arc<TransportStore>) -> Self {
        Self::with_transport_factory(server, store, Arc::new(SseTransportFactory))
    }

    pub fn with_transport_factory(
        server: Arc<dyn ProtocolServer>,
        store: Arc<TransportStore>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                store,
                server,
                transports,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TransportStore> {
        &self.inner.store
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(STREAM_PATH, get(establish_stream))
            .route(MESSAGES_PATH, post(post_message))
            .with_state(self.clone())
    }

    /// Close every session, then the protocol server. Only the first call has an effect.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the protocol server fails.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Shutting down server...");
        self.inner.store.clear().await;
        self.inner.server.close().await?;
        tracing::info!("Server shutdown complete");
        Ok(())
    }

    async fn establish(&self) -> Result<Response> {
        let transport = self.inner.transports.create(MESSAGES_PATH);
        let session_id = transport.session_id().to_string();
        self.inner.store.store(session_id.clone(), Arc::clone(&transport));

        let store = Arc::clone(&self.inner.store);
        let closed_id = session_id.clone();
        transport.set_on_close(Box::new(move || {
            tracing::info!(session_id = %closed_id, "SSE transport closed");
            store.remove(&closed_id);
        }));

        let started = async {
            self.inner.server.connect(Arc::clone(&transport)).await?;
            transport.start().await
        }
        .await;

        match started {
            Ok(response) => {
                tracing::info!(session_id = %session_id, "SSE stream established");
                Ok(response)
            }
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    tracing::warn!(session_id = %session_id, error = %close_err, "Error closing transport");
                }
                self.inner.store.remove(&session_id);
                Err(e)
            }
        }
    }
}

async fn establish_stream(State(gateway): State<Gateway>) -> Response {
    match gateway.establish().await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Error establishing SSE stream");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error establishing SSE stream").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn post_message(
    State(gateway): State<Gateway>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        tracing::warn!("message without sessionId");
        return (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response();
    };

    let Some(transport) = gateway.store().get(&session_id) else {
        tracing::warn!(session_id = %session_id, "message for unknown session");
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    match transport.handle_post_message(body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Error handling request");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error handling request").into_response()
        }
    }
}
