//! WebSocket server for the relay endpoint
//!
//! One task per socket reads frames and dispatches them through the gateway; a
//! second task drains the connection's outbound queue into the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::{Gateway, Outbound, Session};
use crate::config::Config;
use crate::error::Result;

/// Time a closing connection gets to flush its outbound queue
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound listener plus the gateway it serves
pub struct GatewayServer {
    listener: TcpListener,
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    /// Bind the listening socket; the only fatal failure of the relay
    pub async fn bind(config: Config) -> Result<Self> {
        config.validate()?;
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let gateway = Arc::new(Gateway::new(config)?);

        Ok(Self { listener, gateway })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let app = create_router(self.gateway.clone());
        info!(addr = %addr, path = %self.gateway.config().ws_path, "Relay gateway listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Relay gateway stopped");
        Ok(())
    }
}

/// Router exposing the relay endpoint, health check and metrics
pub fn create_router(gateway: Arc<Gateway>) -> Router {
    let ws_path = gateway.config().ws_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

async fn health_check(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-relay",
        "subscribers": gateway.subscriber_count().await,
        "producer_connected": gateway.producer().await.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    match gateway.metrics().render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Handle one relay connection from accept to teardown
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (mut session, rx) = gateway.accept();
    let connection_id = session.id();

    let mut writer = tokio::spawn(write_loop(ws_tx, rx));

    if let Err(e) = gateway.connect(&mut session).await {
        warn!(connection_id, error = %e, "Failed to register connection");
        writer.abort();
        return;
    }

    let mut ping = interval(Duration::from_secs(gateway.config().ping_interval_secs));
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping.tick().await;

    let handle = session.handle().clone();
    loop {
        tokio::select! {
            biased;

            _ = handle.closed() => {
                debug!(connection_id, "Connection closed by gateway");
                break;
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if !handle_message(&gateway, &mut session, msg).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = ping.tick() => {
                if handle.try_send(Outbound::Ping).is_err() {
                    debug!(connection_id, "Outbound queue unavailable for keepalive ping");
                }
            }
        }
    }

    gateway.disconnect(&mut session).await;
    handle.close();
    drop(handle);
    drop(session);

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Drain the outbound queue into the socket until Close or a write error
async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(frame) = rx.recv().await {
        let result = match frame {
            Outbound::Text(text) => ws_tx.send(Message::Text(text.to_string())).await,
            Outbound::Ping => ws_tx.send(Message::Ping(Vec::new())).await,
            Outbound::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            Outbound::Close => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        };
        if result.is_err() {
            break;
        }
    }
}

/// Returns false when the peer asked to close
async fn handle_message(gateway: &Gateway, session: &mut Session, msg: Message) -> bool {
    let text = match msg {
        Message::Text(text) => text,
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection_id = session.id(), error = %e, "Dropping non UTF-8 binary frame");
                gateway.metrics().malformed_frames.inc();
                return true;
            }
        },
        Message::Ping(data) => {
            let _ = session.handle().try_send(Outbound::Pong(data));
            return true;
        }
        Message::Pong(_) => return true,
        Message::Close(frame) => {
            debug!(connection_id = session.id(), frame = ?frame, "Received close frame");
            return false;
        }
    };

    match gateway.handle_text(session, &text).await {
        Ok(dispatch) => {
            tracing::trace!(connection_id = session.id(), dispatch = ?dispatch, "Message dispatched");
        }
        Err(e) => {
            warn!(connection_id = session.id(), error = %e, "Failed to process message");
        }
    }
    true
}
