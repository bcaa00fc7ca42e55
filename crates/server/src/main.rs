use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    paths::KeyPath,
    protocol::{ClientFrame, ServerFrame},
};
use store::{RealtimeStore, Store, WatchEvent, WatchHandle};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

mod config;

use config::load_settings;

const FRAME_BUFFER: usize = 64;

#[derive(Clone)]
struct AppState {
    store: Store,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let state = AppState {
        store: Store::new(),
        auth_token: settings.auth_token.clone(),
    };
    let app = build_router(Arc::new(state), settings.max_value_bytes);

    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    info!(%addr, auth = settings.auth_token.is_some(), "realtime store listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_value_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/data/*path",
            get(read_value).put(write_value).delete(delete_value),
        )
        .route("/ws", get(ws_subscribe))
        .layer(RequestBodyLimitLayer::new(max_value_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ApiError::new(code, message))).into_response()
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "missing or invalid bearer token",
        ))
    }
}

fn parse_path(raw: &str) -> Result<KeyPath, Response> {
    KeyPath::new(raw).map_err(|error| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::Validation,
            error.to_string(),
        )
    })
}

async fn read_value(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let path = match parse_path(&raw) {
        Ok(path) => path,
        Err(rejection) => return rejection,
    };
    match state.store.get(&path).await {
        Ok(value) => Json(value.unwrap_or(Value::Null)).into_response(),
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            error.to_string(),
        ),
    }
}

async fn write_value(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
    Json(value): Json<Value>,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let path = match parse_path(&raw) {
        Ok(path) => path,
        Err(rejection) => return rejection,
    };
    match state.store.put(&path, value.clone()).await {
        Ok(()) => Json(value).into_response(),
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            error.to_string(),
        ),
    }
}

async fn delete_value(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    let path = match parse_path(&raw) {
        Ok(path) => path,
        Err(rejection) => return rejection,
    };
    match state.store.delete(&path).await {
        Ok(()) => "ok".into_response(),
        Err(error) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            error.to_string(),
        ),
    }
}

async fn ws_subscribe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = &state.auth_token {
        if query.token.as_deref() != Some(expected.as_str()) {
            return error_response(
                StatusCode::UNAUTHORIZED,
                ErrorCode::Unauthorized,
                "missing or invalid token",
            );
        }
    }
    ws.on_upgrade(move |socket| handle_subscriptions(socket, state))
}

/// One subscription socket: the client multiplexes watches by path;
/// subscribing a path that is already watched on this socket replaces
/// the old watch. Everything is torn down when the socket closes.
async fn handle_subscriptions(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerFrame>(FRAME_BUFFER);

    let writer = tokio::spawn(async move {
        let mut frames = ReceiverStream::new(rx);
        while let Some(frame) = frames.next().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    });

    let mut watchers: HashMap<KeyPath, JoinHandle<()>> = HashMap::new();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "subscription socket failed");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Subscribe { path }) => {
                    if let Some(previous) = watchers.remove(&path) {
                        previous.abort();
                    }
                    match state.store.watch(&path).await {
                        Ok(watch) => {
                            watchers.insert(path, spawn_forwarder(watch, tx.clone()));
                        }
                        Err(error) => {
                            let _ = tx
                                .send(ServerFrame::SubscriptionError {
                                    path,
                                    error: ApiError::new(ErrorCode::Internal, error.to_string()),
                                })
                                .await;
                        }
                    }
                }
                Ok(ClientFrame::Unsubscribe { path }) => {
                    if let Some(watch) = watchers.remove(&path) {
                        watch.abort();
                    }
                }
                Err(error) => {
                    warn!(%error, "ignoring malformed client frame");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    for (_, watch) in watchers {
        watch.abort();
    }
    drop(tx);
    let _ = writer.await;
}

fn spawn_forwarder(mut watch: WatchHandle, tx: mpsc::Sender<ServerFrame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let path = watch.path().clone();
        while let Some(event) = watch.next().await {
            match event {
                WatchEvent::Snapshot(value) => {
                    let frame = ServerFrame::Update {
                        path: path.clone(),
                        value,
                    };
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
                WatchEvent::Lost(error) => {
                    let _ = tx
                        .send(ServerFrame::SubscriptionError {
                            path: path.clone(),
                            error: ApiError::new(ErrorCode::Internal, error.to_string()),
                        })
                        .await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
