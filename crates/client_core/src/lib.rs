use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use shared::{
    error::StoreError,
    paths::KeyPath,
    protocol::{ClientFrame, ServerFrame},
};
use store::{RealtimeStore, WatchEvent, WatchHandle};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

pub mod panels;

const SUBSCRIPTION_BUFFER: usize = 64;

/// Connection parameters for the remote store. Supplied once at startup;
/// there is no runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub auth_token: Option<String>,
}

/// Remote [`RealtimeStore`] over the server's HTTP and WebSocket surface.
///
/// Reads and writes go through `/data/{path}`; each watch holds its own
/// `/ws` subscription socket, so cancelling one observation never
/// disturbs another.
#[derive(Debug)]
pub struct SyncClient {
    http: Client,
    server_url: String,
    subscribe_url: Url,
    auth_token: Option<String>,
}

impl SyncClient {
    /// Validates the endpoint and builds the client. A malformed endpoint
    /// fails here, fast, rather than hanging a later operation.
    pub fn connect(config: ClientConfig) -> Result<Self, StoreError> {
        let server_url = config.server_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&server_url)
            .map_err(|error| StoreError::Configuration(format!("invalid server url: {error}")))?;

        let ws_url = match parsed.scheme() {
            "http" => server_url.replacen("http://", "ws://", 1),
            "https" => server_url.replacen("https://", "wss://", 1),
            other => {
                return Err(StoreError::Configuration(format!(
                    "server url must start with http:// or https://, got {other}://"
                )))
            }
        };
        let mut subscribe_url = Url::parse(&format!("{ws_url}/ws"))
            .map_err(|error| StoreError::Configuration(format!("invalid server url: {error}")))?;
        if let Some(token) = &config.auth_token {
            // Percent-encoded, so tokens with query metacharacters survive.
            subscribe_url.query_pairs_mut().append_pair("token", token);
        }

        Ok(Self {
            http: Client::new(),
            server_url,
            subscribe_url,
            auth_token: config.auth_token,
        })
    }

    fn data_url(&self, path: &KeyPath) -> String {
        format!("{}/data/{}", self.server_url, path)
    }

    fn subscribe_url(&self) -> String {
        self.subscribe_url.to_string()
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RealtimeStore for SyncClient {
    async fn get(&self, path: &KeyPath) -> Result<Option<Value>, StoreError> {
        let response = self
            .with_auth(self.http.get(self.data_url(path)))
            .send()
            .await
            .map_err(|error| StoreError::read(path.as_str(), error.to_string()))?
            .error_for_status()
            .map_err(|error| StoreError::read(path.as_str(), error.to_string()))?;
        let value: Value = response
            .json()
            .await
            .map_err(|error| StoreError::read(path.as_str(), error.to_string()))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn put(&self, path: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.with_auth(self.http.put(self.data_url(path)))
            .json(&value)
            .send()
            .await
            .map_err(|error| StoreError::write(path.as_str(), error.to_string()))?
            .error_for_status()
            .map_err(|error| StoreError::write(path.as_str(), error.to_string()))?;
        Ok(())
    }

    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError> {
        self.with_auth(self.http.delete(self.data_url(path)))
            .send()
            .await
            .map_err(|error| StoreError::write(path.as_str(), error.to_string()))?
            .error_for_status()
            .map_err(|error| StoreError::write(path.as_str(), error.to_string()))?;
        Ok(())
    }

    async fn watch(&self, path: &KeyPath) -> Result<WatchHandle, StoreError> {
        let url = self.subscribe_url();
        let (mut socket, _) = connect_async(&url).await.map_err(|error| {
            StoreError::read(path.as_str(), format!("websocket connect failed: {error}"))
        })?;

        // Subscribe before handing the socket to the reader task so a
        // refused connection surfaces to the caller, not the stream.
        let frame = serde_json::to_string(&ClientFrame::Subscribe { path: path.clone() })
            .map_err(|error| StoreError::read(path.as_str(), error.to_string()))?;
        socket
            .send(Message::Text(frame))
            .await
            .map_err(|error| StoreError::read(path.as_str(), error.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let watched = path.clone();
        let task = tokio::spawn(async move {
            // Cancellation drops the socket, which ends the server-side
            // subscription; no unsubscribe frame is needed.
            let (_sink, mut frames) = socket.split();
            while let Some(message) = frames.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Update { path, value }) if path == watched => {
                            if tx.send(WatchEvent::Snapshot(value)).await.is_err() {
                                return;
                            }
                        }
                        Ok(ServerFrame::Update { path, .. }) => {
                            warn!(%path, watched = %watched, "update for a path this socket never subscribed");
                        }
                        Ok(ServerFrame::SubscriptionError { error, .. }) => {
                            let _ = tx
                                .send(WatchEvent::Lost(StoreError::read(
                                    watched.as_str(),
                                    error.message,
                                )))
                                .await;
                            return;
                        }
                        Err(error) => {
                            let _ = tx
                                .send(WatchEvent::Lost(StoreError::read(
                                    watched.as_str(),
                                    format!("malformed frame: {error}"),
                                )))
                                .await;
                            return;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        let _ = tx
                            .send(WatchEvent::Lost(StoreError::read(
                                watched.as_str(),
                                "server closed the subscription",
                            )))
                            .await;
                        return;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        let _ = tx
                            .send(WatchEvent::Lost(StoreError::read(
                                watched.as_str(),
                                error.to_string(),
                            )))
                            .await;
                        return;
                    }
                }
            }
            let _ = tx
                .send(WatchEvent::Lost(StoreError::read(
                    watched.as_str(),
                    "subscription stream ended",
                )))
                .await;
        });

        Ok(WatchHandle::from_parts(path.clone(), rx, task))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Failed,
    Cancelled,
}

/// The remote state synchronizer: per-path subscribe with a default for
/// absence, confirmed publish, and explicit clear, over any injected
/// [`RealtimeStore`].
///
/// At most one subscription per path may be active at a time; a second
/// `subscribe` for the same path is rejected until the holder cancels or
/// drops. Failures are surfaced to the caller, never retried here.
#[derive(Clone)]
pub struct Synchronizer {
    store: Arc<dyn RealtimeStore>,
    active: Arc<Mutex<HashSet<KeyPath>>>,
}

impl Synchronizer {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> Arc<dyn RealtimeStore> {
        Arc::clone(&self.store)
    }

    /// Registers a continuous observation of `path`. Absent payloads are
    /// replaced by `default`; present payloads pass through raw, with no
    /// schema validation beyond presence.
    pub async fn subscribe(
        &self,
        path: KeyPath,
        default: Value,
    ) -> Result<ValueSubscription, StoreError> {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(path.clone()) {
                return Err(StoreError::read(
                    path.as_str(),
                    "path already has an active subscription",
                ));
            }
        }
        match self.store.watch(&path).await {
            Ok(watch) => Ok(ValueSubscription {
                default,
                watch,
                registry: Arc::clone(&self.active),
                registered: true,
                state: SubscriptionState::Active,
            }),
            Err(error) => {
                let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
                active.remove(&path);
                Err(error)
            }
        }
    }

    /// Asynchronously replaces the value at `path`. Resolves only on a
    /// confirmed write; a failure leaves the previously confirmed remote
    /// value unchanged.
    pub async fn publish(&self, path: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.store.put(path, value).await
    }

    /// Deletes the value at `path`; subscribers observe "absent" and
    /// therefore their default.
    pub async fn clear(&self, path: &KeyPath) -> Result<(), StoreError> {
        self.store.delete(path).await
    }
}

/// One active observation: `Active` until a read failure (delivered once
/// as `Err`) or cancellation, both terminal. Resuming requires a fresh
/// `subscribe` call; there is no automatic reconnection.
#[derive(Debug)]
pub struct ValueSubscription {
    default: Value,
    watch: WatchHandle,
    registry: Arc<Mutex<HashSet<KeyPath>>>,
    registered: bool,
    state: SubscriptionState,
}

impl ValueSubscription {
    pub fn path(&self) -> &KeyPath {
        self.watch.path()
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Next observed value, with the default substituted for absence.
    /// Yields `None` once the subscription is no longer `Active`.
    pub async fn next(&mut self) -> Option<Result<Value, StoreError>> {
        if self.state != SubscriptionState::Active {
            return None;
        }
        match self.watch.next().await {
            Some(WatchEvent::Snapshot(value)) => {
                Some(Ok(value.unwrap_or_else(|| self.default.clone())))
            }
            Some(WatchEvent::Lost(error)) => {
                self.state = SubscriptionState::Failed;
                self.release();
                Some(Err(error))
            }
            None => {
                let error =
                    StoreError::read(self.watch.path().as_str(), "subscription ended unexpectedly");
                self.state = SubscriptionState::Failed;
                self.release();
                Some(Err(error))
            }
        }
    }

    /// Immediate and idempotent; buffered updates are discarded.
    pub fn cancel(&mut self) {
        if self.state == SubscriptionState::Cancelled {
            return;
        }
        self.watch.cancel();
        self.release();
        self.state = SubscriptionState::Cancelled;
    }

    fn release(&mut self) {
        if self.registered {
            self.registered = false;
            let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(self.watch.path());
        }
    }
}

impl Drop for ValueSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
