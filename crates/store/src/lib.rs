use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{error::StoreError, paths::KeyPath};
use tokio::{
    sync::{broadcast, mpsc, RwLock},
    task::JoinHandle,
};
use tracing::debug;

/// Capacity of the process-wide change feed. Watchers that fall further
/// behind than this coalesce to the current snapshot instead of failing.
const CHANGE_FEED_CAPACITY: usize = 256;
const WATCH_BUFFER: usize = 64;

/// The seam between consumers and the realtime tree. The in-process
/// [`Store`] and the remote client both implement it, so synchronizer
/// logic and its tests run against either.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Current value at `path`; `None` when the path is absent.
    async fn get(&self, path: &KeyPath) -> Result<Option<Value>, StoreError>;

    /// Fully replaces the value at `path`, creating parents as needed.
    /// Resolves only once the write is confirmed. Putting JSON `null`
    /// deletes the path.
    async fn put(&self, path: &KeyPath, value: Value) -> Result<(), StoreError>;

    /// Removes the value at `path`; subsequent reads and watches observe
    /// "absent".
    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError>;

    /// Starts a continuous observation of `path`. The handle yields the
    /// current snapshot first, then one snapshot per overlapping write.
    async fn watch(&self, path: &KeyPath) -> Result<WatchHandle, StoreError>;
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The value at the watched path; `None` means absent.
    Snapshot(Option<Value>),
    /// The watch was interrupted and will deliver nothing further. The
    /// caller must start a fresh watch to resume observation.
    Lost(StoreError),
}

/// A cancellable handle to an active watch.
///
/// `cancel` is immediate and idempotent; once cancelled (or after a
/// `Lost` event) the handle yields nothing, even if events were already
/// buffered. Dropping the handle cancels it.
#[derive(Debug)]
pub struct WatchHandle {
    path: KeyPath,
    events: mpsc::Receiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl WatchHandle {
    pub fn from_parts(
        path: KeyPath,
        events: mpsc::Receiver<WatchEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            path,
            events,
            task: Some(task),
            cancelled: false,
        }
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub async fn next(&mut self) -> Option<WatchEvent> {
        if self.cancelled {
            return None;
        }
        self.events.recv().await
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The in-process realtime tree: a JSON object keyed by slash paths,
/// last write wins, no transactions, no versioning. Cloning shares the
/// same tree and change feed.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    tree: RwLock<Value>,
    changes: broadcast::Sender<KeyPath>,
}

impl Store {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                tree: RwLock::new(Value::Object(Map::new())),
                changes,
            }),
        }
    }

    async fn snapshot(&self, path: &KeyPath) -> Option<Value> {
        let tree = self.inner.tree.read().await;
        read_at(&tree, path)
    }

    async fn apply_put(&self, path: &KeyPath, value: Value) {
        let mut tree = self.inner.tree.write().await;
        if value.is_null() {
            let segments: Vec<&str> = path.segments().collect();
            remove_at(&mut tree, &segments);
        } else {
            write_at(&mut tree, path, value);
        }
        // Emitted under the write lock so the feed order matches the
        // write order.
        let _ = self.inner.changes.send(path.clone());
    }

    async fn apply_delete(&self, path: &KeyPath) {
        let mut tree = self.inner.tree.write().await;
        let segments: Vec<&str> = path.segments().collect();
        remove_at(&mut tree, &segments);
        let _ = self.inner.changes.send(path.clone());
    }

    fn spawn_watcher(&self, path: KeyPath) -> WatchHandle {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let inner = Arc::clone(&self.inner);
        let watched = path.clone();
        let task = tokio::spawn(async move {
            let mut changes = inner.changes.subscribe();
            let initial = {
                let tree = inner.tree.read().await;
                read_at(&tree, &watched)
            };
            if tx.send(WatchEvent::Snapshot(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) => {
                        if !changed.overlaps(&watched) {
                            continue;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(path = %watched, skipped, "watch lagged; coalescing to current snapshot");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx
                            .send(WatchEvent::Lost(StoreError::read(
                                watched.as_str(),
                                "store shut down",
                            )))
                            .await;
                        return;
                    }
                }
                let snapshot = {
                    let tree = inner.tree.read().await;
                    read_at(&tree, &watched)
                };
                if tx.send(WatchEvent::Snapshot(snapshot)).await.is_err() {
                    return;
                }
            }
        });
        WatchHandle::from_parts(path, rx, task)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeStore for Store {
    async fn get(&self, path: &KeyPath) -> Result<Option<Value>, StoreError> {
        Ok(self.snapshot(path).await)
    }

    async fn put(&self, path: &KeyPath, value: Value) -> Result<(), StoreError> {
        self.apply_put(path, value).await;
        Ok(())
    }

    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError> {
        self.apply_delete(path).await;
        Ok(())
    }

    async fn watch(&self, path: &KeyPath) -> Result<WatchHandle, StoreError> {
        Ok(self.spawn_watcher(path.clone()))
    }
}

fn read_at(root: &Value, path: &KeyPath) -> Option<Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    Some(node.clone())
}

fn write_at(root: &mut Value, path: &KeyPath, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    let mut node = root;
    for segment in &segments[..segments.len() - 1] {
        node = ensure_object(node)
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(last) = segments.last() {
        ensure_object(node).insert((*last).to_string(), value);
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        // node was made an object just above
        _ => unreachable!(),
    }
}

/// Removes the node at `segments` and prunes ancestors that became empty
/// objects, so a fully emptied branch reads back as absent.
fn remove_at(root: &mut Value, segments: &[&str]) -> bool {
    let Value::Object(map) = root else {
        return false;
    };
    let [head, rest @ ..] = segments else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(*head).is_some();
    }
    let removed = map
        .get_mut(*head)
        .map(|child| remove_at(child, rest))
        .unwrap_or(false);
    if removed {
        let now_empty = map
            .get(*head)
            .and_then(Value::as_object)
            .map(Map::is_empty)
            .unwrap_or(false);
        if now_empty {
            map.remove(*head);
        }
    }
    removed
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
