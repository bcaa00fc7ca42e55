use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ApiError, paths::KeyPath};

/// Frames a client sends over the `/ws` subscription socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { path: KeyPath },
    Unsubscribe { path: KeyPath },
}

/// Frames the server pushes back.
///
/// The first `Update` after a subscribe carries the current snapshot;
/// every later one reflects a write that overlapped the subscribed path.
/// `value: None` (JSON `null`) means the path is absent, which is a valid
/// state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Update {
        path: KeyPath,
        value: Option<Value>,
    },
    SubscriptionError {
        path: KeyPath,
        error: ApiError,
    },
}
