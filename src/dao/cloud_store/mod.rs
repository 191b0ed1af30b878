pub mod couchdb;
pub mod memory;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::game::{GameCode, GameRecord, Scoreboard};

/// Remote document holding the full payload of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDocument {
    /// Game code the document is keyed by.
    pub code: GameCode,
    /// Full game payload.
    pub scoreboard: Scoreboard,
    /// Creation time of the game (ms since epoch).
    pub created_at: i64,
    /// Timestamp of the write that produced this document.
    pub last_update: i64,
}

impl CloudDocument {
    /// Snapshot a local record for pushing.
    pub fn from_record(record: &GameRecord) -> Self {
        Self {
            code: record.code.clone(),
            scoreboard: record.scoreboard.clone(),
            created_at: record.created_at,
            last_update: record.last_modified,
        }
    }
}

/// Positive acknowledgment of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushAck {
    /// `lastUpdate` now stored remotely.
    pub last_update: i64,
}

/// Convenient result alias returning [`CloudError`] failures.
pub type CloudResult<T> = Result<T, CloudError>;

/// Failures of the cloud store, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// No response within the allotted time.
    #[error("cloud request timed out")]
    Timeout,
    /// Network failure or transient server error.
    #[error("cloud store unavailable: {0}")]
    Unavailable(String),
    /// Authentication or authorisation was refused.
    #[error("cloud store refused access: {0}")]
    PermissionDenied(String),
    /// The document or request was rejected as malformed.
    #[error("malformed cloud document: {0}")]
    Malformed(String),
    /// The remote document is newer than the pushed one.
    #[error("remote document is newer (lastUpdate {remote_last_update})")]
    Stale {
        /// `lastUpdate` of the remote document.
        remote_last_update: i64,
    },
}

impl CloudError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Timeout | CloudError::Unavailable(_))
    }
}

/// Callback receiving the remote document (or its absence) on every change.
pub type ChangeListener = Arc<dyn Fn(Option<CloudDocument>) + Send + Sync>;

/// Read/write/subscribe façade over the remote document database.
///
/// Implementations never retry; that is left to the sync orchestrator.
pub trait CloudStore: Send + Sync {
    /// Upsert the full document.
    fn push(&self, document: CloudDocument) -> BoxFuture<'static, CloudResult<PushAck>>;
    /// Fetch the document for `code`, if it exists.
    fn pull(&self, code: GameCode) -> BoxFuture<'static, CloudResult<Option<CloudDocument>>>;
    /// Deliver the current document, then every change, until unsubscribed.
    fn subscribe(&self, code: GameCode, listener: ChangeListener) -> Subscription;
    /// Cheap request proving the store is reachable.
    fn health_check(&self) -> BoxFuture<'static, CloudResult<()>>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Open/closed flag shared by a subscription and its delivery path.
///
/// Deliveries hold the read side while the listener runs; closing takes the
/// write side, so it waits for any delivery already in progress.
#[derive(Clone)]
pub struct DeliveryGate {
    open: Arc<RwLock<bool>>,
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self {
            open: Arc::new(RwLock::new(true)),
        }
    }
}

impl DeliveryGate {
    /// A gate that lets deliveries through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether deliveries still go through.
    pub fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke `listener` only while the gate is open.
    pub fn deliver(&self, listener: &ChangeListener, document: Option<CloudDocument>) {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if *open {
            listener(document);
        }
    }

    /// Close the gate, returning whether it was open.
    fn close(&self) -> bool {
        let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *open, false)
    }
}

/// Handle returned by [`CloudStore::subscribe`].
///
/// Once [`Subscription::unsubscribe`] returns, no listener call is running and
/// none will start; further calls are no-ops. Dropping the handle unsubscribes.
/// Listeners must not unsubscribe their own subscription.
pub struct Subscription {
    gate: DeliveryGate,
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    /// Wrap a delivery gate and the backend-specific teardown.
    pub fn new(gate: DeliveryGate, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            gate,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop delivery. Only the first call runs the teardown.
    pub fn unsubscribe(&self) {
        if !self.gate.close() {
            return;
        }
        let cancel = self.cancel.lock().ok().and_then(|mut slot| slot.take());
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether the subscription still delivers changes.
    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
