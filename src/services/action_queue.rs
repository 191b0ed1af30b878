//! Offline action queue: durable, per-game FIFO of mutations the cloud has
//! not acknowledged yet.

use std::{collections::VecDeque, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::kv::{KeyValueStore, load_json_or_quarantine, save_json},
    state::game::GameCode,
};

/// Storage key of the serialized queue.
pub const QUEUE_KEY: &str = "action_queue";

/// Envelope around one unacknowledged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// Unique id of the envelope.
    pub id: Uuid,
    /// Game the action targets.
    pub code: GameCode,
    /// Opaque mutation payload.
    pub action: Value,
    /// `lastModified` of the game right after the mutation.
    pub enqueued_at: i64,
    /// Push attempts that carried this action.
    pub attempts: u32,
}

type Pending = IndexMap<GameCode, VecDeque<QueuedAction>>;

/// Durable per-game action queue.
pub struct ActionQueue {
    storage: Arc<dyn KeyValueStore>,
    pending: RwLock<Pending>,
}

impl ActionQueue {
    /// Restore the queue persisted in `storage`.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let pending = match load_json_or_quarantine::<Pending>(storage.as_ref(), QUEUE_KEY) {
            Ok(Some(pending)) => {
                let total: usize = pending.values().map(VecDeque::len).sum();
                info!(games = pending.len(), actions = total, "restored offline action queue");
                pending
            }
            Ok(None) => Pending::new(),
            Err(err) => {
                warn!(error = %err, "failed to restore offline action queue; starting empty");
                Pending::new()
            }
        };

        Self {
            storage,
            pending: RwLock::new(pending),
        }
    }

    fn persist(&self, pending: &Pending) {
        if let Err(err) = save_json(self.storage.as_ref(), QUEUE_KEY, pending) {
            warn!(error = %err, "failed to persist offline action queue");
        }
    }

    /// Append an action for `code`. Never drops it.
    pub async fn enqueue(&self, code: &GameCode, action: Value, enqueued_at: i64) -> QueuedAction {
        let queued = QueuedAction {
            id: Uuid::new_v4(),
            code: code.clone(),
            action,
            enqueued_at,
            attempts: 0,
        };

        let mut pending = self.pending.write().await;
        pending
            .entry(code.clone())
            .or_default()
            .push_back(queued.clone());
        self.persist(&pending);
        queued
    }

    /// Pending actions of `code`, oldest first.
    pub async fn peek_all(&self, code: &GameCode) -> Vec<QueuedAction> {
        self.pending
            .read()
            .await
            .get(code)
            .map(|actions| actions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of pending actions for `code`.
    pub async fn len(&self, code: &GameCode) -> usize {
        self.pending.read().await.get(code).map_or(0, VecDeque::len)
    }

    /// Number of pending actions of `code` already reflected in a snapshot stamped `at`.
    pub async fn count_through(&self, code: &GameCode, at: i64) -> usize {
        self.pending.read().await.get(code).map_or(0, |actions| {
            actions
                .iter()
                .take_while(|action| action.enqueued_at <= at)
                .count()
        })
    }

    /// Games that still have pending actions.
    pub async fn codes_with_pending(&self) -> Vec<GameCode> {
        self.pending
            .read()
            .await
            .iter()
            .filter(|(_, actions)| !actions.is_empty())
            .map(|(code, _)| code.clone())
            .collect()
    }

    /// Remove the `count` oldest actions of `code`; returns how many were removed.
    pub async fn settle(&self, code: &GameCode, count: usize) -> usize {
        self.drain_front(code, |removed, _| removed < count).await
    }

    /// Settle up to `count` oldest actions of `code`, but only those already
    /// reflected in the acknowledged snapshot stamped `pushed_at`.
    pub async fn settle_acknowledged(&self, code: &GameCode, count: usize, pushed_at: i64) -> usize {
        self.drain_front(code, |removed, action| {
            removed < count && action.enqueued_at <= pushed_at
        })
        .await
    }

    /// Drop the leading actions of `code` enqueued before `timestamp`.
    pub async fn discard_before(&self, code: &GameCode, timestamp: i64) -> usize {
        self.drain_front(code, |_, action| action.enqueued_at < timestamp)
            .await
    }

    /// Drop every action of `code`.
    pub async fn clear(&self, code: &GameCode) -> usize {
        let mut pending = self.pending.write().await;
        let removed = pending
            .shift_remove(code)
            .map_or(0, |actions| actions.len());
        if removed > 0 {
            self.persist(&pending);
        }
        removed
    }

    /// Count one more push attempt for every pending action of `code`.
    pub async fn record_attempt(&self, code: &GameCode) {
        let mut pending = self.pending.write().await;
        let Some(actions) = pending.get_mut(code) else {
            return;
        };
        for action in actions.iter_mut() {
            action.attempts = action.attempts.saturating_add(1);
        }
        self.persist(&pending);
    }

    async fn drain_front<F>(&self, code: &GameCode, mut keep_going: F) -> usize
    where
        F: FnMut(usize, &QueuedAction) -> bool,
    {
        let mut pending = self.pending.write().await;
        let Some(actions) = pending.get_mut(code) else {
            return 0;
        };

        let mut removed = 0;
        while let Some(front) = actions.front() {
            if !keep_going(removed, front) {
                break;
            }
            actions.pop_front();
            removed += 1;
        }
        if actions.is_empty() {
            pending.shift_remove(code);
        }
        if removed > 0 {
            debug!(code = %code, removed, "removed queued actions");
            self.persist(&pending);
        }
        removed
    }
}
