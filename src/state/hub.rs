use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{
    services::sync_service::SyncStatus,
    state::{
        game::{GameCode, GameRecord},
        transitions::Signal,
    },
};

/// Where an accepted mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// Applied on this device through a transition.
    Local,
    /// Adopted from the cloud store.
    Remote,
}

/// Notification fanned out to the subscribers of one game.
#[derive(Debug, Clone)]
pub enum GameUpdate {
    /// The record was replaced by an accepted local or remote mutation.
    Changed {
        /// New record.
        record: GameRecord,
        /// Source of the mutation.
        origin: UpdateOrigin,
        /// Signals raised by the transition, if any.
        signals: Vec<Signal>,
    },
    /// The sync status changed.
    Sync(SyncStatus),
    /// The game left the local library.
    Removed,
}

/// Per-game broadcast hub backing the collaborator `subscribe` operation.
pub struct GameHub {
    capacity: usize,
    channels: DashMap<GameCode, broadcast::Sender<GameUpdate>>,
}

impl GameHub {
    /// Construct a hub whose per-game channels hold `capacity` pending updates.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Register a new subscriber that will receive subsequent updates for `code`.
    pub fn subscribe(&self, code: &GameCode) -> broadcast::Receiver<GameUpdate> {
        self.channels
            .entry(code.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an update to the current subscribers of `code`, ignoring delivery errors.
    pub fn publish(&self, code: &GameCode, update: GameUpdate) {
        if let Some(sender) = self.channels.get(code) {
            let _ = sender.send(update);
        }
    }

    /// Announce the removal of `code` and drop its channel so receivers close.
    pub fn close(&self, code: &GameCode) {
        if let Some((_, sender)) = self.channels.remove(code) {
            let _ = sender.send(GameUpdate::Removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn close_notifies_then_ends_the_stream() {
        let hub = GameHub::new(4);
        let code = GameCode::parse("AB12C3").unwrap();
        let mut receiver = hub.subscribe(&code);

        hub.close(&code);

        assert!(matches!(receiver.recv().await, Ok(GameUpdate::Removed)));
        assert!(matches!(receiver.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = GameHub::new(4);
        let code = GameCode::parse("LOCAL-AB12C3").unwrap();
        hub.publish(&code, GameUpdate::Removed);
        assert!(hub.channels.is_empty());
    }
}
