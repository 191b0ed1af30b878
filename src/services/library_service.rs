//! Local Store: owns the on-device game library, its capacity policy and
//! every read-modify-write applied to a game.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    dao::{
        cloud_store::CloudDocument,
        kv::{KeyValueStore, load_json_or_quarantine, save_json},
    },
    state::{
        game::{CodeKind, GameCode, GameLibrary, GameRecord, Scoreboard, timestamp_now},
        transitions::{self, Signal, Transition, TransitionError},
    },
};

/// Storage key of the serialized [`GameLibrary`].
pub const LIBRARY_KEY: &str = "games_library";

/// Failures of library operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No game with this code in the library.
    #[error("game `{0}` is not in the local library")]
    NotFound(GameCode),
    /// The transition rejected its arguments.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Whether the library currently reaches durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// The last write reached storage.
    Durable,
    /// The last write failed; the in-memory copy is authoritative until a write succeeds.
    MemoryOnly,
}

/// Result of [`LocalStore::create`].
#[derive(Debug, Clone)]
pub struct CreatedGame {
    /// Newly created record, now active.
    pub record: GameRecord,
    /// Records evicted to stay within capacity.
    pub evicted: Vec<GameRecord>,
    /// Persistence mode after the insert.
    pub persistence: Persistence,
}

struct Library {
    games: GameLibrary,
    last_issued: i64,
    persistence: Persistence,
}

impl Library {
    /// Next mutation timestamp: wall clock, but strictly above anything issued before.
    fn next_timestamp(&mut self, previous: i64) -> i64 {
        let next = timestamp_now()
            .max(self.last_issued.saturating_add(1))
            .max(previous.saturating_add(1));
        self.last_issued = next;
        next
    }

    fn record_mut(&mut self, code: &GameCode) -> Result<&mut GameRecord, StoreError> {
        self.games
            .find_mut(code)
            .ok_or_else(|| StoreError::NotFound(code.clone()))
    }

    fn fresh_code(&self, kind: CodeKind) -> GameCode {
        loop {
            let code = GameCode::generate(kind);
            if self.games.find(&code).is_none() {
                return code;
            }
        }
    }

    /// Evict until back at `capacity`, never touching `keep`.
    fn evict(&mut self, capacity: usize, keep: &GameCode) -> Vec<GameRecord> {
        let mut evicted = Vec::new();
        while self.games.games.len() > capacity {
            let victim = self
                .games
                .games
                .iter()
                .enumerate()
                .filter(|(_, game)| &game.code != keep)
                .min_by_key(|(_, game)| (!game.synced, game.last_modified))
                .map(|(index, _)| index);
            let Some(index) = victim else { break };

            let record = self.games.games.remove(index);
            if record.synced {
                info!(code = %record.code, "evicted synced game to stay within capacity");
            } else {
                warn!(
                    code = %record.code,
                    "every stored game is unsynced; evicting the least recently modified one"
                );
            }
            if self.games.active_game_id.as_ref() == Some(&record.code) {
                self.games.active_game_id = None;
            }
            evicted.push(record);
        }
        evicted
    }
}

/// Durable, capacity-bounded library of games.
pub struct LocalStore {
    storage: Arc<dyn KeyValueStore>,
    capacity: usize,
    inner: RwLock<Library>,
}

impl LocalStore {
    /// Load the library from `storage`. Unreadable data is moved aside and an
    /// empty library takes its place.
    pub fn open(storage: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        let (games, persistence) = match load_json_or_quarantine::<GameLibrary>(
            storage.as_ref(),
            LIBRARY_KEY,
        ) {
            Ok(Some(games)) => {
                info!(count = games.games.len(), "loaded local game library");
                (games, Persistence::Durable)
            }
            Ok(None) => (GameLibrary::default(), Persistence::Durable),
            Err(err) => {
                warn!(error = %err, "failed to load local game library; starting empty");
                (GameLibrary::default(), Persistence::MemoryOnly)
            }
        };
        let last_issued = games
            .games
            .iter()
            .map(|game| game.last_modified)
            .max()
            .unwrap_or(0);

        Self {
            storage,
            capacity: capacity.max(1),
            inner: RwLock::new(Library {
                games,
                last_issued,
                persistence,
            }),
        }
    }

    fn persist(&self, library: &mut Library) -> Persistence {
        library.persistence = match save_json(self.storage.as_ref(), LIBRARY_KEY, &library.games)
        {
            Ok(()) => Persistence::Durable,
            Err(err) => {
                warn!(error = %err, "failed to persist game library; keeping it in memory");
                Persistence::MemoryOnly
            }
        };
        library.persistence
    }

    /// Maximum number of stored games.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current persistence mode.
    pub async fn persistence(&self) -> Persistence {
        self.inner.read().await.persistence
    }

    /// Insert a new game under a fresh code, make it active and enforce capacity.
    pub async fn create(&self, scoreboard: Scoreboard, kind: CodeKind) -> CreatedGame {
        let mut library = self.inner.write().await;
        let code = library.fresh_code(kind);
        let now = library.next_timestamp(0);
        let record = GameRecord {
            code: code.clone(),
            scoreboard,
            created_at: now,
            last_modified: now,
            synced: false,
            cloud_id: None,
            synced_from: None,
        };

        library.games.games.push(record.clone());
        library.games.active_game_id = Some(code.clone());
        let evicted = library.evict(self.capacity, &code);
        let persistence = self.persist(&mut library);
        debug!(code = %code, evicted = evicted.len(), "created game");

        CreatedGame {
            record,
            evicted,
            persistence,
        }
    }

    /// Read one game.
    pub async fn get(&self, code: &GameCode) -> Option<GameRecord> {
        self.inner.read().await.games.find(code).cloned()
    }

    /// Every game, in library order.
    pub async fn list(&self) -> Vec<GameRecord> {
        self.inner.read().await.games.games.clone()
    }

    /// Replace the payload of `code`, bump `lastModified` and clear `synced`.
    ///
    /// Finished games and out-of-range clocks are rejected without mutation.
    pub async fn update(
        &self,
        code: &GameCode,
        scoreboard: Scoreboard,
    ) -> Result<GameRecord, StoreError> {
        let mut library = self.inner.write().await;
        let current = library.record_mut(code)?;
        let scoreboard = transitions::replace(&current.scoreboard, scoreboard)?;
        let previous = current.last_modified;
        let now = library.next_timestamp(previous);
        let record = library.record_mut(code)?;
        record.scoreboard = scoreboard;
        record.last_modified = now;
        record.synced = false;
        let record = record.clone();
        self.persist(&mut library);
        Ok(record)
    }

    /// Apply `transition` to `code` atomically; a rejected transition leaves the game untouched.
    pub async fn apply_transition(
        &self,
        code: &GameCode,
        transition: &Transition,
    ) -> Result<(GameRecord, Vec<Signal>), StoreError> {
        let mut library = self.inner.write().await;
        let current = library.record_mut(code)?;
        let outcome = transition.apply(&current.scoreboard)?;
        let previous = current.last_modified;

        let now = library.next_timestamp(previous);
        let record = library.record_mut(code)?;
        record.scoreboard = outcome.scoreboard;
        record.last_modified = now;
        record.synced = false;
        let record = record.clone();
        self.persist(&mut library);
        Ok((record, outcome.signals))
    }

    /// Delete `code`, clearing the active pointer if it pointed there.
    pub async fn remove(&self, code: &GameCode) -> Option<GameRecord> {
        let mut library = self.inner.write().await;
        let index = library.games.position(code)?;
        let record = library.games.games.remove(index);
        if library.games.active_game_id.as_ref() == Some(code) {
            library.games.active_game_id = None;
        }
        self.persist(&mut library);
        Some(record)
    }

    /// Point the console at `code`.
    pub async fn set_active(&self, code: &GameCode) -> Result<(), StoreError> {
        let mut library = self.inner.write().await;
        if library.games.find(code).is_none() {
            return Err(StoreError::NotFound(code.clone()));
        }
        library.games.active_game_id = Some(code.clone());
        self.persist(&mut library);
        Ok(())
    }

    /// Game the console currently shows.
    pub async fn get_active(&self) -> Option<GameRecord> {
        let library = self.inner.read().await;
        let code = library.games.active_game_id.as_ref()?;
        library.games.find(code).cloned()
    }

    /// Record a cloud acknowledgment of the payload stamped `pushed_at`.
    ///
    /// The game only counts as synced when no mutation happened since that
    /// snapshot. Returns `None` when the game left the library meanwhile.
    pub async fn mark_synced(
        &self,
        code: &GameCode,
        pushed_at: i64,
        remote_last_update: i64,
    ) -> Option<GameRecord> {
        let mut library = self.inner.write().await;
        let record = library.games.find_mut(code)?;
        record.synced = record.last_modified == pushed_at;
        record.synced_from = Some(
            record
                .synced_from
                .map_or(remote_last_update, |known| known.max(remote_last_update)),
        );
        record.cloud_id = Some(code.clone());
        let record = record.clone();
        self.persist(&mut library);
        Some(record)
    }

    /// Replace the local payload with `document` when the remote copy is newer.
    ///
    /// Returns `Ok(None)` when a local mutation made the local copy at least as new.
    pub async fn adopt_remote(
        &self,
        document: &CloudDocument,
    ) -> Result<Option<GameRecord>, StoreError> {
        let mut library = self.inner.write().await;
        let record = library.record_mut(&document.code)?;
        if record.last_modified >= document.last_update {
            return Ok(None);
        }
        let record = Self::overwrite(&mut library, document)?;
        self.persist(&mut library);
        Ok(Some(record))
    }

    /// Replace the local payload with `document` regardless of timestamps.
    pub async fn replace_with_remote(
        &self,
        document: &CloudDocument,
    ) -> Result<GameRecord, StoreError> {
        let mut library = self.inner.write().await;
        let record = Self::overwrite(&mut library, document)?;
        self.persist(&mut library);
        Ok(record)
    }

    fn overwrite(library: &mut Library, document: &CloudDocument) -> Result<GameRecord, StoreError> {
        library.last_issued = library.last_issued.max(document.last_update);
        let record = library.record_mut(&document.code)?;
        record.scoreboard = document.scoreboard.clone();
        record.last_modified = document.last_update;
        record.synced = true;
        record.synced_from = Some(document.last_update);
        record.cloud_id = Some(document.code.clone());
        Ok(record.clone())
    }

    /// Make the local copy supersede a remote copy stamped `remote_last_update`.
    ///
    /// The sync base moves to the remote timestamp and `lastModified` is bumped
    /// above it when needed, so the next push never regresses the remote.
    pub async fn rebase(
        &self,
        code: &GameCode,
        remote_last_update: i64,
    ) -> Result<GameRecord, StoreError> {
        let mut library = self.inner.write().await;
        let previous = library.record_mut(code)?.last_modified;
        let bumped = if previous <= remote_last_update {
            Some(library.next_timestamp(remote_last_update))
        } else {
            None
        };

        let record = library.record_mut(code)?;
        record.synced_from = Some(remote_last_update);
        if let Some(stamp) = bumped {
            record.last_modified = stamp;
            record.synced = false;
        }
        let record = record.clone();
        self.persist(&mut library);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{
            kv::{FileStore, MemoryStore},
            storage::{StorageError, StorageResult},
        },
        state::game::{RuleSet, Side, TeamState},
    };

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn load(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }

        fn save(&self, key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::unavailable(
                format!("quota exceeded writing {key}"),
                std::io::Error::other("quota"),
            ))
        }

        fn quarantine(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }
    }

    fn board() -> Scoreboard {
        Scoreboard::new(
            TeamState::new("Hawks", "#aa0000", 0),
            TeamState::new("Owls", "#0000aa", 0),
            RuleSet::default(),
        )
    }

    fn score(delta: i32) -> Transition {
        Transition::Score {
            team: Side::A,
            delta,
        }
    }

    #[tokio::test]
    async fn create_activates_and_persists() {
        let storage = Arc::new(MemoryStore::new());
        let store = LocalStore::open(storage.clone(), 5);

        let created = store.create(board(), CodeKind::Local).await;
        assert_eq!(created.persistence, Persistence::Durable);
        assert!(created.evicted.is_empty());
        assert_eq!(created.record.code.kind(), CodeKind::Local);
        assert!(!created.record.synced);

        let reopened = LocalStore::open(storage, 5);
        assert_eq!(reopened.get_active().await, Some(created.record));
    }

    #[tokio::test]
    async fn every_mutation_strictly_increases_last_modified() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 5);
        let code = store.create(board(), CodeKind::Cloud).await.record.code;

        let mut previous = store.get(&code).await.unwrap().last_modified;
        for _ in 0..20 {
            let (record, _) = store.apply_transition(&code, &score(1)).await.unwrap();
            assert!(record.last_modified > previous);
            previous = record.last_modified;
        }
    }

    #[tokio::test]
    async fn rejected_transition_changes_nothing() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 5);
        let code = store.create(board(), CodeKind::Local).await.record.code;
        let before = store.get(&code).await.unwrap();

        let err = store
            .apply_transition(&code, &Transition::AdvancePeriod { next: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(TransitionError::InvalidPeriod(0))));
        assert_eq!(store.get(&code).await.unwrap(), before);
    }

    #[tokio::test]
    async fn storage_failure_falls_back_to_memory() {
        let store = LocalStore::open(Arc::new(BrokenStore), 5);
        let created = store.create(board(), CodeKind::Local).await;

        assert_eq!(created.persistence, Persistence::MemoryOnly);
        let (record, _) = store
            .apply_transition(&created.record.code, &score(3))
            .await
            .unwrap();
        assert_eq!(record.scoreboard.home.score, 3);
        assert_eq!(store.get(&created.record.code).await.unwrap(), record);
    }

    #[tokio::test]
    async fn eviction_prefers_synced_then_oldest() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 3);
        let first = store.create(board(), CodeKind::Local).await.record;
        let second = store.create(board(), CodeKind::Local).await.record;
        let third = store.create(board(), CodeKind::Local).await.record;
        store
            .mark_synced(&third.code, third.last_modified, third.last_modified)
            .await
            .unwrap();

        let created = store.create(board(), CodeKind::Local).await;
        assert_eq!(created.evicted.len(), 1);
        assert_eq!(created.evicted[0].code, third.code);

        let created = store.create(board(), CodeKind::Local).await;
        assert_eq!(created.evicted[0].code, first.code);
        assert_eq!(store.list().await.len(), 3);
        assert!(store.get(&second.code).await.is_some());
    }

    #[tokio::test]
    async fn library_never_exceeds_capacity() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 4);
        for round in 0..30 {
            let created = store.create(board(), CodeKind::Cloud).await;
            if round % 3 == 0 {
                let record = &created.record;
                store
                    .mark_synced(&record.code, record.last_modified, record.last_modified)
                    .await;
            }
            let games = store.list().await;
            assert!(games.len() <= 4);
            if created.evicted.iter().any(|game| !game.synced) {
                assert!(games.iter().all(|game| !game.synced || game.code == created.record.code));
            }
            assert!(games.iter().any(|game| game.code == created.record.code));
        }
    }

    #[tokio::test]
    async fn mark_synced_ignores_stale_snapshots_and_removed_games() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 5);
        let record = store.create(board(), CodeKind::Local).await.record;
        let pushed_at = record.last_modified;
        store.apply_transition(&record.code, &score(2)).await.unwrap();

        let after = store
            .mark_synced(&record.code, pushed_at, pushed_at)
            .await
            .unwrap();
        assert!(!after.synced);
        assert_eq!(after.synced_from, Some(pushed_at));

        store.remove(&record.code).await.unwrap();
        assert!(store.mark_synced(&record.code, pushed_at, pushed_at).await.is_none());
        assert!(store.get_active().await.is_none());
    }

    #[tokio::test]
    async fn rebase_lifts_last_modified_above_remote() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 5);
        let record = store.create(board(), CodeKind::Local).await.record;
        let remote = record.last_modified + 10_000;

        let rebased = store.rebase(&record.code, remote).await.unwrap();
        assert!(rebased.last_modified > remote);
        assert_eq!(rebased.synced_from, Some(remote));

        let (next, _) = store.apply_transition(&record.code, &score(1)).await.unwrap();
        assert!(next.last_modified > rebased.last_modified);
    }

    #[tokio::test]
    async fn update_replaces_payload_and_clears_synced() {
        let store = LocalStore::open(Arc::new(MemoryStore::new()), 5);
        let record = store.create(board(), CodeKind::Local).await.record;
        store
            .mark_synced(&record.code, record.last_modified, record.last_modified)
            .await
            .unwrap();

        let mut corrected = board();
        corrected.away.score = 17;
        let updated = store.update(&record.code, corrected.clone()).await.unwrap();
        assert_eq!(updated.scoreboard, corrected);
        assert!(updated.last_modified > record.last_modified);
        assert!(!updated.synced);

        let mut reopened = updated.scoreboard.clone();
        reopened.clock.period = 0;
        assert!(matches!(
            store.update(&record.code, reopened).await,
            Err(StoreError::Transition(TransitionError::InvalidPeriod(0)))
        ));
        assert_eq!(store.get(&record.code).await.unwrap(), updated);

        let missing = GameCode::parse("ZZ99ZZ").unwrap();
        assert!(matches!(
            store.update(&missing, board()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_library_is_kept_aside_and_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStore::open(dir.path()).unwrap());
        storage.save(LIBRARY_KEY, r#"{"games": [{"code": "#).unwrap();

        let store = LocalStore::open(storage.clone(), 5);
        assert!(store.list().await.is_empty());
        store.create(board(), CodeKind::Local).await;

        let reopened = LocalStore::open(storage, 5);
        assert_eq!(reopened.list().await.len(), 1);
        assert_eq!(reopened.persistence().await, Persistence::Durable);

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("games_library.corrupt-"))
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&backups[0]).unwrap(),
            r#"{"games": [{"code": "#
        );
    }
}
