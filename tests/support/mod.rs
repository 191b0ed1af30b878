#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use courtside_sync::{
    config::AppConfig,
    dao::{
        cloud_store::{
            ChangeListener, CloudDocument, CloudError, CloudResult, CloudStore, PushAck,
            Subscription, memory::MemoryCloudStore,
        },
        kv::{MemoryStore, save_json},
    },
    services::{
        action_queue::{QUEUE_KEY, QueuedAction},
        library_service::LIBRARY_KEY,
        settings_service::AppSettings,
    },
    state::{
        AppState, SharedState,
        game::{GameCode, GameLibrary, GameRecord, RuleSet, Scoreboard, TeamState},
    },
};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

/// Poll `$cond` until it holds, failing the test after a few seconds.
macro_rules! eventually {
    ($what:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                $what
            );
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}

/// Fake cloud store over [`MemoryCloudStore`] with scripted push failures and
/// an optional gate holding every push until released.
pub struct ScriptedCloud {
    remote: MemoryCloudStore,
    failures: Mutex<VecDeque<CloudError>>,
    gate: Option<Arc<Semaphore>>,
    push_started: Notify,
    pushes: AtomicUsize,
}

impl ScriptedCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Pushes wait for [`ScriptedCloud::release_push`] before reaching the store.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Arc::new(Semaphore::new(0)))))
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            remote: MemoryCloudStore::new(),
            failures: Mutex::new(VecDeque::new()),
            gate,
            push_started: Notify::new(),
            pushes: AtomicUsize::new(0),
        }
    }

    /// Fail the next push with `err`.
    pub fn fail_next(&self, err: CloudError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Let one gated push through.
    pub fn release_push(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Wait until a push has been issued.
    pub async fn push_started(&self) {
        self.push_started.notified().await;
    }

    /// Number of pushes issued so far.
    pub fn push_attempts(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Backing store, used to act as another device.
    pub fn remote(&self) -> &MemoryCloudStore {
        &self.remote
    }
}

impl CloudStore for ScriptedCloud {
    fn push(&self, document: CloudDocument) -> BoxFuture<'static, CloudResult<PushAck>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.push_started.notify_one();
        let failure = self.failures.lock().unwrap().pop_front();
        let gate = self.gate.clone();
        let remote = self.remote.clone();

        Box::pin(async move {
            if let Some(gate) = gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            match failure {
                Some(err) => Err(err),
                None => remote.push(document).await,
            }
        })
    }

    fn pull(&self, code: GameCode) -> BoxFuture<'static, CloudResult<Option<CloudDocument>>> {
        self.remote.pull(code)
    }

    fn subscribe(&self, code: GameCode, listener: ChangeListener) -> Subscription {
        self.remote.subscribe(code, listener)
    }

    fn health_check(&self) -> BoxFuture<'static, CloudResult<()>> {
        self.remote.health_check()
    }
}

/// Fast timings so retries and sweeps happen within a test.
pub fn test_config() -> AppConfig {
    AppConfig {
        library_capacity: 5,
        sweep_interval: Duration::from_millis(50),
        network_timeout: Duration::from_secs(2),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(40),
        backoff_jitter: Duration::ZERO,
        max_push_attempts: 3,
        ..AppConfig::default()
    }
}

pub fn code(raw: &str) -> GameCode {
    GameCode::parse(raw).unwrap()
}

pub fn board() -> Scoreboard {
    Scoreboard::new(
        TeamState::new("Hawks", "#aa0000", 0),
        TeamState::new("Owls", "#0000aa", 0),
        RuleSet::default(),
    )
}

/// Unsynced record stamped `last_modified`, with team A at `home_score`.
pub fn record(code: &GameCode, last_modified: i64, home_score: u32) -> GameRecord {
    let mut scoreboard = board();
    scoreboard.home.score = home_score;
    GameRecord {
        code: code.clone(),
        scoreboard,
        created_at: last_modified,
        last_modified,
        synced: false,
        cloud_id: None,
        synced_from: None,
    }
}

/// Remote copy of `code` stamped `last_update`, with team A at `home_score`.
pub fn document(code: &GameCode, last_update: i64, home_score: u32) -> CloudDocument {
    CloudDocument::from_record(&record(code, last_update, home_score))
}

pub fn queued(code: &GameCode, enqueued_at: i64) -> QueuedAction {
    QueuedAction {
        id: Uuid::new_v4(),
        code: code.clone(),
        action: serde_json::json!({ "type": "score", "team": "A", "delta": 1 }),
        enqueued_at,
        attempts: 0,
    }
}

/// Storage already holding `records` (the first one active) and `actions`.
pub fn seeded_storage(records: Vec<GameRecord>, actions: Vec<QueuedAction>) -> Arc<MemoryStore> {
    let storage = MemoryStore::new();
    let library = GameLibrary {
        active_game_id: records.first().map(|record| record.code.clone()),
        games: records,
    };
    save_json(&storage, LIBRARY_KEY, &library).unwrap();

    let mut pending: IndexMap<GameCode, VecDeque<QueuedAction>> = IndexMap::new();
    for action in actions {
        pending
            .entry(action.code.clone())
            .or_default()
            .push_back(action);
    }
    save_json(&storage, QUEUE_KEY, &pending).unwrap();
    Arc::new(storage)
}

pub fn app(config: AppConfig, storage: Arc<MemoryStore>, cloud: Arc<ScriptedCloud>) -> SharedState {
    AppState::new(config, storage, cloud)
}

pub async fn set_auto_sync(state: &SharedState, enabled: bool) {
    state
        .settings()
        .update(AppSettings {
            auto_sync: enabled,
            ..AppSettings::default()
        })
        .await;
}
