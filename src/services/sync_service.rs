//! Sync Orchestrator: decides per game whether to push, adopt the remote copy
//! or wait; drives the per-game [`SyncStateMachine`] and the retry timers.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, Notify, mpsc},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    dao::cloud_store::{
        ChangeListener, CloudDocument, CloudError, CloudResult, CloudStore, PushAck, Subscription,
    },
    services::{
        action_queue::ActionQueue,
        backoff::Backoff,
        connectivity::Connectivity,
        library_service::{LocalStore, StoreError},
        settings_service::SettingsStore,
    },
    state::{
        game::{GameCode, GameRecord, timestamp_now},
        hub::{GameHub, GameUpdate, UpdateOrigin},
        sync_machine::{SyncEvent, SyncPhase, SyncStateMachine},
    },
};

/// Timing and retry parameters of the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
    /// Period of the sweep over games with pending actions.
    pub sweep_interval: Duration,
    /// Bound on every cloud call.
    pub network_timeout: Duration,
    /// Delay between retries.
    pub backoff: Backoff,
    /// Failed attempts after which a retryable error becomes fatal.
    pub max_push_attempts: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            network_timeout: Duration::from_secs(8),
            backoff: Backoff::new(
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::from_millis(500),
            ),
            max_push_attempts: 8,
        }
    }
}

/// Side chosen by a human to settle a stuck game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Push the local copy over the remote one.
    LocalWins,
    /// Replace the local copy with the remote one.
    RemoteWins,
}

/// Winner of a last-writer-wins comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The local copy is strictly newer.
    Local,
    /// The remote copy is strictly newer.
    Remote,
    /// Same timestamp; no automatic winner.
    Undecided,
}

/// Last-writer-wins by timestamp. The winner is taken whole, never merged field by field.
pub fn resolve_conflict(local_last_modified: i64, remote_last_update: i64) -> Winner {
    match local_last_modified.cmp(&remote_last_update) {
        std::cmp::Ordering::Greater => Winner::Local,
        std::cmp::Ordering::Less => Winner::Remote,
        std::cmp::Ordering::Equal => Winner::Undecided,
    }
}

/// Whether `remote` changed since the local copy was last reconciled with the cloud.
fn remote_is_ahead(record: &GameRecord, remote: &CloudDocument) -> bool {
    remote.last_update > record.synced_from.unwrap_or(i64::MIN)
}

/// Why a sync attempt did not start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// The network is considered offline.
    Offline,
    /// Automatic sync is switched off in the settings.
    AutoSyncDisabled,
    /// A push for this game is already in flight.
    InFlight,
    /// Waiting for the backoff delay to elapse.
    Backoff,
    /// Halted by a conflict awaiting a manual choice.
    Conflict,
    /// Halted by a fatal error.
    Fatal(String),
}

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cloud acknowledged the push and `settled` actions left the queue.
    Pushed {
        /// Number of settled actions.
        settled: usize,
    },
    /// Nothing to push.
    UpToDate,
    /// The attempt did not start.
    Deferred(DeferReason),
    /// A retryable failure happened; another attempt is scheduled.
    RetryScheduled {
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// A newer remote copy replaced the local one.
    RemoteAdopted {
        /// Queued actions dropped with the superseded local copy.
        discarded: usize,
    },
    /// Local and remote diverged with identical timestamps.
    Conflict,
    /// The push was abandoned because a newer remote copy arrived.
    Superseded,
    /// The game left the library while the push was in flight.
    Cancelled,
}

/// Errors returned by explicit sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The game is not in the local library.
    #[error("game `{0}` is not in the local library")]
    NotFound(GameCode),
    /// The network is considered offline.
    #[error("the network is offline")]
    Offline,
    /// A push for the game is in flight.
    #[error("a push is already in flight")]
    Busy,
    /// The game waits for a manual conflict resolution.
    #[error("sync halted by a conflict; choose local or remote with a force sync")]
    Conflict,
    /// The game halted after a fatal error.
    #[error("sync halted: {0}")]
    Fatal(String),
    /// Remote-wins was requested but the cloud holds no copy.
    #[error("no cloud copy of `{0}` exists")]
    MissingRemote(GameCode),
    /// The cloud store failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(code) => SyncError::NotFound(code),
            StoreError::Transition(err) => SyncError::Fatal(err.to_string()),
        }
    }
}

/// Sync state of one game as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether pushes may currently be attempted.
    pub online: bool,
    /// Time of the last acknowledged push or adopted remote copy.
    pub last_synced_at: Option<i64>,
    /// Whether a manual choice between local and remote is required.
    pub conflict: bool,
    /// Current phase of the sync state machine.
    #[serde(flatten)]
    pub phase: SyncPhase,
    /// Milliseconds spent in the current phase.
    pub phase_age_ms: u64,
    /// Phase changes applied since the game was first tracked.
    pub transitions: usize,
    /// Pending queued actions.
    pub pending: usize,
    /// Last sync error, cleared on success.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Automatic,
    Manual,
}

fn refuse(trigger: Trigger, reason: DeferReason) -> Result<SyncOutcome, SyncError> {
    match (trigger, reason) {
        (Trigger::Automatic, reason) => Ok(SyncOutcome::Deferred(reason)),
        (Trigger::Manual, DeferReason::Offline) => Err(SyncError::Offline),
        (Trigger::Manual, DeferReason::InFlight) => Err(SyncError::Busy),
        (Trigger::Manual, DeferReason::Conflict) => Err(SyncError::Conflict),
        (Trigger::Manual, DeferReason::Fatal(reason)) => Err(SyncError::Fatal(reason)),
        (Trigger::Manual, reason) => Ok(SyncOutcome::Deferred(reason)),
    }
}

enum Reconciled {
    Unchanged,
    LocalAhead,
    InSync,
    Adopted { discarded: usize },
    Conflict,
    Blocked,
}

struct RemoteChange {
    code: GameCode,
    document: Option<CloudDocument>,
}

#[derive(Default)]
struct GameSync {
    machine: SyncStateMachine,
    attempts: u32,
    retry_at: Option<Instant>,
    last_error: Option<String>,
    last_synced_at: Option<i64>,
    remote: Option<CloudDocument>,
    in_flight: Option<Arc<Notify>>,
    subscription: Option<Subscription>,
}

impl GameSync {
    fn owns(&self, token: &Arc<Notify>) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, token))
    }

    fn interrupt(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.notify_one();
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.retry_at = None;
        self.last_error = None;
    }
}

/// Coordinates pushes, remote adoption, conflicts and retries for every game.
pub struct SyncOrchestrator {
    library: Arc<LocalStore>,
    queue: Arc<ActionQueue>,
    cloud: Arc<dyn CloudStore>,
    connectivity: Arc<Connectivity>,
    settings: Arc<SettingsStore>,
    hub: Arc<GameHub>,
    policy: SyncPolicy,
    games: DashMap<GameCode, GameSync>,
    remote_tx: mpsc::UnboundedSender<RemoteChange>,
    remote_rx: Mutex<Option<mpsc::UnboundedReceiver<RemoteChange>>>,
}

impl SyncOrchestrator {
    /// Wire the orchestrator to its collaborators.
    pub fn new(
        library: Arc<LocalStore>,
        queue: Arc<ActionQueue>,
        cloud: Arc<dyn CloudStore>,
        connectivity: Arc<Connectivity>,
        settings: Arc<SettingsStore>,
        hub: Arc<GameHub>,
        policy: SyncPolicy,
    ) -> Arc<Self> {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            library,
            queue,
            cloud,
            connectivity,
            settings,
            hub,
            policy,
            games: DashMap::new(),
            remote_tx,
            remote_rx: Mutex::new(Some(remote_rx)),
        })
    }

    /// Event loop: periodic sweep, connectivity transitions and remote changes.
    ///
    /// Only the first call runs; later calls return immediately.
    pub async fn run(self: Arc<Self>) {
        let Some(mut remote_changes) = self.remote_rx.lock().await.take() else {
            warn!("sync orchestrator is already running");
            return;
        };
        let mut connectivity = self.connectivity.subscribe();
        let mut online = connectivity.borrow_and_update().online();
        let mut sweep = time::interval(self.policy.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(online, "sync orchestrator started");

        loop {
            tokio::select! {
                _ = sweep.tick() => self.sweep().await,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = connectivity.borrow_and_update().online();
                    if now_online != online {
                        online = now_online;
                        self.publish_all_status().await;
                        if online {
                            info!("connectivity restored; draining pending actions");
                            self.sweep().await;
                        }
                    }
                }
                Some(change) = remote_changes.recv() => {
                    if let Err(err) = self.handle_remote_change(&change.code, change.document).await {
                        debug!(code = %change.code, error = %err, "ignored remote change");
                    }
                }
            }
        }
    }

    /// Subscribe to the remote document of `code`; changes reach [`Self::run`].
    pub fn watch_game(&self, code: &GameCode) {
        let tx = self.remote_tx.clone();
        let watched = code.clone();
        let listener: ChangeListener = Arc::new(move |document| {
            let _ = tx.send(RemoteChange {
                code: watched.clone(),
                document,
            });
        });

        let subscription = self.cloud.subscribe(code.clone(), listener);
        let previous = self
            .games
            .entry(code.clone())
            .or_default()
            .subscription
            .replace(subscription);
        drop(previous);
    }

    /// Watch every game currently in the library.
    pub async fn watch_library(&self) {
        for record in self.library.list().await {
            self.watch_game(&record.code);
        }
    }

    /// Drop all sync state of `code`, cancelling its subscription and any in-flight push.
    pub fn forget(&self, code: &GameCode) {
        if let Some((_, mut entry)) = self.games.remove(code) {
            entry.interrupt();
            if let Some(subscription) = entry.subscription.take() {
                subscription.unsubscribe();
            }
        }
    }

    /// Clear the queue, sync state and subscribers of a game that left the library.
    pub async fn release_game(&self, code: &GameCode) {
        let dropped = self.queue.clear(code).await;
        self.forget(code);
        self.hub.close(code);
        debug!(code = %code, dropped, "released game");
    }

    /// Remove `code` from the library together with everything attached to it.
    pub async fn drop_game(&self, code: &GameCode) -> Option<GameRecord> {
        let removed = self.library.remove(code).await;
        self.release_game(code).await;
        removed
    }

    /// Schedule an automatic sync of `code` in the background.
    pub fn request_sync(self: &Arc<Self>, code: &GameCode) {
        let this = Arc::clone(self);
        let code = code.clone();
        tokio::spawn(async move {
            match this.run_sync(&code, Trigger::Automatic).await {
                Ok(outcome) => debug!(code = %code, ?outcome, "automatic sync finished"),
                Err(err) => debug!(code = %code, error = %err, "automatic sync failed"),
            }
        });
    }

    /// Request a sync of every game with pending actions.
    pub async fn sweep(self: &Arc<Self>) {
        if !self.connectivity.is_online() || !self.settings.get().await.auto_sync {
            return;
        }
        for code in self.queue.codes_with_pending().await {
            self.request_sync(&code);
        }
    }

    /// Sync `code` now, bypassing the automatic-sync setting and the backoff timer.
    pub async fn sync_now(self: &Arc<Self>, code: &GameCode) -> Result<SyncOutcome, SyncError> {
        self.run_sync(code, Trigger::Manual).await
    }

    /// Settle a stuck game by choosing which copy survives.
    pub async fn force_sync(
        self: &Arc<Self>,
        code: &GameCode,
        resolution: Resolution,
    ) -> Result<SyncOutcome, SyncError> {
        if self.library.get(code).await.is_none() {
            return Err(SyncError::NotFound(code.clone()));
        }
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        if matches!(self.phase(code), SyncPhase::Pushing | SyncPhase::Settled) {
            return Err(SyncError::Busy);
        }

        let remote = self.with_timeout(self.cloud.pull(code.clone())).await?;
        self.cache_remote(code, remote.clone());

        match resolution {
            Resolution::LocalWins => {
                if let Some(remote) = &remote {
                    self.library.rebase(code, remote.last_update).await?;
                }
                let token = Arc::new(Notify::new());
                self.resume_for_push(code, &token)?;
                info!(code = %code, "forcing the local copy over the remote one");
                self.push_cycle(code, token, remote).await
            }
            Resolution::RemoteWins => {
                let remote = remote.ok_or_else(|| SyncError::MissingRemote(code.clone()))?;
                let record = self.library.replace_with_remote(&remote).await?;
                let discarded = self.queue.clear(code).await;
                if let Some(mut entry) = self.games.get_mut(code) {
                    let event = if *entry.machine.phase() == SyncPhase::Conflict {
                        SyncEvent::ConflictResolved { push: false }
                    } else {
                        SyncEvent::ManualReset
                    };
                    if let Err(err) = entry.machine.apply(event) {
                        debug!(code = %code, error = %err, "ignored sync transition");
                    }
                    entry.reset();
                    entry.last_synced_at = Some(timestamp_now());
                }
                info!(code = %code, discarded, "replaced the local copy with the remote one");
                self.hub.publish(
                    code,
                    GameUpdate::Changed {
                        record,
                        origin: UpdateOrigin::Remote,
                        signals: Vec::new(),
                    },
                );
                self.publish_status(code).await;
                Ok(SyncOutcome::RemoteAdopted { discarded })
            }
        }
    }

    /// Drop the queued actions of `code` and clear a halted state.
    pub async fn abandon(&self, code: &GameCode) -> Result<usize, SyncError> {
        if self.library.get(code).await.is_none() {
            return Err(SyncError::NotFound(code.clone()));
        }
        {
            let mut entry = self.games.entry(code.clone()).or_default();
            if matches!(
                entry.machine.phase(),
                SyncPhase::Pushing | SyncPhase::Settled
            ) {
                return Err(SyncError::Busy);
            }
            if let Err(err) = entry.machine.apply(SyncEvent::ManualReset) {
                debug!(code = %code, error = %err, "ignored sync transition");
            }
            entry.reset();
        }
        let discarded = self.queue.clear(code).await;
        warn!(code = %code, discarded, "abandoned queued actions");
        self.publish_status(code).await;
        Ok(discarded)
    }

    /// Current sync status of `code`.
    pub async fn status(&self, code: &GameCode) -> Result<SyncStatus, SyncError> {
        if self.library.get(code).await.is_none() {
            return Err(SyncError::NotFound(code.clone()));
        }
        let pending = self.queue.len(code).await;
        let (snapshot, last_synced_at, error) = self
            .games
            .get(code)
            .map(|entry| {
                (
                    entry.machine.snapshot(),
                    entry.last_synced_at,
                    entry.last_error.clone(),
                )
            })
            .unwrap_or_else(|| (SyncStateMachine::new().snapshot(), None, None));

        Ok(SyncStatus {
            online: self.connectivity.is_online(),
            last_synced_at,
            conflict: snapshot.phase == SyncPhase::Conflict,
            phase_age_ms: snapshot.since.elapsed().as_millis() as u64,
            transitions: snapshot.version,
            phase: snapshot.phase,
            pending,
            error,
        })
    }

    /// React to a remote document delivered by a subscription.
    pub async fn handle_remote_change(
        self: &Arc<Self>,
        code: &GameCode,
        document: Option<CloudDocument>,
    ) -> Result<(), SyncError> {
        let Some(document) = document else {
            return Ok(());
        };
        if self.library.get(code).await.is_none() {
            self.forget(code);
            return Err(SyncError::NotFound(code.clone()));
        }
        self.cache_remote(code, Some(document.clone()));

        match self.reconcile(code, &document).await? {
            Reconciled::LocalAhead => self.request_sync(code),
            Reconciled::Unchanged | Reconciled::InSync | Reconciled::Blocked => {}
            Reconciled::Adopted { .. } | Reconciled::Conflict => self.publish_status(code).await,
        }
        Ok(())
    }

    fn phase(&self, code: &GameCode) -> SyncPhase {
        self.games
            .get(code)
            .map(|entry| entry.machine.phase().clone())
            .unwrap_or(SyncPhase::Idle)
    }

    fn cache_remote(&self, code: &GameCode, remote: Option<CloudDocument>) {
        let mut entry = self.games.entry(code.clone()).or_default();
        let newer = match (&entry.remote, &remote) {
            (Some(known), Some(incoming)) => incoming.last_update >= known.last_update,
            (_, Some(_)) => true,
            (_, None) => false,
        };
        if newer {
            entry.remote = remote;
        }
    }

    async fn with_timeout<T>(&self, call: BoxFuture<'static, CloudResult<T>>) -> CloudResult<T> {
        time::timeout(self.policy.network_timeout, call)
            .await
            .unwrap_or_else(|_| Err(CloudError::Timeout))
    }

    async fn run_sync(
        self: &Arc<Self>,
        code: &GameCode,
        trigger: Trigger,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(record) = self.library.get(code).await else {
            self.forget(code);
            return Err(SyncError::NotFound(code.clone()));
        };
        if !self.connectivity.is_online() {
            return refuse(trigger, DeferReason::Offline);
        }
        if trigger == Trigger::Automatic && !self.settings.get().await.auto_sync {
            return refuse(trigger, DeferReason::AutoSyncDisabled);
        }
        if record.synced && self.queue.len(code).await == 0 {
            return Ok(SyncOutcome::UpToDate);
        }

        let token = Arc::new(Notify::new());
        let remote = match self.begin_push(code, trigger, &token) {
            Ok(remote) => remote,
            Err(reason) => return refuse(trigger, reason),
        };
        self.push_cycle(code, token, remote).await
    }

    /// Enter `Pushing` unless the game is halted, busy or backing off.
    fn begin_push(
        &self,
        code: &GameCode,
        trigger: Trigger,
        token: &Arc<Notify>,
    ) -> Result<Option<CloudDocument>, DeferReason> {
        let mut entry = self.games.entry(code.clone()).or_default();
        match entry.machine.phase() {
            SyncPhase::Conflict => return Err(DeferReason::Conflict),
            SyncPhase::Fatal { reason } => return Err(DeferReason::Fatal(reason.clone())),
            SyncPhase::Pushing | SyncPhase::Settled => return Err(DeferReason::InFlight),
            SyncPhase::RetryWait { .. }
                if trigger == Trigger::Automatic
                    && entry.retry_at.is_some_and(|at| at > Instant::now()) =>
            {
                return Err(DeferReason::Backoff);
            }
            _ => {}
        }

        entry
            .machine
            .apply(SyncEvent::PushStarted)
            .map_err(|_| DeferReason::InFlight)?;
        entry.retry_at = None;
        entry.in_flight = Some(token.clone());
        Ok(entry.remote.clone())
    }

    /// Enter `Pushing` after a manual local-wins decision.
    fn resume_for_push(&self, code: &GameCode, token: &Arc<Notify>) -> Result<(), SyncError> {
        let mut entry = self.games.entry(code.clone()).or_default();
        let event = match entry.machine.phase() {
            SyncPhase::Pushing | SyncPhase::Settled => return Err(SyncError::Busy),
            SyncPhase::Conflict => SyncEvent::ConflictResolved { push: true },
            _ => SyncEvent::ManualReset,
        };
        entry.machine.apply(event).map_err(|_| SyncError::Busy)?;
        if *entry.machine.phase() == SyncPhase::Idle {
            entry
                .machine
                .apply(SyncEvent::PushStarted)
                .map_err(|_| SyncError::Busy)?;
        }
        entry.reset();
        entry.in_flight = Some(token.clone());
        Ok(())
    }

    /// Leave `Pushing` without a cloud write.
    fn release_push(&self, code: &GameCode, token: &Arc<Notify>) {
        if let Some(mut entry) = self.games.get_mut(code) {
            if entry.owns(token) {
                entry.in_flight = None;
                if let Err(err) = entry.machine.apply(SyncEvent::PushAborted) {
                    debug!(code = %code, error = %err, "ignored sync transition");
                }
            }
        }
    }

    async fn interrupted(&self, code: &GameCode) -> SyncOutcome {
        if self.library.get(code).await.is_none() {
            debug!(code = %code, "game removed during push; dropping the response");
            SyncOutcome::Cancelled
        } else {
            debug!(code = %code, "push superseded by a remote change");
            SyncOutcome::Superseded
        }
    }

    /// One push attempt. The caller already moved the machine into `Pushing` under `token`.
    async fn push_cycle(
        self: &Arc<Self>,
        code: &GameCode,
        token: Arc<Notify>,
        cached_remote: Option<CloudDocument>,
    ) -> Result<SyncOutcome, SyncError> {
        self.queue.record_attempt(code).await;
        self.publish_status(code).await;

        let remote = match cached_remote {
            Some(remote) => Some(remote),
            None => match self.with_timeout(self.cloud.pull(code.clone())).await {
                Ok(remote) => {
                    self.cache_remote(code, remote.clone());
                    remote
                }
                Err(err) => return self.push_failed(code, &token, err).await,
            },
        };

        if let Some(remote) = remote {
            match self.reconcile(code, &remote).await {
                Ok(Reconciled::Unchanged | Reconciled::LocalAhead | Reconciled::Blocked) => {}
                Ok(Reconciled::InSync) => {
                    self.release_push(code, &token);
                    self.publish_status(code).await;
                    return Ok(SyncOutcome::UpToDate);
                }
                Ok(Reconciled::Adopted { discarded }) => {
                    self.publish_status(code).await;
                    return Ok(SyncOutcome::RemoteAdopted { discarded });
                }
                Ok(Reconciled::Conflict) => {
                    self.publish_status(code).await;
                    return Ok(SyncOutcome::Conflict);
                }
                Err(err) => {
                    self.release_push(code, &token);
                    return Err(err);
                }
            }
        }

        let Some(snapshot) = self.library.get(code).await else {
            self.forget(code);
            return Ok(SyncOutcome::Cancelled);
        };
        let included = self.queue.count_through(code, snapshot.last_modified).await;
        let document = CloudDocument::from_record(&snapshot);

        let push = self.with_timeout(self.cloud.push(document.clone()));
        let result = tokio::select! {
            _ = token.notified() => None,
            result = push => Some(result),
        };
        let owned = self
            .games
            .get(code)
            .is_some_and(|entry| entry.owns(&token));
        let Some(result) = result.filter(|_| owned) else {
            return Ok(self.interrupted(code).await);
        };

        match result {
            Ok(ack) => {
                self.push_acknowledged(code, &token, &snapshot, document, ack, included)
                    .await
            }
            Err(err) => self.push_failed(code, &token, err).await,
        }
    }

    async fn push_acknowledged(
        self: &Arc<Self>,
        code: &GameCode,
        token: &Arc<Notify>,
        snapshot: &GameRecord,
        mut document: CloudDocument,
        ack: PushAck,
        included: usize,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(record) = self
            .library
            .mark_synced(code, snapshot.last_modified, ack.last_update)
            .await
        else {
            self.forget(code);
            return Ok(SyncOutcome::Cancelled);
        };
        let settled = self
            .queue
            .settle_acknowledged(code, included, snapshot.last_modified)
            .await;

        {
            let Some(mut entry) = self.games.get_mut(code) else {
                return Ok(SyncOutcome::Cancelled);
            };
            if entry.owns(token) {
                entry.in_flight = None;
                for event in [SyncEvent::PushAcknowledged, SyncEvent::SettleCompleted] {
                    if let Err(err) = entry.machine.apply(event) {
                        debug!(code = %code, error = %err, "ignored sync transition");
                    }
                }
            }
            entry.reset();
            entry.last_synced_at = Some(timestamp_now());
            document.last_update = ack.last_update;
            entry.remote = Some(document);
        }
        info!(code = %code, settled, last_update = ack.last_update, "push acknowledged");
        self.publish_status(code).await;

        let settings = self.settings.get().await;
        if record.synced && record.scoreboard.is_finished() && !settings.keep_synced_games {
            info!(code = %code, "finished game synced; removing it from the library");
            self.drop_game(code).await;
            return Ok(SyncOutcome::Pushed { settled });
        }
        if self.queue.len(code).await > 0 {
            self.request_sync(code);
        }
        Ok(SyncOutcome::Pushed { settled })
    }

    async fn push_failed(
        self: &Arc<Self>,
        code: &GameCode,
        token: &Arc<Notify>,
        err: CloudError,
    ) -> Result<SyncOutcome, SyncError> {
        let stale = matches!(err, CloudError::Stale { .. });
        if stale {
            // Refresh the remote copy so the next attempt reconciles against it.
            if let Ok(remote) = self.with_timeout(self.cloud.pull(code.clone())).await {
                self.cache_remote(code, remote);
            }
        }
        let retryable = stale || err.is_retryable();

        let verdict = {
            let Some(mut entry) = self.games.get_mut(code) else {
                return Ok(SyncOutcome::Cancelled);
            };
            if !entry.owns(token) {
                None
            } else {
                entry.in_flight = None;
                entry.last_error = Some(err.to_string());
                let attempt = entry.attempts.saturating_add(1);
                entry.attempts = attempt;

                if retryable && attempt < self.policy.max_push_attempts {
                    let delay = self.policy.backoff.delay(attempt - 1);
                    entry.retry_at = Some(Instant::now() + delay);
                    let _ = entry.machine.apply(SyncEvent::RetryableFailure { attempt });
                    Some(Ok((attempt, delay)))
                } else {
                    let reason = if retryable {
                        format!("gave up after {attempt} attempts: {err}")
                    } else {
                        err.to_string()
                    };
                    let _ = entry.machine.apply(SyncEvent::FatalFailure {
                        reason: reason.clone(),
                    });
                    Some(Err(reason))
                }
            }
        };
        let Some(verdict) = verdict else {
            return Ok(self.interrupted(code).await);
        };
        self.publish_status(code).await;

        match verdict {
            Ok((attempt, delay)) => {
                warn!(
                    code = %code,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "push failed; retrying after backoff"
                );
                let this = Arc::clone(self);
                let retry_code = code.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    this.request_sync(&retry_code);
                });
                Ok(SyncOutcome::RetryScheduled { attempt, delay })
            }
            Err(reason) => {
                error!(code = %code, error = %reason, "sync halted until manual intervention");
                Err(SyncError::Fatal(reason))
            }
        }
    }

    /// Apply last-writer-wins between the local copy and a newer remote copy.
    async fn reconcile(
        &self,
        code: &GameCode,
        remote: &CloudDocument,
    ) -> Result<Reconciled, SyncError> {
        let record = self
            .library
            .get(code)
            .await
            .ok_or_else(|| SyncError::NotFound(code.clone()))?;
        if !remote_is_ahead(&record, remote) {
            return Ok(Reconciled::Unchanged);
        }

        match resolve_conflict(record.last_modified, remote.last_update) {
            Winner::Local => {
                self.library.rebase(code, remote.last_update).await?;
                debug!(
                    code = %code,
                    local = record.last_modified,
                    remote = remote.last_update,
                    "local copy is newer than the remote change"
                );
                Ok(Reconciled::LocalAhead)
            }
            Winner::Remote => {
                if self.phase(code).is_blocked() {
                    return Ok(Reconciled::Blocked);
                }
                let Some(adopted) = self.library.adopt_remote(remote).await? else {
                    return Ok(Reconciled::Unchanged);
                };
                let discarded = self.queue.discard_before(code, remote.last_update).await;
                if let Some(mut entry) = self.games.get_mut(code) {
                    entry.interrupt();
                    if let Err(err) = entry.machine.apply(SyncEvent::RemoteAdopted) {
                        debug!(code = %code, error = %err, "ignored sync transition");
                    }
                    entry.reset();
                    entry.last_synced_at = Some(timestamp_now());
                }
                info!(
                    code = %code,
                    discarded,
                    remote = remote.last_update,
                    "adopted newer remote copy"
                );
                self.hub.publish(
                    code,
                    GameUpdate::Changed {
                        record: adopted,
                        origin: UpdateOrigin::Remote,
                        signals: Vec::new(),
                    },
                );
                Ok(Reconciled::Adopted { discarded })
            }
            Winner::Undecided if record.scoreboard == remote.scoreboard => {
                self.library
                    .mark_synced(code, record.last_modified, remote.last_update)
                    .await;
                let settled = self
                    .queue
                    .discard_before(code, remote.last_update.saturating_add(1))
                    .await;
                debug!(code = %code, settled, "remote copy already matches the local one");
                Ok(Reconciled::InSync)
            }
            Winner::Undecided => {
                if self.phase(code).is_blocked() {
                    return Ok(Reconciled::Blocked);
                }
                if let Some(mut entry) = self.games.get_mut(code) {
                    entry.interrupt();
                    if let Err(err) = entry.machine.apply(SyncEvent::ConflictDetected) {
                        debug!(code = %code, error = %err, "ignored sync transition");
                    }
                }
                warn!(
                    code = %code,
                    last_update = remote.last_update,
                    "local and remote copies diverged with the same timestamp"
                );
                Ok(Reconciled::Conflict)
            }
        }
    }

    async fn publish_status(&self, code: &GameCode) {
        if let Ok(status) = self.status(code).await {
            self.hub.publish(code, GameUpdate::Sync(status));
        }
    }

    async fn publish_all_status(&self) {
        let codes: Vec<GameCode> = self.games.iter().map(|entry| entry.key().clone()).collect();
        for code in codes {
            self.publish_status(&code).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_timestamp_wins_whole() {
        assert_eq!(resolve_conflict(2_000, 1_000), Winner::Local);
        assert_eq!(resolve_conflict(1_000, 2_000), Winner::Remote);
        assert_eq!(resolve_conflict(1_500, 1_500), Winner::Undecided);
    }

    #[test]
    fn manual_triggers_surface_refusals_as_errors() {
        assert_eq!(
            refuse(Trigger::Automatic, DeferReason::Offline),
            Ok(SyncOutcome::Deferred(DeferReason::Offline))
        );
        assert_eq!(
            refuse(Trigger::Manual, DeferReason::Offline),
            Err(SyncError::Offline)
        );
        assert_eq!(
            refuse(Trigger::Manual, DeferReason::Fatal("denied".into())),
            Err(SyncError::Fatal("denied".into()))
        );
    }

    #[test]
    fn status_flattens_the_phase() {
        let status = SyncStatus {
            online: true,
            last_synced_at: Some(5),
            conflict: false,
            phase: SyncPhase::RetryWait { attempt: 2 },
            phase_age_ms: 120,
            transitions: 4,
            pending: 3,
            error: Some("cloud request timed out".into()),
        };
        let value = serde_json::to_value(status).unwrap();
        assert_eq!(value["phase"], "retry_wait");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["lastSyncedAt"], 5);
        assert_eq!(value["phaseAgeMs"], 120);
    }
}
