//! Collaborator-facing operations: everything the console UI calls goes
//! through here, never straight to the stores.

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    dto::game::{CreateGameRequest, CreatedGameView, DispatchResponse, GameView, PendingResponse},
    error::ServiceError,
    services::{
        action_queue::QueuedAction,
        connectivity::ConnectivitySnapshot,
        settings_service::AppSettings,
        sync_service::{Resolution, SyncOutcome, SyncStatus},
    },
    state::{
        SharedState,
        game::{GameCode, RuleSet, Scoreboard},
        hub::{GameUpdate, UpdateOrigin},
        transitions::Transition,
    },
};

/// Set up a new game, make it active and start watching its cloud copy.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
) -> Result<CreatedGameView, ServiceError> {
    let settings = state.settings().get().await;
    let defaults = RuleSet {
        period_minutes: settings.default_period_duration,
        shot_clock_seconds: settings.default_shot_clock,
        ..RuleSet::default()
    };
    let rules = match &request.rules {
        Some(overrides) => overrides.apply_to(defaults),
        None => defaults,
    };

    let scoreboard = Scoreboard::new(request.home.into(), request.away.into(), rules);
    let created = state.library().create(scoreboard, request.kind).await;

    for evicted in &created.evicted {
        state.orchestrator().release_game(&evicted.code).await;
    }
    state.orchestrator().watch_game(&created.record.code);
    info!(
        code = %created.record.code,
        evicted = created.evicted.len(),
        "game created"
    );

    Ok(CreatedGameView {
        evicted: created.evicted.into_iter().map(|game| game.code).collect(),
        persistence: created.persistence,
        game: created.record.into(),
    })
}

/// Apply `transition` to `code`, persist it, queue it for sync and notify subscribers.
pub async fn dispatch(
    state: &SharedState,
    code: &GameCode,
    transition: Transition,
) -> Result<DispatchResponse, ServiceError> {
    let (record, signals) = state.library().apply_transition(code, &transition).await?;

    let payload = serde_json::to_value(&transition)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    state
        .queue()
        .enqueue(code, payload, record.last_modified)
        .await;
    let pending = state.queue().len(code).await;
    debug!(code = %code, action = transition.name(), pending, "transition applied");

    state.hub().publish(
        code,
        GameUpdate::Changed {
            record: record.clone(),
            origin: UpdateOrigin::Local,
            signals: signals.clone(),
        },
    );
    state.orchestrator().request_sync(code);

    Ok(DispatchResponse {
        game: record.into(),
        signals,
        pending,
    })
}

/// Overwrite the whole scoreboard of `code`, e.g. when the operator corrects a
/// mistake by hand. Queued and synced like any transition.
pub async fn replace_scoreboard(
    state: &SharedState,
    code: &GameCode,
    scoreboard: Scoreboard,
) -> Result<GameView, ServiceError> {
    let record = state.library().update(code, scoreboard).await?;

    let payload = serde_json::json!({ "type": "replace", "scoreboard": &record.scoreboard });
    state
        .queue()
        .enqueue(code, payload, record.last_modified)
        .await;
    debug!(code = %code, "scoreboard replaced");

    state.hub().publish(
        code,
        GameUpdate::Changed {
            record: record.clone(),
            origin: UpdateOrigin::Local,
            signals: Vec::new(),
        },
    );
    state.orchestrator().request_sync(code);
    Ok(record.into())
}

/// Read one game.
pub async fn get_game(state: &SharedState, code: &GameCode) -> Result<GameView, ServiceError> {
    state
        .library()
        .get(code)
        .await
        .map(GameView::from)
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}`")))
}

/// Every stored game, in library order.
pub async fn list_games(state: &SharedState) -> Vec<GameView> {
    state
        .library()
        .list()
        .await
        .into_iter()
        .map(GameView::from)
        .collect()
}

/// Remove a game with its queue, subscriptions and any in-flight push.
pub async fn remove_game(state: &SharedState, code: &GameCode) -> Result<GameView, ServiceError> {
    let removed = state
        .orchestrator()
        .drop_game(code)
        .await
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}`")))?;
    info!(code = %code, "game removed");
    Ok(removed.into())
}

/// Point the console at `code`.
pub async fn set_active(state: &SharedState, code: &GameCode) -> Result<GameView, ServiceError> {
    state.library().set_active(code).await?;
    get_game(state, code).await
}

/// Game the console currently shows.
pub async fn get_active(state: &SharedState) -> Result<GameView, ServiceError> {
    state
        .library()
        .get_active()
        .await
        .map(GameView::from)
        .ok_or_else(|| ServiceError::NotFound("no active game".into()))
}

/// Number of actions waiting for a cloud acknowledgment.
pub async fn pending_count(state: &SharedState, code: &GameCode) -> Result<usize, ServiceError> {
    ensure_known(state, code).await?;
    Ok(state.queue().len(code).await)
}

/// Pending actions of `code`, oldest first.
pub async fn pending_actions(
    state: &SharedState,
    code: &GameCode,
) -> Result<PendingResponse, ServiceError> {
    ensure_known(state, code).await?;
    let actions: Vec<QueuedAction> = state.queue().peek_all(code).await;
    Ok(PendingResponse {
        code: code.clone(),
        count: actions.len(),
        actions,
    })
}

/// Online flag, last sync time and conflict flag of `code`.
pub async fn sync_status(state: &SharedState, code: &GameCode) -> Result<SyncStatus, ServiceError> {
    Ok(state.orchestrator().status(code).await?)
}

/// Receive every subsequent update of `code`; dropping the receiver unsubscribes.
pub async fn subscribe(
    state: &SharedState,
    code: &GameCode,
) -> Result<(GameView, broadcast::Receiver<GameUpdate>), ServiceError> {
    ensure_known(state, code).await?;
    let receiver = state.hub().subscribe(code);
    let game = get_game(state, code).await?;
    Ok((game, receiver))
}

/// Push `code` now, ignoring the automatic-sync setting and backoff timers.
pub async fn sync_now(state: &SharedState, code: &GameCode) -> Result<SyncOutcome, ServiceError> {
    Ok(state.orchestrator().sync_now(code).await?)
}

/// Settle a conflicted or halted game by choosing the surviving copy.
pub async fn force_sync(
    state: &SharedState,
    code: &GameCode,
    resolution: Resolution,
) -> Result<SyncOutcome, ServiceError> {
    Ok(state.orchestrator().force_sync(code, resolution).await?)
}

/// Drop the queued actions of `code` and clear a halted sync state.
pub async fn abandon(state: &SharedState, code: &GameCode) -> Result<usize, ServiceError> {
    Ok(state.orchestrator().abandon(code).await?)
}

/// Feed the platform online/offline signal.
pub fn set_platform_online(state: &SharedState, online: bool) -> ConnectivitySnapshot {
    state.connectivity().set_platform_online(online);
    state.connectivity().snapshot()
}

/// Current connectivity view.
pub fn connectivity(state: &SharedState) -> ConnectivitySnapshot {
    state.connectivity().snapshot()
}

/// Current app settings.
pub async fn settings(state: &SharedState) -> AppSettings {
    state.settings().get().await
}

/// Replace the app settings; re-enabling automatic sync drains pending actions.
pub async fn update_settings(state: &SharedState, settings: AppSettings) -> AppSettings {
    let previous = state.settings().get().await;
    let updated = state.settings().update(settings).await;
    if updated.auto_sync && !previous.auto_sync {
        state.orchestrator().sweep().await;
    }
    updated
}

async fn ensure_known(state: &SharedState, code: &GameCode) -> Result<(), ServiceError> {
    if state.library().get(code).await.is_none() {
        return Err(ServiceError::NotFound(format!("game `{code}`")));
    }
    Ok(())
}
