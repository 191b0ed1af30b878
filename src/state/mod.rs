pub mod game;
pub mod hub;
pub mod sync_machine;
pub mod transitions;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::{cloud_store::CloudStore, kv::KeyValueStore},
    services::{
        action_queue::ActionQueue, connectivity::Connectivity, library_service::LocalStore,
        settings_service::SettingsStore, sync_service::SyncOrchestrator,
    },
};

use self::hub::GameHub;

pub type SharedState = Arc<AppState>;

/// Pending updates buffered per subscriber before it starts lagging.
const HUB_CAPACITY: usize = 64;

/// Central application state: every store and the orchestrator, injected once.
pub struct AppState {
    config: AppConfig,
    library: Arc<LocalStore>,
    queue: Arc<ActionQueue>,
    settings: Arc<SettingsStore>,
    cloud: Arc<dyn CloudStore>,
    connectivity: Arc<Connectivity>,
    hub: Arc<GameHub>,
    orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    /// Open the local stores on `storage` and wire the orchestrator to `cloud`.
    ///
    /// Background loops are not started here; see [`SyncOrchestrator::run`].
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn KeyValueStore>,
        cloud: Arc<dyn CloudStore>,
    ) -> SharedState {
        let library = Arc::new(LocalStore::open(storage.clone(), config.library_capacity));
        let queue = Arc::new(ActionQueue::open(storage.clone()));
        let settings = Arc::new(SettingsStore::open(storage));
        let connectivity = Arc::new(Connectivity::new(config.probe_failure_threshold));
        let hub = Arc::new(GameHub::new(HUB_CAPACITY));
        let orchestrator = SyncOrchestrator::new(
            library.clone(),
            queue.clone(),
            cloud.clone(),
            connectivity.clone(),
            settings.clone(),
            hub.clone(),
            config.sync_policy(),
        );

        Arc::new(Self {
            config,
            library,
            queue,
            settings,
            cloud,
            connectivity,
            hub,
            orchestrator,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Local game library.
    pub fn library(&self) -> &Arc<LocalStore> {
        &self.library
    }

    /// Offline action queue.
    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    /// Persisted app settings.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Cloud store adapter.
    pub fn cloud(&self) -> &Arc<dyn CloudStore> {
        &self.cloud
    }

    /// Connectivity monitor.
    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.connectivity
    }

    /// Per-game update hub.
    pub fn hub(&self) -> &Arc<GameHub> {
        &self.hub
    }

    /// Sync orchestrator.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}
