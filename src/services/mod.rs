/// Durable per-game offline action queue.
pub mod action_queue;
/// Exponential backoff with jitter.
pub mod backoff;
/// Connectivity monitor and reachability probes.
pub mod connectivity;
/// Health check service.
pub mod health_service;
/// On-device game library.
pub mod library_service;
/// Collaborator-facing scoreboard operations.
pub mod scoreboard_service;
/// Persisted app settings.
pub mod settings_service;
/// Server-Sent Events streaming of game updates.
pub mod sse_service;
/// Sync orchestration between the library and the cloud store.
pub mod sync_service;
