use serde::{Deserialize, Serialize};

use crate::services::sync_service::{DeferReason, Resolution, SyncOutcome};

/// Body of `POST /games/{code}/sync/force`.
#[derive(Debug, Deserialize)]
pub struct ForceSyncRequest {
    /// Copy that survives.
    pub resolution: Resolution,
}

/// Serialisable form of a [`SyncOutcome`].
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcomeView {
    Pushed { settled: usize },
    UpToDate,
    Deferred { reason: DeferReason },
    RetryScheduled { attempt: u32, delay_ms: u64 },
    RemoteAdopted { discarded: usize },
    Conflict,
    Superseded,
    Cancelled,
}

impl From<SyncOutcome> for SyncOutcomeView {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Pushed { settled } => Self::Pushed { settled },
            SyncOutcome::UpToDate => Self::UpToDate,
            SyncOutcome::Deferred(reason) => Self::Deferred { reason },
            SyncOutcome::RetryScheduled { attempt, delay } => Self::RetryScheduled {
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            },
            SyncOutcome::RemoteAdopted { discarded } => Self::RemoteAdopted { discarded },
            SyncOutcome::Conflict => Self::Conflict,
            SyncOutcome::Superseded => Self::Superseded,
            SyncOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Response of `POST /games/{code}/sync/abandon`.
#[derive(Debug, Serialize)]
pub struct AbandonResponse {
    /// Queued actions dropped.
    pub discarded: usize,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn outcomes_are_tagged() {
        let value = serde_json::to_value(SyncOutcomeView::from(SyncOutcome::RetryScheduled {
            attempt: 2,
            delay: Duration::from_millis(1_500),
        }))
        .unwrap();
        assert_eq!(value["outcome"], "retry_scheduled");
        assert_eq!(value["delay_ms"], 1_500);

        let deferred = serde_json::to_value(SyncOutcomeView::from(SyncOutcome::Deferred(
            DeferReason::AutoSyncDisabled,
        )))
        .unwrap();
        assert_eq!(deferred["reason"], "auto_sync_disabled");
    }

    #[test]
    fn resolution_uses_snake_case() {
        let request: ForceSyncRequest =
            serde_json::from_str(r#"{"resolution": "remote_wins"}"#).unwrap();
        assert_eq!(request.resolution, Resolution::RemoteWins);
    }
}
