use serde::Serialize;

use crate::{
    dto::game::GameView,
    state::{
        game::GameCode,
        hub::{GameUpdate, UpdateOrigin},
        transitions::Signal,
    },
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Encode a hub update as the `game`, `sync` or `removed` event.
    pub fn from_update(code: &GameCode, update: GameUpdate) -> serde_json::Result<Self> {
        match update {
            GameUpdate::Changed {
                record,
                origin,
                signals,
            } => Self::json(
                Some("game".to_string()),
                &GameChangedEvent {
                    origin,
                    signals,
                    game: record.into(),
                },
            ),
            GameUpdate::Sync(status) => Self::json(Some("sync".to_string()), &status),
            GameUpdate::Removed => Self::json(
                Some("removed".to_string()),
                &GameRemovedEvent { code: code.clone() },
            ),
        }
    }
}

#[derive(Debug, Serialize)]
/// Initial event sent to an SSE client when it connects.
pub struct Handshake {
    /// Game the stream follows.
    pub code: GameCode,
    /// Current state of the game.
    pub game: GameView,
}

#[derive(Debug, Serialize)]
/// Broadcast on every accepted local or remote mutation.
pub struct GameChangedEvent {
    pub origin: UpdateOrigin,
    pub signals: Vec<Signal>,
    pub game: GameView,
}

#[derive(Debug, Serialize)]
/// Broadcast when the game leaves the local library.
pub struct GameRemovedEvent {
    pub code: GameCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_is_named_and_carries_the_code() {
        let code = GameCode::parse("LOCAL-AB12C3").unwrap();
        let event = ServerEvent::from_update(&code, GameUpdate::Removed).unwrap();
        assert_eq!(event.event.as_deref(), Some("removed"));
        assert_eq!(event.data, r#"{"code":"LOCAL-AB12C3"}"#);
    }
}
