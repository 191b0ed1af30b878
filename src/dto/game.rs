use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dto::{
        format_millis,
        validation::{validate_game_code, validate_hex_color},
    },
    services::{action_queue::QueuedAction, library_service::Persistence},
    state::{
        game::{CodeKind, GameCode, GameRecord, Player, RuleSet, Scoreboard, TeamState},
        transitions::Signal,
    },
};

/// Payload used to set up a brand-new game.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    /// Team A.
    #[validate(nested)]
    pub home: TeamInput,
    /// Team B.
    #[validate(nested)]
    pub away: TeamInput,
    /// Identity space of the new code; local-only when omitted.
    #[serde(default)]
    pub kind: CodeKind,
    /// Rules overriding the settings-derived defaults.
    #[serde(default)]
    #[validate(nested)]
    pub rules: Option<RulesInput>,
}

/// Incoming team definition.
#[derive(Debug, Deserialize, Validate)]
pub struct TeamInput {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(custom(function = "validate_hex_color"))]
    pub color: String,
    #[serde(default)]
    #[validate(nested)]
    pub roster: Vec<PlayerInput>,
}

/// Roster entry supplied at setup.
#[derive(Debug, Deserialize, Validate)]
pub struct PlayerInput {
    #[validate(length(min = 1, max = 3))]
    pub number: String,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
}

/// Optional rule overrides; missing fields keep their defaults.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RulesInput {
    #[validate(range(min = 1, max = 8))]
    pub regulation_periods: Option<u32>,
    #[validate(range(min = 1, max = 60))]
    pub period_minutes: Option<u32>,
    #[validate(range(min = 1, max = 60))]
    pub overtime_minutes: Option<u32>,
    #[validate(range(min = 1, max = 60))]
    pub shot_clock_seconds: Option<u32>,
    #[validate(range(max = 10))]
    pub timeouts_first_half: Option<u32>,
    #[validate(range(max = 10))]
    pub timeouts_second_half: Option<u32>,
    #[validate(range(max = 10))]
    pub timeouts_overtime: Option<u32>,
}

impl RulesInput {
    /// Overlay the supplied fields on `base`.
    pub fn apply_to(&self, base: RuleSet) -> RuleSet {
        RuleSet {
            regulation_periods: self.regulation_periods.unwrap_or(base.regulation_periods),
            period_minutes: self.period_minutes.unwrap_or(base.period_minutes),
            overtime_minutes: self.overtime_minutes.unwrap_or(base.overtime_minutes),
            shot_clock_seconds: self.shot_clock_seconds.unwrap_or(base.shot_clock_seconds),
            timeouts_first_half: self.timeouts_first_half.unwrap_or(base.timeouts_first_half),
            timeouts_second_half: self
                .timeouts_second_half
                .unwrap_or(base.timeouts_second_half),
            timeouts_overtime: self.timeouts_overtime.unwrap_or(base.timeouts_overtime),
        }
    }
}

impl From<TeamInput> for TeamState {
    fn from(input: TeamInput) -> Self {
        let mut team = TeamState::new(input.name, input.color, 0);
        team.roster = input
            .roster
            .into_iter()
            .map(|player| Player::new(player.number, player.name))
            .collect();
        team
    }
}

/// Body of `PUT /games/active`.
#[derive(Debug, Deserialize, Validate)]
pub struct SetActiveRequest {
    #[validate(custom(function = "validate_game_code"))]
    pub code: String,
}

/// Projection of a stored game.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub code: GameCode,
    pub kind: CodeKind,
    pub scoreboard: Scoreboard,
    pub created_at: String,
    pub last_modified: i64,
    pub updated_at: String,
    pub synced: bool,
    pub cloud_id: Option<GameCode>,
}

impl From<GameRecord> for GameView {
    fn from(record: GameRecord) -> Self {
        Self {
            kind: record.code.kind(),
            created_at: format_millis(record.created_at),
            updated_at: format_millis(record.last_modified),
            code: record.code,
            scoreboard: record.scoreboard,
            last_modified: record.last_modified,
            synced: record.synced,
            cloud_id: record.cloud_id,
        }
    }
}

/// Response of `POST /games`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGameView {
    pub game: GameView,
    /// Codes evicted to stay within capacity.
    pub evicted: Vec<GameCode>,
    pub persistence: Persistence,
}

/// Response of `POST /games/{code}/actions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub game: GameView,
    pub signals: Vec<Signal>,
    /// Actions still waiting for a cloud acknowledgment.
    pub pending: usize,
}

/// Response of `GET /games/{code}/pending`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub code: GameCode,
    pub count: usize,
    pub actions: Vec<QueuedAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(color: &str) -> TeamInput {
        TeamInput {
            name: "Hawks".into(),
            color: color.into(),
            roster: vec![PlayerInput {
                number: "07".into(),
                name: "Ada".into(),
            }],
        }
    }

    #[test]
    fn create_request_validates_nested_teams() {
        let request = CreateGameRequest {
            home: team("#aa0000"),
            away: team("red"),
            kind: CodeKind::Local,
            rules: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("away"));
        assert!(!errors.errors().contains_key("home"));
    }

    #[test]
    fn rule_overrides_keep_unspecified_defaults() {
        let input = RulesInput {
            period_minutes: Some(12),
            ..RulesInput::default()
        };
        let rules = input.apply_to(RuleSet::default());
        assert_eq!(rules.period_minutes, 12);
        assert_eq!(rules.shot_clock_seconds, 24);
        assert_eq!(rules.regulation_periods, 4);
    }

    #[test]
    fn request_defaults_to_a_local_code() {
        let request: CreateGameRequest = serde_json::from_value(serde_json::json!({
            "home": {"name": "Hawks", "color": "#aa0000"},
            "away": {"name": "Owls", "color": "#0000aa"}
        }))
        .unwrap();
        assert_eq!(request.kind, CodeKind::Local);
        assert!(request.validate().is_ok());
        let team: TeamState = request.home.into();
        assert!(team.roster.is_empty());
    }
}
