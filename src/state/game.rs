//! Canonical shape of a live game: teams, clocks, period and possession.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::transitions::TransitionError;

/// Number of characters in the random part of every game code.
pub const CODE_LENGTH: usize = 6;
/// Literal prefix carried by games that were created on-device.
pub const LOCAL_CODE_PREFIX: &str = "LOCAL-";
/// Cumulative player fouls that trigger a disqualification.
pub const DISQUALIFYING_FOULS: u32 = 5;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Milliseconds since the Unix epoch, used for every record timestamp.
pub fn timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Identity space a game code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    /// Short code shared with other devices through the cloud store.
    Cloud,
    /// Code of a game created on-device, prefixed with [`LOCAL_CODE_PREFIX`].
    #[default]
    Local,
}

/// Raised when a string is not a well-formed game code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid game code `{0}`")]
pub struct InvalidGameCode(pub String);

/// Human-typeable identifier of a game (`AB12C3` or `LOCAL-AB12C3`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameCode(String);

impl GameCode {
    /// Draw a fresh random code in the requested identity space.
    pub fn generate(kind: CodeKind) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        match kind {
            CodeKind::Cloud => Self(suffix),
            CodeKind::Local => Self(format!("{LOCAL_CODE_PREFIX}{suffix}")),
        }
    }

    /// Parse user input, normalising case and surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self, InvalidGameCode> {
        let normalized = raw.trim().to_ascii_uppercase();
        let suffix = normalized
            .strip_prefix(LOCAL_CODE_PREFIX)
            .unwrap_or(&normalized);

        let well_formed = suffix.len() == CODE_LENGTH
            && suffix.bytes().all(|byte| CODE_ALPHABET.contains(&byte));
        if !well_formed {
            return Err(InvalidGameCode(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    /// Identity space of this code, decided by prefix alone.
    pub fn kind(&self) -> CodeKind {
        if self.0.starts_with(LOCAL_CODE_PREFIX) {
            CodeKind::Local
        } else {
            CodeKind::Cloud
        }
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GameCode {
    type Error = InvalidGameCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GameCode> for String {
    fn from(value: GameCode) -> Self {
        value.0
    }
}

impl FromStr for GameCode {
    type Err = InvalidGameCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One of the two teams. Possession reuses this type so no third state exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Home team.
    A,
    /// Away team.
    B,
}

impl Side {
    /// The opposing team.
    pub fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

impl FromStr for Side {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Side::A),
            "B" | "b" => Ok(Side::B),
            other => Err(TransitionError::UnknownTeam(other.to_string())),
        }
    }
}

/// Roster entry of a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Jersey number as printed (may contain leading zeros).
    pub number: String,
    /// Display name.
    pub name: String,
    /// Cumulative personal fouls over the whole game.
    #[serde(default)]
    pub fouls: u32,
    /// Sticky flag raised once [`DISQUALIFYING_FOULS`] is reached.
    #[serde(default)]
    pub disqualified: bool,
}

impl Player {
    /// Build a roster entry with a clean foul record.
    pub fn new(number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            fouls: 0,
            disqualified: false,
        }
    }
}

/// Per-team part of the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    /// Display name.
    pub name: String,
    /// Display color, usually a CSS hex string.
    pub color: String,
    /// Points scored.
    pub score: u32,
    /// Team fouls over the whole game.
    pub fouls: u32,
    /// Team fouls in the current period, reset when the period advances.
    pub fouls_this_period: u32,
    /// Timeouts left in the current allotment window.
    pub timeouts: u32,
    /// Players registered for this game.
    #[serde(default)]
    pub roster: Vec<Player>,
}

impl TeamState {
    /// Build a team with zeroed counters.
    pub fn new(name: impl Into<String>, color: impl Into<String>, timeouts: u32) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            score: 0,
            fouls: 0,
            fouls_this_period: 0,
            timeouts,
            roster: Vec::new(),
        }
    }
}

/// Game clock with tenth-of-a-second resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameClock {
    /// Current period, starting at 1.
    pub period: u32,
    /// Whole minutes remaining.
    pub minutes: u32,
    /// Seconds remaining within the minute.
    pub seconds: u32,
    /// Tenths remaining within the second, only meaningful under one minute.
    pub tenths: u32,
    /// Whether the clock counts down.
    pub running: bool,
}

impl GameClock {
    /// A stopped clock at the start of `period` with `minutes` on it.
    pub fn new(period: u32, minutes: u32) -> Self {
        Self {
            period,
            minutes,
            seconds: 0,
            tenths: 0,
            running: false,
        }
    }

    /// Remaining time expressed in tenths of a second.
    pub fn remaining_tenths(&self) -> u64 {
        u64::from(self.minutes) * 600 + u64::from(self.seconds) * 10 + u64::from(self.tenths)
    }

    /// Overwrite the remaining time, carrying into minutes and seconds.
    pub fn set_remaining_tenths(&mut self, tenths: u64) {
        self.minutes = u32::try_from(tenths / 600).unwrap_or(u32::MAX);
        self.seconds = ((tenths % 600) / 10) as u32;
        self.tenths = (tenths % 10) as u32;
    }

    /// True once no time is left in the period.
    pub fn is_expired(&self) -> bool {
        self.remaining_tenths() == 0
    }
}

/// Shot clock, independent from the game clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotClock {
    /// Seconds remaining.
    pub seconds: u32,
    /// Whether the shot clock counts down.
    pub running: bool,
}

/// Competition rules assigned when the game is set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    /// Number of regulation periods; later periods are overtime.
    pub regulation_periods: u32,
    /// Length of a regulation period.
    pub period_minutes: u32,
    /// Length of an overtime period.
    pub overtime_minutes: u32,
    /// Shot clock length in seconds.
    pub shot_clock_seconds: u32,
    /// Timeouts granted for the first half.
    pub timeouts_first_half: u32,
    /// Timeouts granted when the second half starts.
    pub timeouts_second_half: u32,
    /// Timeouts granted for each overtime period.
    pub timeouts_overtime: u32,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            regulation_periods: 4,
            period_minutes: 10,
            overtime_minutes: 5,
            shot_clock_seconds: 24,
            timeouts_first_half: 2,
            timeouts_second_half: 3,
            timeouts_overtime: 1,
        }
    }
}

impl RuleSet {
    /// Last period belonging to the first half.
    pub fn first_half_end(&self) -> u32 {
        (self.regulation_periods / 2).max(1)
    }

    /// Whether `period` is past regulation.
    pub fn is_overtime(&self, period: u32) -> bool {
        period > self.regulation_periods
    }
}

/// Lifecycle status of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Game is being played and accepts transitions.
    #[default]
    InProgress,
    /// Terminal status; the game is archived and read-only.
    Finished,
}

/// Full payload of a game, replaced atomically on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scoreboard {
    /// Team A.
    pub home: TeamState,
    /// Team B.
    pub away: TeamState,
    /// Game clock and period.
    pub clock: GameClock,
    /// Shot clock.
    pub shot_clock: ShotClock,
    /// Team holding the ball.
    pub possession: Side,
    /// Rules the game is played under.
    pub rules: RuleSet,
    /// Lifecycle status.
    #[serde(default)]
    pub status: GameStatus,
}

impl Scoreboard {
    /// Set up a game at the start of period 1 using `rules`.
    pub fn new(home: TeamState, away: TeamState, rules: RuleSet) -> Self {
        let mut home = home;
        let mut away = away;
        home.timeouts = rules.timeouts_first_half;
        away.timeouts = rules.timeouts_first_half;

        Self {
            home,
            away,
            clock: GameClock::new(1, rules.period_minutes),
            shot_clock: ShotClock {
                seconds: rules.shot_clock_seconds,
                running: false,
            },
            possession: Side::A,
            rules,
            status: GameStatus::InProgress,
        }
    }

    /// Borrow the team playing on `side`.
    pub fn team(&self, side: Side) -> &TeamState {
        match side {
            Side::A => &self.home,
            Side::B => &self.away,
        }
    }

    /// Mutably borrow the team playing on `side`.
    pub fn team_mut(&mut self, side: Side) -> &mut TeamState {
        match side {
            Side::A => &mut self.home,
            Side::B => &mut self.away,
        }
    }

    /// Whether the game reached its terminal status.
    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }
}

/// Unit of synchronisation: one scoreboard plus its sync metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    /// Identity of the game.
    pub code: GameCode,
    /// Game payload.
    pub scoreboard: Scoreboard,
    /// Creation time (ms since epoch).
    pub created_at: i64,
    /// Time of the latest local mutation, strictly increasing per writer.
    pub last_modified: i64,
    /// Whether the current payload has been acknowledged by the cloud.
    pub synced: bool,
    /// Code of the cloud document this game mirrors, once pushed.
    #[serde(default)]
    pub cloud_id: Option<GameCode>,
    /// Remote `lastUpdate` the local copy was last reconciled with.
    #[serde(default)]
    pub synced_from: Option<i64>,
}

/// On-device catalog of games plus the active pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLibrary {
    /// Games in insertion order.
    pub games: Vec<GameRecord>,
    /// Game currently shown on the console.
    pub active_game_id: Option<GameCode>,
}

impl GameLibrary {
    /// Position of `code` in the library.
    pub fn position(&self, code: &GameCode) -> Option<usize> {
        self.games.iter().position(|game| &game.code == code)
    }

    /// Borrow the record for `code`.
    pub fn find(&self, code: &GameCode) -> Option<&GameRecord> {
        self.games.iter().find(|game| &game.code == code)
    }

    /// Mutably borrow the record for `code`.
    pub fn find_mut(&mut self, code: &GameCode) -> Option<&mut GameRecord> {
        self.games.iter_mut().find(|game| &game.code == code)
    }
}
