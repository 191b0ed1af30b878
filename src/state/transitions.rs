//! Pure scoreboard transitions. Each takes the current scoreboard and returns a
//! new one, or fails without touching the input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::game::{DISQUALIFYING_FOULS, GameStatus, Scoreboard, Side};

/// Tenths of a second in one minute; below this the clock ticks in tenths.
const TENTHS_PER_MINUTE: u64 = 600;

/// Validation failures raised before any state is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Team tag other than `A` or `B`.
    #[error("unknown team tag `{0}`")]
    UnknownTeam(String),
    /// Player index outside of the team roster.
    #[error("player #{index} does not exist in team {side} (roster has {roster} players)")]
    PlayerOutOfRange {
        /// Team the foul was attributed to.
        side: Side,
        /// Requested roster index.
        index: usize,
        /// Roster length.
        roster: usize,
    },
    /// Periods are numbered from 1.
    #[error("period must be at least 1 (got {0})")]
    InvalidPeriod(u32),
    /// The game clock cannot start with no time on it.
    #[error("game clock has no time remaining")]
    ClockExpired,
    /// The game is archived and read-only.
    #[error("game is finished and can no longer change")]
    GameFinished,
    /// Clock fields outside their unit ranges.
    #[error("clock reading {seconds}s {tenths}/10 is out of range")]
    InvalidClock {
        /// Seconds within the minute, below 60.
        seconds: u32,
        /// Tenths within the second, below 10.
        tenths: u32,
    },
}

/// Side effects a caller must surface to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// The game clock reached zero and stopped.
    PeriodExpired {
        /// Period that just ended.
        period: u32,
    },
    /// The shot clock reached zero and stopped.
    ShotClockViolation,
    /// A player reached the foul limit.
    PlayerDisqualified {
        /// Team of the player.
        side: Side,
        /// Roster index of the player.
        player: usize,
    },
}

/// New scoreboard plus the signals raised while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Resulting scoreboard.
    pub scoreboard: Scoreboard,
    /// Signals raised by this transition, in order.
    pub signals: Vec<Signal>,
}

impl Outcome {
    fn quiet(scoreboard: Scoreboard) -> Self {
        Self {
            scoreboard,
            signals: Vec::new(),
        }
    }
}

/// Serialisable description of a transition, used as the queued action payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Add `delta` points to a team, clamped at zero.
    Score {
        /// Team.
        team: Side,
        /// Points to add; negative values correct mistakes.
        delta: i32,
    },
    /// Add `delta` fouls to a team and optionally to one of its players.
    Foul {
        /// Team.
        team: Side,
        /// Fouls to add.
        delta: i32,
        /// Roster index of the player charged with the foul.
        #[serde(default)]
        player: Option<usize>,
    },
    /// Add `delta` to a team's remaining timeouts, clamped at zero.
    Timeout {
        /// Team.
        team: Side,
        /// Timeouts to add; a called timeout is `-1`.
        delta: i32,
    },
    /// One tick of the game clock.
    TickClock,
    /// One tick of the shot clock.
    TickShotClock,
    /// Move to another period.
    AdvancePeriod {
        /// Period to move to.
        next: u32,
    },
    /// Give the ball to the other team.
    TogglePossession,
    /// Start or stop the game clock.
    SetClockRunning {
        /// Desired state.
        running: bool,
    },
    /// Start or stop the shot clock.
    SetShotClockRunning {
        /// Desired state.
        running: bool,
    },
    /// Put the shot clock back to `seconds`, or the rule set length.
    ResetShotClock {
        /// Explicit value, e.g. 14 after an offensive rebound.
        #[serde(default)]
        seconds: Option<u32>,
    },
    /// Mark the game as finished and archive it.
    Finish,
}

impl Transition {
    /// Apply this transition to `board`.
    pub fn apply(&self, board: &Scoreboard) -> Result<Outcome, TransitionError> {
        match *self {
            Transition::Score { team, delta } => apply_score(board, team, delta),
            Transition::Foul {
                team,
                delta,
                player,
            } => apply_foul(board, team, delta, player),
            Transition::Timeout { team, delta } => apply_timeout(board, team, delta),
            Transition::TickClock => tick_clock(board),
            Transition::TickShotClock => tick_shot_clock(board),
            Transition::AdvancePeriod { next } => advance_period(board, next),
            Transition::TogglePossession => toggle_possession(board),
            Transition::SetClockRunning { running } => set_clock_running(board, running),
            Transition::SetShotClockRunning { running } => set_shot_clock_running(board, running),
            Transition::ResetShotClock { seconds } => reset_shot_clock(board, seconds),
            Transition::Finish => finish(board),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Score { .. } => "score",
            Transition::Foul { .. } => "foul",
            Transition::Timeout { .. } => "timeout",
            Transition::TickClock => "tick_clock",
            Transition::TickShotClock => "tick_shot_clock",
            Transition::AdvancePeriod { .. } => "advance_period",
            Transition::TogglePossession => "toggle_possession",
            Transition::SetClockRunning { .. } => "set_clock_running",
            Transition::SetShotClockRunning { .. } => "set_shot_clock_running",
            Transition::ResetShotClock { .. } => "reset_shot_clock",
            Transition::Finish => "finish",
        }
    }
}

fn clamped_add(value: u32, delta: i32) -> u32 {
    (i64::from(value) + i64::from(delta)).clamp(0, i64::from(u32::MAX)) as u32
}

fn editable(board: &Scoreboard) -> Result<Scoreboard, TransitionError> {
    if board.is_finished() {
        return Err(TransitionError::GameFinished);
    }
    Ok(board.clone())
}

/// Check a wholesale replacement of `board` by `next`.
pub fn replace(board: &Scoreboard, next: Scoreboard) -> Result<Scoreboard, TransitionError> {
    editable(board)?;
    if next.clock.period == 0 {
        return Err(TransitionError::InvalidPeriod(0));
    }
    if next.clock.seconds >= 60 || next.clock.tenths >= 10 {
        return Err(TransitionError::InvalidClock {
            seconds: next.clock.seconds,
            tenths: next.clock.tenths,
        });
    }
    Ok(next)
}

/// Add `delta` points to `side`; overshooting below zero clamps instead of failing.
pub fn apply_score(board: &Scoreboard, side: Side, delta: i32) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    let team = next.team_mut(side);
    team.score = clamped_add(team.score, delta);
    Ok(Outcome::quiet(next))
}

/// Add `delta` fouls to `side` and to the per-period counter, optionally
/// charging the roster entry at `player`.
pub fn apply_foul(
    board: &Scoreboard,
    side: Side,
    delta: i32,
    player: Option<usize>,
) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    let mut signals = Vec::new();
    let team = next.team_mut(side);

    if let Some(index) = player {
        let roster = team.roster.len();
        let entry = team
            .roster
            .get_mut(index)
            .ok_or(TransitionError::PlayerOutOfRange {
                side,
                index,
                roster,
            })?;
        entry.fouls = clamped_add(entry.fouls, delta);
        if entry.fouls >= DISQUALIFYING_FOULS && !entry.disqualified {
            entry.disqualified = true;
            signals.push(Signal::PlayerDisqualified {
                side,
                player: index,
            });
        }
    }

    team.fouls = clamped_add(team.fouls, delta);
    team.fouls_this_period = clamped_add(team.fouls_this_period, delta);

    Ok(Outcome {
        scoreboard: next,
        signals,
    })
}

/// Add `delta` to the timeouts left for `side`. Only non-negativity is enforced.
pub fn apply_timeout(
    board: &Scoreboard,
    side: Side,
    delta: i32,
) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    let team = next.team_mut(side);
    team.timeouts = clamped_add(team.timeouts, delta);
    Ok(Outcome::quiet(next))
}

/// Decrement the running game clock by one second, or one tenth under a
/// minute. Reaching zero stops the clock and raises [`Signal::PeriodExpired`].
pub fn tick_clock(board: &Scoreboard) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    if !next.clock.running {
        return Ok(Outcome::quiet(next));
    }

    let remaining = next.clock.remaining_tenths();
    let step = if remaining >= TENTHS_PER_MINUTE { 10 } else { 1 };
    let left = remaining.saturating_sub(step);
    next.clock.set_remaining_tenths(left);

    let mut signals = Vec::new();
    if left == 0 {
        next.clock.running = false;
        signals.push(Signal::PeriodExpired {
            period: next.clock.period,
        });
    }

    Ok(Outcome {
        scoreboard: next,
        signals,
    })
}

/// Decrement the running shot clock by one second, independently of the game
/// clock. Reaching zero stops it and raises [`Signal::ShotClockViolation`].
pub fn tick_shot_clock(board: &Scoreboard) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    if !next.shot_clock.running {
        return Ok(Outcome::quiet(next));
    }

    next.shot_clock.seconds = next.shot_clock.seconds.saturating_sub(1);
    let mut signals = Vec::new();
    if next.shot_clock.seconds == 0 {
        next.shot_clock.running = false;
        signals.push(Signal::ShotClockViolation);
    }

    Ok(Outcome {
        scoreboard: next,
        signals,
    })
}

/// Move to period `period`, resetting per-period fouls and the clocks.
///
/// Entering the second half grants the second-half timeout allotment. Past
/// regulation the period is played on the overtime length and each team gets
/// the overtime allotment.
pub fn advance_period(board: &Scoreboard, period: u32) -> Result<Outcome, TransitionError> {
    if period == 0 {
        return Err(TransitionError::InvalidPeriod(period));
    }

    let mut next = editable(board)?;
    let rules = next.rules.clone();
    let current = next.clock.period;

    for side in [Side::A, Side::B] {
        next.team_mut(side).fouls_this_period = 0;
    }

    let minutes = if rules.is_overtime(period) {
        for side in [Side::A, Side::B] {
            next.team_mut(side).timeouts = rules.timeouts_overtime;
        }
        rules.overtime_minutes
    } else {
        let half_end = rules.first_half_end();
        if current <= half_end && period > half_end {
            for side in [Side::A, Side::B] {
                next.team_mut(side).timeouts = rules.timeouts_second_half;
            }
        }
        rules.period_minutes
    };

    next.clock.period = period;
    next.clock.minutes = minutes;
    next.clock.seconds = 0;
    next.clock.tenths = 0;
    next.clock.running = false;
    next.shot_clock.seconds = rules.shot_clock_seconds;
    next.shot_clock.running = false;

    Ok(Outcome::quiet(next))
}

/// Give possession to the other team.
pub fn toggle_possession(board: &Scoreboard) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    next.possession = next.possession.other();
    Ok(Outcome::quiet(next))
}

/// Start or stop the game clock. Starting an expired clock is rejected.
pub fn set_clock_running(board: &Scoreboard, running: bool) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    if running && next.clock.is_expired() {
        return Err(TransitionError::ClockExpired);
    }
    next.clock.running = running;
    Ok(Outcome::quiet(next))
}

/// Start or stop the shot clock.
pub fn set_shot_clock_running(
    board: &Scoreboard,
    running: bool,
) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    next.shot_clock.running = running && next.shot_clock.seconds > 0;
    Ok(Outcome::quiet(next))
}

/// Put the shot clock back to `seconds`, defaulting to the rule set length.
pub fn reset_shot_clock(
    board: &Scoreboard,
    seconds: Option<u32>,
) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    next.shot_clock.seconds = seconds.unwrap_or(next.rules.shot_clock_seconds);
    Ok(Outcome::quiet(next))
}

/// Stop every clock and archive the game.
pub fn finish(board: &Scoreboard) -> Result<Outcome, TransitionError> {
    let mut next = editable(board)?;
    next.clock.running = false;
    next.shot_clock.running = false;
    next.status = GameStatus::Finished;
    Ok(Outcome::quiet(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::{Player, RuleSet, TeamState};

    fn board() -> Scoreboard {
        let mut home = TeamState::new("Hawks", "#aa0000", 0);
        home.roster = vec![Player::new("4", "Ada"), Player::new("7", "Bo")];
        let away = TeamState::new("Owls", "#0000aa", 0);
        Scoreboard::new(home, away, RuleSet::default())
    }

    fn run(board: &Scoreboard, transitions: &[Transition]) -> Scoreboard {
        transitions.iter().fold(board.clone(), |current, transition| {
            transition.apply(&current).unwrap().scoreboard
        })
    }

    #[test]
    fn score_and_foul_sequence_from_a_fresh_game() {
        let start = board();
        assert_eq!(start.clock.minutes, 10);
        assert_eq!(start.clock.period, 1);

        let next = run(
            &start,
            &[
                Transition::Score {
                    team: Side::A,
                    delta: 2,
                },
                Transition::Score {
                    team: Side::A,
                    delta: -1,
                },
                Transition::Foul {
                    team: Side::A,
                    delta: 1,
                    player: None,
                },
            ],
        );

        assert_eq!(next.home.score, 1);
        assert_eq!(next.home.fouls, 1);
        assert_eq!(next.home.fouls_this_period, 1);
    }

    #[test]
    fn score_never_goes_below_zero() {
        let deltas = [3, -5, 2, -1, -1, -100, 7, -3, 1];
        let mut current = board();
        for delta in deltas {
            current = apply_score(&current, Side::B, delta).unwrap().scoreboard;
            assert!(current.away.score <= 100);
        }
        assert_eq!(current.away.score, 5);

        let floored = apply_score(&board(), Side::A, i32::MIN).unwrap();
        assert_eq!(floored.scoreboard.home.score, 0);
    }

    #[test]
    fn timeout_below_zero_stays_at_zero_without_error() {
        let mut start = board();
        start.away.timeouts = 0;
        let next = apply_timeout(&start, Side::B, -1).unwrap();
        assert_eq!(next.scoreboard.away.timeouts, 0);
        assert!(next.signals.is_empty());
    }

    #[test]
    fn fifth_foul_disqualifies_and_stays_sticky() {
        let mut current = board();
        let mut disqualifications = 0;
        for _ in 0..5 {
            let outcome = apply_foul(&current, Side::A, 1, Some(1)).unwrap();
            disqualifications += outcome
                .signals
                .iter()
                .filter(|signal| matches!(signal, Signal::PlayerDisqualified { player: 1, .. }))
                .count();
            current = outcome.scoreboard;
        }
        assert!(current.home.roster[1].disqualified);
        assert_eq!(disqualifications, 1);

        let corrected = apply_foul(&current, Side::A, -3, Some(1)).unwrap();
        assert!(corrected.scoreboard.home.roster[1].disqualified);
        assert!(corrected.signals.is_empty());

        let more = apply_foul(&corrected.scoreboard, Side::A, 4, Some(1)).unwrap();
        assert!(more.scoreboard.home.roster[1].disqualified);
        assert!(more.signals.is_empty());
    }

    #[test]
    fn foul_for_unknown_player_fails_without_mutation() {
        let start = board();
        let err = apply_foul(&start, Side::B, 1, Some(0)).unwrap_err();
        assert_eq!(
            err,
            TransitionError::PlayerOutOfRange {
                side: Side::B,
                index: 0,
                roster: 0
            }
        );
        assert_eq!(start.away.fouls, 0);
    }

    #[test]
    fn clock_at_zero_stops_and_signals_once() {
        let mut start = board();
        start.clock.minutes = 0;
        start.clock.running = true;

        let first = tick_clock(&start).unwrap();
        assert!(!first.scoreboard.clock.running);
        assert_eq!(first.scoreboard.clock.remaining_tenths(), 0);
        assert_eq!(first.signals, vec![Signal::PeriodExpired { period: 1 }]);

        let second = tick_clock(&first.scoreboard).unwrap();
        assert!(second.signals.is_empty());
        assert_eq!(second.scoreboard.clock.remaining_tenths(), 0);
    }

    #[test]
    fn clock_ticks_seconds_then_tenths() {
        let mut start = board();
        start.clock.minutes = 1;
        start.clock.running = true;

        let next = tick_clock(&start).unwrap().scoreboard;
        assert_eq!((next.clock.minutes, next.clock.seconds, next.clock.tenths), (0, 59, 0));

        let next = tick_clock(&next).unwrap().scoreboard;
        assert_eq!((next.clock.minutes, next.clock.seconds, next.clock.tenths), (0, 58, 9));
    }

    #[test]
    fn clock_reaching_zero_by_tick_signals() {
        let mut start = board();
        start.clock.minutes = 0;
        start.clock.tenths = 1;
        start.clock.running = true;
        let outcome = tick_clock(&start).unwrap();
        assert_eq!(outcome.signals.len(), 1);
        assert!(!outcome.scoreboard.clock.running);
    }

    #[test]
    fn shot_clock_violation_is_independent_of_game_clock() {
        let mut start = board();
        start.shot_clock.seconds = 1;
        start.shot_clock.running = true;
        start.clock.running = false;

        let outcome = tick_shot_clock(&start).unwrap();
        assert_eq!(outcome.signals, vec![Signal::ShotClockViolation]);
        assert!(!outcome.scoreboard.shot_clock.running);
        assert!(!outcome.scoreboard.clock.running);
        assert_eq!(outcome.scoreboard.clock, start.clock);
    }

    #[test]
    fn second_half_and_overtime_reset_allotments() {
        let mut current = board();
        current.home.fouls_this_period = 4;
        current.home.timeouts = 0;

        current = advance_period(&current, 2).unwrap().scoreboard;
        assert_eq!(current.home.fouls_this_period, 0);
        assert_eq!(current.home.timeouts, 0);

        current = advance_period(&current, 3).unwrap().scoreboard;
        assert_eq!(current.home.timeouts, 3);
        assert_eq!(current.away.timeouts, 3);
        assert_eq!(current.clock.minutes, 10);

        current = advance_period(&current, 4).unwrap().scoreboard;
        current = advance_period(&current, 5).unwrap().scoreboard;
        assert_eq!(current.clock.period, 5);
        assert_eq!(current.clock.minutes, 5);
        assert_eq!(current.home.timeouts, 1);
        assert_eq!(current.away.timeouts, 1);
    }

    #[test]
    fn period_zero_is_rejected() {
        assert_eq!(
            advance_period(&board(), 0).unwrap_err(),
            TransitionError::InvalidPeriod(0)
        );
    }

    #[test]
    fn possession_flips_between_two_states() {
        let start = board();
        let once = toggle_possession(&start).unwrap().scoreboard;
        let twice = toggle_possession(&once).unwrap().scoreboard;
        assert_eq!(once.possession, Side::B);
        assert_eq!(twice.possession, Side::A);
    }

    #[test]
    fn finished_game_rejects_transitions() {
        let done = finish(&board()).unwrap().scoreboard;
        assert!(done.is_finished());
        assert_eq!(
            apply_score(&done, Side::A, 2).unwrap_err(),
            TransitionError::GameFinished
        );
    }

    #[test]
    fn expired_clock_cannot_start() {
        let mut start = board();
        start.clock.minutes = 0;
        assert_eq!(
            set_clock_running(&start, true).unwrap_err(),
            TransitionError::ClockExpired
        );
    }

    #[test]
    fn transitions_round_trip_through_queue_payloads() {
        let transition = Transition::Foul {
            team: Side::B,
            delta: 1,
            player: Some(3),
        };
        let value = serde_json::to_value(&transition).unwrap();
        assert_eq!(value["type"], "foul");
        assert_eq!(value["team"], "B");
        let back: Transition = serde_json::from_value(value).unwrap();
        assert_eq!(back, transition);

        let unknown = serde_json::json!({"type": "score", "team": "C", "delta": 1});
        assert!(serde_json::from_value::<Transition>(unknown).is_err());
    }

    #[test]
    fn replace_checks_the_clock_and_the_archive() {
        let board = board();
        let mut next = board.clone();
        next.home.score = 12;
        assert_eq!(replace(&board, next.clone()).unwrap(), next);

        let mut bad_period = board.clone();
        bad_period.clock.period = 0;
        assert_eq!(replace(&board, bad_period), Err(TransitionError::InvalidPeriod(0)));

        let mut bad_seconds = board.clone();
        bad_seconds.clock.seconds = 60;
        assert!(matches!(
            replace(&board, bad_seconds),
            Err(TransitionError::InvalidClock { seconds: 60, .. })
        ));

        let mut bad_tenths = board.clone();
        bad_tenths.clock.tenths = 10;
        assert!(replace(&board, bad_tenths).is_err());

        let finished = finish(&board).unwrap().scoreboard;
        let mut reopened = finished.clone();
        reopened.status = GameStatus::InProgress;
        assert_eq!(replace(&finished, reopened), Err(TransitionError::GameFinished));
    }
}
