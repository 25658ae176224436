//! Round-scoped data model.

use crate::config::BetLimits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of the live round. Transitions are monotonic within a
/// round; `Ended` is the rest state between rounds and the initial state on
/// process start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundState {
    Starting,
    Blocking,
    InProgress,
    Ended,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Starting => write!(f, "STARTING"),
            RoundState::Blocking => write!(f, "BLOCKING"),
            RoundState::InProgress => write!(f, "IN_PROGRESS"),
            RoundState::Ended => write!(f, "ENDED"),
        }
    }
}

/// Immutable identity of one round. Crash point and hash are drawn at
/// creation, before any bet is admitted, and never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    /// Committed hash, revealed when the round ends.
    pub hash: String,
    /// Previous round's revealed hash.
    pub last_hash: String,
    /// Crash point x100; 0 means instant crash.
    pub crash_point: u64,
    /// Scheduling estimate of the round's run time.
    pub duration_ms: u64,
    /// Maximum aggregate payout the house allows this round.
    pub max_win: i64,
    /// Bankroll snapshot at creation.
    pub bankroll: i64,
}

/// Account class; drives commission routing during settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserClass {
    Player,
    Agent,
    MasterIb,
    Staff,
    Admin,
}

/// Referral ancestry: a direct master referrer plus up to three ancestor
/// tiers. Fixed and non-cyclic; read-only during settlement.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lineage {
    pub master: Option<String>,
    pub parents: [Option<String>; 3],
}

/// Authenticated player identity attached to each play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    pub id: i64,
    pub username: String,
    /// Play-money account; never produces real settlement flow.
    pub demo: bool,
    pub class: UserClass,
    pub lineage: Lineage,
}

/// A stake bound to a closed crash-point interval, paid a fixed multiplier
/// (x100) when the crash point lands inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeBet {
    pub id: i64,
    pub from: u64,
    pub to: u64,
    pub multiplier: u64,
    pub amount: i64,
}

impl RangeBet {
    /// Fixed payout when the crash point lands in `[from, to]`.
    pub fn payout(&self, crash_point: u64) -> i64 {
        if crash_point >= self.from && crash_point <= self.to {
            self.amount * self.multiplier as i64 / 100
        } else {
            0
        }
    }
}

/// A bettable range offered by the operator; the menu clients pick
/// [`RangeBet`]s from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeOption {
    pub id: i64,
    pub from: u64,
    pub to: u64,
    pub multiplier: u64,
}

/// Play status; `CashedOut` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayStatus {
    Playing,
    CashedOut,
}

/// One admitted bet, owned by the engine for the round's lifetime and handed
/// to settlement by value once the round ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    pub user: UserSession,
    pub play_id: u64,
    pub bet: i64,
    /// All-or-nothing side wager, resolved only on instant crash.
    pub extra_bet: i64,
    pub range_bets: Vec<RangeBet>,
    /// Auto-cashout threshold x100; 0 for range-only plays.
    pub auto_cash_out: u64,
    pub status: PlayStatus,
    /// Realized multiplier x100 once cashed out.
    pub stopped_at: Option<u64>,
    /// Recorded payout amount (zero until a successful cashout or a winning
    /// range resolution).
    pub cash_out: i64,
}

impl Play {
    pub fn is_playing(&self) -> bool {
        self.status == PlayStatus::Playing
    }

    pub fn range_total(&self) -> i64 {
        self.range_bets.iter().map(|rb| rb.amount).sum()
    }

    pub fn total_stake(&self) -> i64 {
        self.bet + self.extra_bet + self.range_total()
    }
}

/// Per-player view used in snapshots and history entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub bet: i64,
    pub extra_bet: i64,
    pub range_bets: Vec<RangeBet>,
    pub demo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<u64>,
}

impl From<&Play> for PlayerInfo {
    fn from(play: &Play) -> Self {
        Self {
            bet: play.bet,
            extra_bet: play.extra_bet,
            range_bets: play.range_bets.clone(),
            demo: play.user.demo,
            stopped_at: play.stopped_at,
        }
    }
}

/// State snapshot served to joining clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub state: RoundState,
    pub game_id: u64,
    pub last_hash: String,
    pub max_win: i64,
    /// While starting: time until the round begins. While running: time the
    /// round has been going. After the end: time since it started.
    pub elapsed_ms: i64,
    pub player_info: HashMap<String, PlayerInfo>,
    pub joined: Vec<String>,
    pub table_history: Vec<crate::history::CompletedRound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crashed_at: Option<u64>,
}

/// Round configuration values read from the store and pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncInfo {
    pub limits: BetLimits,
    /// Payout factor for a successful extra bet.
    pub extra_bet_multiplier: i64,
    pub show_hash: bool,
}
