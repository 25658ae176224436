//! Typed events raised by the round engine.
//!
//! The engine produces a sequence of events over a broadcast channel; the
//! boundary adapter fans them out to whatever transport is attached. Nothing
//! in the core knows about sockets.

use super::types::{RangeBet, RangeOption, SyncInfo};
use crate::settlement::ProfitEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Capacity of the outbound broadcast channel. Slow consumers lag rather
/// than backpressure the engine.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A new round was created; bets are being accepted.
    GameStarting {
        game_id: u64,
        max_win: i64,
        time_till_start_ms: u64,
    },

    /// Bets are locked in and the multiplier is rising.
    GameStarted {
        bets: HashMap<String, i64>,
        extra_bets: HashMap<String, i64>,
        range_bets: HashMap<String, Vec<RangeBet>>,
        demos: HashMap<String, bool>,
        /// Running total of commission volume booked at round starts.
        income_total: i64,
    },

    /// Periodic progress while the round runs.
    GameTick { elapsed_ms: u64 },

    /// The round ended; the committed hash is revealed.
    GameCrash {
        game_crash: u64,
        /// True when the end was a force point or administrative stop
        /// rather than the natural bust.
        forced: bool,
        elapsed_ms: u64,
        hash: String,
    },

    /// A bet was durably admitted into the starting round.
    PlayerBet {
        username: String,
        /// Position in the join order (display only).
        index: usize,
        demo: bool,
    },

    /// A bet resolved at a multiplier, automatically or manually.
    CashedOut {
        username: String,
        stopped_at: u64,
        extra_success: bool,
        amount: i64,
    },

    /// Bankroll and risk figures refreshed from the store.
    BankrollUpdate {
        bankroll: i64,
        demo_pool: i64,
        commission_percent: f64,
    },

    /// Stake bounds and related round configuration.
    BetInfoUpdate { info: SyncInfo },

    /// The operator's current range-bet menu.
    RangeInfoUpdate { ranges: Vec<RangeOption> },

    /// Settlement finished; per-player monetary outcome of the round.
    Settled {
        game_id: u64,
        profits: HashMap<String, ProfitEntry>,
    },

    /// Shutdown was requested; the current round will finish naturally.
    ShuttingDown,

    /// The round cycle has stopped.
    Shutdown,
}

impl RoundEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::GameStarting { .. } => "game_starting",
            RoundEvent::GameStarted { .. } => "game_started",
            RoundEvent::GameTick { .. } => "game_tick",
            RoundEvent::GameCrash { .. } => "game_crash",
            RoundEvent::PlayerBet { .. } => "player_bet",
            RoundEvent::CashedOut { .. } => "cashed_out",
            RoundEvent::BankrollUpdate { .. } => "update_bankroll",
            RoundEvent::BetInfoUpdate { .. } => "update_bet_info",
            RoundEvent::RangeInfoUpdate { .. } => "update_range_info",
            RoundEvent::Settled { .. } => "settled",
            RoundEvent::ShuttingDown => "shutting_down",
            RoundEvent::Shutdown => "shutdown",
        }
    }
}
