//! Error types shared across the engine.
//!
//! Caller-facing failures are short symbolic reason codes; internal detail
//! stays in the logs.

use serde::{Deserialize, Serialize};

/// Business-rule rejection surfaced to a caller.
///
/// Serialized as the wire-level reason code, never an internal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Bets are only accepted while a round is starting.
    #[error("GAME_IN_PROGRESS")]
    GameInProgress,

    /// One bet per player per round.
    #[error("ALREADY_PLACED_BET")]
    AlreadyPlacedBet,

    /// Stake exceeds the caller's balance.
    #[error("NOT_ENOUGH_MONEY")]
    NotEnoughMoney,

    /// Malformed stake/auto-cashout combination.
    #[error("PLACE_BET_ERROR")]
    PlaceBetError,

    /// Cashing out requires a running round.
    #[error("GAME_NOT_IN_PROGRESS")]
    GameNotInProgress,

    /// The caller has no bet in this round.
    #[error("NO_BET_PLACED")]
    NoBetPlaced,

    /// The clamped cashout point lies past the crash point.
    #[error("GAME_ALREADY_CRASHED")]
    GameAlreadyCrashed,

    /// The bet was already settled by an earlier cashout.
    #[error("ALREADY_CASHED_OUT")]
    AlreadyCashedOut,

    /// Persistence failed after retries; the operation was not applied.
    #[error("INTERNAL_ERROR")]
    InternalError,
}

/// Failures of the engine surface itself (not of a single bet).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine task is gone; commands can no longer be delivered.
    #[error("engine is not running")]
    EngineStopped,
}
