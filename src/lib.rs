//! crashd - provably-fair crash-round betting engine.
//!
//! A continuously repeating multiplier round: players stake before the
//! round starts, a hidden crash point is pre-committed via a hash, and the
//! multiplier rises until the crash point is reached or the player cashes
//! out. The engine guarantees the crash point cannot be influenced after
//! bets close, bounds the house's per-round exposure with a dynamic force
//! point, and settles each round's bets through a multi-tier referral
//! commission split. Storage and transport are abstract collaborators.

pub mod boundary;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod growth;
pub mod history;
pub mod round;
pub mod settlement;
pub mod store;

pub use boundary::{BetRequest, EngineHandle, RangeStake};
pub use config::{BetLimits, EngineConfig};
pub use errors::{EngineError, RejectReason};
pub use round::{RoundEngine, RoundEvent, RoundSnapshot, RoundState, UserSession};
pub use settlement::{CommissionConfig, NoCommissionBand, SettlementEngine};
pub use store::{GameStore, MemoryStore, StoreError};
