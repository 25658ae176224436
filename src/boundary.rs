//! Boundary adapter: the validated command surface in front of the engine.
//!
//! Transports (sockets, HTTP, a test harness) hold an [`EngineHandle`],
//! validate caller input against the store's configured limits, and forward
//! well-formed commands to the engine task. Events flow the other way
//! through [`EngineHandle::subscribe`]. Chat traffic never touches the
//! engine and is routed to its own collaborator by the transport.

use crate::errors::{EngineError, RejectReason};
use crate::round::engine::Command;
use crate::round::events::RoundEvent;
use crate::round::types::{RangeBet, RoundSnapshot, UserSession};
use crate::store::GameStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// A range-bet selection by menu id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RangeStake {
    pub range_id: i64,
    pub amount: i64,
}

/// A validated-at-the-boundary bet request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    pub bet: i64,
    pub extra_bet: i64,
    /// Auto-cashout threshold x100; required for primary stakes, must be
    /// zero for range-only plays.
    pub auto_cash_out: u64,
    pub range_bets: Vec<RangeStake>,
}

/// Cloneable front for the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<RoundEvent>,
    store: Arc<dyn GameStore>,
}

impl EngineHandle {
    pub(crate) fn new(
        cmd_tx: mpsc::Sender<Command>,
        events: broadcast::Sender<RoundEvent>,
        store: Arc<dyn GameStore>,
    ) -> Self {
        Self {
            cmd_tx,
            events,
            store,
        }
    }

    /// Subscribe to the engine's outbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    /// Validate and forward a bet. Resolves range selections against the
    /// operator's range menu; malformed requests never reach the engine.
    pub async fn place_bet(
        &self,
        user: UserSession,
        request: BetRequest,
    ) -> Result<u64, RejectReason> {
        let range_bets = self.validate_bet(&request).await?;

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PlaceBet {
                user,
                bet: request.bet,
                extra_bet: request.extra_bet,
                range_bets,
                auto_cash_out: request.auto_cash_out,
                reply,
            })
            .await
            .map_err(|_| RejectReason::InternalError)?;
        rx.await.map_err(|_| RejectReason::InternalError)?
    }

    /// Cash the caller's bet out at the current multiplier. Returns the
    /// realized multiplier (x100).
    pub async fn cash_out(&self, username: &str) -> Result<u64, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CashOut {
                username: username.to_string(),
                reply,
            })
            .await
            .map_err(|_| RejectReason::InternalError)?;
        rx.await.map_err(|_| RejectReason::InternalError)?
    }

    /// Administrative: settle every still-playing bet at `at` (x100).
    pub async fn cash_out_all(&self, at: u64) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::CashOutAll { at })
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    /// Administrative force-finish. Ignored for a stale `game_id`, in which
    /// case the round falls back to a fixed high crash point.
    pub async fn finish_round(
        &self,
        elapsed_ms: u64,
        multiplier: Option<f64>,
        game_id: u64,
    ) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::FinishRound {
                elapsed_ms,
                multiplier,
                game_id,
            })
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    /// Administrative: force the next round's crash point to 0. Consumed
    /// once.
    pub async fn set_next_zero(&self) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::SetNextZero)
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    /// Let the current round finish naturally, then stop the cycle.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.cmd_tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| EngineError::EngineStopped)
    }

    /// Snapshot for a joining client.
    pub async fn info(&self) -> Result<RoundSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Info { reply })
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }

    /// Caller-input validation: stake bounds, auto-cashout shape, range
    /// menu resolution. Runs in front of the engine so malformed commands
    /// never reach it.
    async fn validate_bet(&self, request: &BetRequest) -> Result<Vec<RangeBet>, RejectReason> {
        if request.bet < 0 || request.extra_bet < 0 {
            return Err(RejectReason::PlaceBetError);
        }

        let info = self
            .store
            .sync_info()
            .await
            .map_err(|_| RejectReason::InternalError)?;
        let limits = info.limits;

        if request.range_bets.is_empty() {
            if request.bet < limits.min_bet || request.bet > limits.max_bet {
                return Err(RejectReason::PlaceBetError);
            }
            if request.auto_cash_out < 100 {
                return Err(RejectReason::PlaceBetError);
            }
            if request.extra_bet != 0
                && (request.extra_bet < limits.min_extra_bet
                    || request.extra_bet > limits.max_extra_bet)
            {
                return Err(RejectReason::PlaceBetError);
            }
            return Ok(Vec::new());
        }

        // Range-only play: no primary stake, no auto-cashout.
        if request.bet != 0 || request.extra_bet != 0 || request.auto_cash_out != 0 {
            return Err(RejectReason::PlaceBetError);
        }

        let menu = self
            .store
            .range_options()
            .await
            .map_err(|_| RejectReason::InternalError)?;

        let mut resolved = Vec::with_capacity(request.range_bets.len());
        for stake in &request.range_bets {
            if stake.amount < limits.min_range_bet || stake.amount > limits.max_range_bet {
                return Err(RejectReason::PlaceBetError);
            }
            let option = menu
                .iter()
                .find(|option| option.id == stake.range_id)
                .ok_or(RejectReason::PlaceBetError)?;
            resolved.push(RangeBet {
                id: option.id,
                from: option.from,
                to: option.to,
                multiplier: option.multiplier,
                amount: stake.amount,
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::types::{Lineage, UserClass};
    use crate::store::MemoryStore;

    fn handle_without_engine(store: Arc<MemoryStore>) -> EngineHandle {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(8);
        EngineHandle::new(cmd_tx, events, store)
    }

    fn request(bet: i64, auto: u64) -> BetRequest {
        BetRequest {
            bet,
            extra_bet: 0,
            auto_cash_out: auto,
            range_bets: vec![],
        }
    }

    #[tokio::test]
    async fn rejects_stakes_outside_limits() {
        let store = Arc::new(MemoryStore::with_terminal_seed("boundary", 4));
        store.add_account("u", 10_000, false, UserClass::Player, Lineage::default());
        let handle = handle_without_engine(store);

        // Below the minimum stake.
        let err = handle.validate_bet(&request(1, 200)).await.unwrap_err();
        assert_eq!(err, RejectReason::PlaceBetError);

        // Missing auto-cashout.
        let err = handle.validate_bet(&request(500, 0)).await.unwrap_err();
        assert_eq!(err, RejectReason::PlaceBetError);

        assert!(handle.validate_bet(&request(500, 150)).await.is_ok());
    }

    #[tokio::test]
    async fn resolves_range_selections_against_menu() {
        let store = Arc::new(MemoryStore::with_terminal_seed("boundary-2", 4));
        let handle = handle_without_engine(store);

        let ok = handle
            .validate_bet(&BetRequest {
                bet: 0,
                extra_bet: 0,
                auto_cash_out: 0,
                range_bets: vec![RangeStake { range_id: 1, amount: 500 }],
            })
            .await
            .unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].amount, 500);

        // Unknown menu id.
        let err = handle
            .validate_bet(&BetRequest {
                bet: 0,
                extra_bet: 0,
                auto_cash_out: 0,
                range_bets: vec![RangeStake { range_id: 99, amount: 500 }],
            })
            .await
            .unwrap_err();
        assert_eq!(err, RejectReason::PlaceBetError);

        // Range plays cannot carry an auto-cashout.
        let err = handle
            .validate_bet(&BetRequest {
                bet: 0,
                extra_bet: 0,
                auto_cash_out: 150,
                range_bets: vec![RangeStake { range_id: 1, amount: 500 }],
            })
            .await
            .unwrap_err();
        assert_eq!(err, RejectReason::PlaceBetError);
    }
}
