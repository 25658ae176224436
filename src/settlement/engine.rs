//! Per-round settlement.
//!
//! Runs once after a round ends: classifies every play, computes the player
//! leg and the commission cascade, and applies each play's settlement as one
//! durable unit. The forbidden-agent scan is a barrier; per-play application
//! is parallel with a bounded fan-out.

use super::commission::{
    commission_legs, forbidden_set, CommissionConfig, CommissionError, LegSplit,
};
use crate::config::SettlementConfig;
use crate::round::types::{Lineage, Play};
use crate::store::{with_retry, GameStore, RetryPolicy, StoreError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
pub enum SettleError {
    #[error("store failure during settlement: {0}")]
    Store(#[from] StoreError),

    #[error("commission configuration rejected: {0}")]
    Commission(#[from] CommissionError),

    #[error("settlement worker failed: {0}")]
    Worker(String),
}

/// Durable settlement outcome of one play: the player legs plus the full
/// commission cascade, applied atomically by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaySettlement {
    pub play_id: u64,
    pub user_id: i64,
    pub username: String,
    pub demo: bool,
    pub lineage: Lineage,
    /// Net profit recorded on the play (stakes excluded).
    pub player_profit: i64,
    /// Amount credited to the player's balance (stakes included where they
    /// are returned).
    pub player_credit: i64,
    pub legs: LegSplit,
}

/// Per-player outcome of a settled round, broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitEntry {
    pub player: i64,
    pub company: i64,
    pub staff: i64,
    pub master_ib: i64,
    pub parents: [i64; 3],
    pub master_username: Option<String>,
    pub parent_usernames: [Option<String>; 3],
}

impl From<&PlaySettlement> for ProfitEntry {
    fn from(record: &PlaySettlement) -> Self {
        Self {
            player: record.player_credit,
            company: record.legs.company,
            staff: record.legs.staff,
            master_ib: record.legs.master_ib,
            parents: [
                record.legs.parent1,
                record.legs.parent2,
                record.legs.parent3,
            ],
            master_username: record.lineage.master.clone(),
            parent_usernames: record.lineage.parents.clone(),
        }
    }
}

/// Classify and settle one play into its monetary legs.
///
/// Precedence: range bets, then zero-cashout busts, then cashed-out plays.
/// The agent leg, when the player keeps it, is folded into the player's own
/// credit.
fn settle_play(
    play: &Play,
    crash_point: u64,
    extra_multiplier: i64,
    config: &CommissionConfig,
    forbidden: &HashSet<String>,
) -> PlaySettlement {
    let range_total = play.range_total();

    let (player_profit, player_credit, legs) = if range_total > 0 {
        let legs = commission_legs(range_total, &play.user, forbidden, config);
        (
            (play.cash_out - range_total).max(0) + legs.agent,
            play.cash_out + legs.agent,
            legs,
        )
    } else if play.cash_out == 0 {
        let legs = commission_legs(play.bet + play.extra_bet, &play.user, forbidden, config);
        if crash_point == 0 && play.extra_bet > 0 {
            // The side wager pays and both stakes come back.
            let extra_win = play.extra_bet * extra_multiplier;
            (
                extra_win + legs.agent,
                extra_win + play.bet + play.extra_bet + legs.agent,
                legs,
            )
        } else {
            (legs.agent, legs.agent, legs)
        }
    } else {
        let legs = commission_legs(play.bet + play.extra_bet, &play.user, forbidden, config);
        (
            play.cash_out - play.bet - play.extra_bet + legs.agent,
            play.cash_out + legs.agent,
            legs,
        )
    };

    PlaySettlement {
        play_id: play.play_id,
        user_id: play.user.id,
        username: play.user.username.clone(),
        demo: play.user.demo,
        lineage: play.user.lineage.clone(),
        player_profit,
        player_credit,
        legs,
    }
}

/// Settles finished rounds against the store.
pub struct SettlementEngine<S> {
    store: Arc<S>,
    config: SettlementConfig,
}

impl<S: GameStore> SettlementEngine<S> {
    pub fn new(store: Arc<S>, config: SettlementConfig) -> Self {
        Self { store, config }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.config.retry_attempts,
            backoff: Duration::from_millis(self.config.retry_backoff_ms),
        }
    }

    /// Settle every play of a finished round. Safe to re-run after a partial
    /// failure: the store skips plays it already settled.
    pub async fn settle_round(
        &self,
        game_id: u64,
        crash_point: u64,
        plays: Vec<Play>,
    ) -> Result<HashMap<String, ProfitEntry>, SettleError> {
        if plays.is_empty() {
            return Ok(HashMap::new());
        }

        let extra_multiplier = self.store.extra_bet_multiplier().await?;
        let commission = self.store.commission_config().await?;
        commission.validate()?;
        let band = self.store.no_commission_band().await?;

        // Range plays get their payout fixed from the revealed crash point
        // before anything else looks at cash_out.
        let plays: Vec<Play> = plays
            .into_iter()
            .map(|mut play| {
                if play.range_total() > 0 {
                    play.cash_out = play
                        .range_bets
                        .iter()
                        .map(|rb| rb.payout(crash_point))
                        .sum();
                }
                play
            })
            .collect();

        // Barrier: every leg computation depends on the full forbidden set.
        let forbidden = Arc::new(forbidden_set(&plays, crash_point, &band));
        let commission = Arc::new(commission);

        let semaphore = Arc::new(Semaphore::new(self.config.fan_out.max(1)));
        let policy = self.retry_policy();
        let mut handles = Vec::with_capacity(plays.len());

        for play in plays {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SettleError::Worker(e.to_string()))?;
            let store = self.store.clone();
            let forbidden = forbidden.clone();
            let commission = commission.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let record =
                    settle_play(&play, crash_point, extra_multiplier, &commission, &forbidden);
                let entry = ProfitEntry::from(&record);

                with_retry(policy, || {
                    let store = store.clone();
                    let record = record.clone();
                    async move { store.apply_settlement(&record).await }
                })
                .await?;

                Ok::<_, StoreError>((record.username, entry))
            }));
        }

        let mut profits = HashMap::new();
        for joined in join_all(handles).await {
            let (username, entry) = joined
                .map_err(|e| SettleError::Worker(e.to_string()))??;
            profits.insert(username, entry);
        }

        tracing::info!(
            "settled round {} at {} across {} players",
            game_id,
            crash_point,
            profits.len()
        );
        Ok(profits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::types::{PlayStatus, RangeBet, UserClass, UserSession};
    use crate::store::MemoryStore;

    fn session(store: &MemoryStore, username: &str, balance: i64, demo: bool) -> UserSession {
        let id = store.add_account(username, balance, demo, UserClass::Player, Lineage::default());
        UserSession {
            id,
            username: username.to_string(),
            demo,
            class: UserClass::Player,
            lineage: Lineage::default(),
        }
    }

    fn play(user: UserSession, play_id: u64, bet: i64, cash_out: i64) -> Play {
        Play {
            user,
            play_id,
            bet,
            extra_bet: 0,
            range_bets: vec![],
            auto_cash_out: 200,
            status: if cash_out > 0 {
                PlayStatus::CashedOut
            } else {
                PlayStatus::Playing
            },
            stopped_at: (cash_out > 0).then_some(150),
            cash_out,
        }
    }

    async fn place(store: &MemoryStore, user: &UserSession, bet: i64) -> u64 {
        store
            .record_bet(&crate::store::BetRecord {
                user_id: user.id,
                game_id: 1,
                bet,
                extra_bet: 0,
                range_bets: vec![],
                auto_cash_out: 200,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn cashed_out_player_gets_payout_and_house_gets_rest() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-1", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        let alice = session(&store, "alice", 10_000, false);

        let play_id = place(&store, &alice, 1_000).await;
        store.record_cashout(alice.id, play_id, 1_500, 0).await.unwrap();

        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let mut p = play(alice.clone(), play_id, 1_000, 1_500);
        p.stopped_at = Some(150);
        let profits = engine.settle_round(1, 400, vec![p]).await.unwrap();

        let entry = &profits["alice"];
        assert_eq!(entry.player, 1_500);
        // 9000 after the debit, credited the full cashout.
        assert_eq!(store.balance_of("alice"), Some(10_500));
        // Aggregate commission of the default config is 10% of 1000.
        let aggregate = entry.company + entry.staff + entry.master_ib
            + entry.parents.iter().sum::<i64>();
        assert_eq!(aggregate, 100);
        assert_eq!(store.balance_of("staff"), Some(entry.staff));
        assert_eq!(store.balance_of("house"), Some(entry.company));
    }

    #[tokio::test]
    async fn busted_player_gets_nothing() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-2", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        let bob = session(&store, "bob", 5_000, false);
        let play_id = place(&store, &bob, 1_000).await;

        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let profits = engine
            .settle_round(1, 250, vec![play(bob, play_id, 1_000, 0)])
            .await
            .unwrap();

        assert_eq!(profits["bob"].player, 0);
        assert_eq!(store.balance_of("bob"), Some(4_000));
    }

    #[tokio::test]
    async fn extra_bet_pays_on_instant_crash() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-3", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        store.update_settings(|s| s.extra_bet_multiplier = 97);
        let eve = session(&store, "eve", 10_000, false);

        let play_id = store
            .record_bet(&crate::store::BetRecord {
                user_id: eve.id,
                game_id: 1,
                bet: 100,
                extra_bet: 10,
                range_bets: vec![],
                auto_cash_out: 200,
            })
            .await
            .unwrap();

        let mut p = play(eve, play_id, 100, 0);
        p.extra_bet = 10;

        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let profits = engine.settle_round(1, 0, vec![p]).await.unwrap();

        // 10 * 97 plus both stakes back.
        assert_eq!(profits["eve"].player, 10 * 97 + 110);
        assert_eq!(store.balance_of("eve"), Some(10_000 - 110 + 970 + 110));
    }

    #[tokio::test]
    async fn range_bet_pays_fixed_multiplier_inside_interval() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-4", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        let kim = session(&store, "kim", 10_000, false);

        let range = RangeBet {
            id: 1,
            from: 200,
            to: 400,
            multiplier: 300,
            amount: 500,
        };
        let play_id = store
            .record_bet(&crate::store::BetRecord {
                user_id: kim.id,
                game_id: 1,
                bet: 0,
                extra_bet: 0,
                range_bets: vec![range.clone()],
                auto_cash_out: 0,
            })
            .await
            .unwrap();

        let base = Play {
            user: kim,
            play_id,
            bet: 0,
            extra_bet: 0,
            range_bets: vec![range],
            auto_cash_out: 0,
            status: PlayStatus::Playing,
            stopped_at: None,
            cash_out: 0,
        };

        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        // Crash 250 lands inside [200, 400]: payout 500 * 3.00.
        let profits = engine.settle_round(1, 250, vec![base.clone()]).await.unwrap();
        assert_eq!(profits["kim"].player, 1_500);
        assert_eq!(store.balance_of("kim"), Some(10_000 - 500 + 1_500));

        // A miss pays nothing (fresh play in a new round).
        let engine2 = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let mut missed = base;
        missed.play_id = store
            .record_bet(&crate::store::BetRecord {
                user_id: missed.user.id,
                game_id: 2,
                bet: 0,
                extra_bet: 0,
                range_bets: missed.range_bets.clone(),
                auto_cash_out: 0,
            })
            .await
            .unwrap();
        let profits = engine2.settle_round(2, 800, vec![missed]).await.unwrap();
        assert_eq!(profits["kim"].player, 0);
    }

    #[tokio::test]
    async fn settlement_is_idempotent_across_retries() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-5", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        let zed = session(&store, "zed", 10_000, false);
        let play_id = place(&store, &zed, 1_000).await;
        store.record_cashout(zed.id, play_id, 2_000, 0).await.unwrap();

        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let p = play(zed, play_id, 1_000, 2_000);

        engine.settle_round(1, 300, vec![p.clone()]).await.unwrap();
        let after_first = store.balance_of("zed");
        let legs = store.settled_legs(play_id).expect("legs recorded");
        assert_eq!(legs.staff, store.balance_of("staff").unwrap());

        // A full re-run (as the engine does when a round partially failed)
        // must not double-credit.
        engine.settle_round(1, 300, vec![p]).await.unwrap();
        assert_eq!(store.balance_of("zed"), after_first);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = Arc::new(MemoryStore::with_terminal_seed("settle-6", 8));
        store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
        store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
        let ann = session(&store, "ann", 10_000, false);
        let play_id = place(&store, &ann, 1_000).await;
        store.record_cashout(ann.id, play_id, 1_200, 0).await.unwrap();

        store.inject_transient_failures(2);
        let engine = SettlementEngine::new(store.clone(), SettlementConfig::default());
        let profits = engine
            .settle_round(1, 300, vec![play(ann, play_id, 1_000, 1_200)])
            .await
            .unwrap();
        assert_eq!(profits["ann"].player, 1_200);
    }
}
