//! Persistence collaborator boundary.
//!
//! The engine never talks to a database directly; everything durable goes
//! through [`GameStore`]. Balance-moving operations are transactional per
//! logical operation and transparently retried on transient write conflicts
//! via [`with_retry`]. [`MemoryStore`] is a complete in-process
//! implementation backing the binary and the tests, and doubles as the
//! reference semantics for a SQL-backed store.

use crate::config::BetLimits;
use crate::fairness::{self, FairnessMode, Interval, IntervalTable};
use crate::round::types::{Lineage, RangeBet, RangeOption, SyncInfo, UserClass};
use crate::settlement::{CommissionConfig, LegSplit, NoCommissionBand, PlaySettlement};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Balance constraint rejected the debit.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The play was already settled by an earlier write.
    #[error("already settled")]
    AlreadySettled,

    /// Serialization/deadlock class failure; safe to retry the whole
    /// transaction.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt or inconsistent data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Crash point and hash committed for a newly created round.
#[derive(Debug, Clone)]
pub struct RoundSeed {
    pub crash_point: u64,
    pub hash: String,
}

/// Everything needed to durably record one admitted bet.
#[derive(Debug, Clone)]
pub struct BetRecord {
    pub user_id: i64,
    pub game_id: u64,
    pub bet: i64,
    pub extra_bet: i64,
    pub range_bets: Vec<RangeBet>,
    pub auto_cash_out: u64,
}

impl BetRecord {
    pub fn total_stake(&self) -> i64 {
        self.bet + self.extra_bet + self.range_bets.iter().map(|rb| rb.amount).sum::<i64>()
    }
}

/// Abstract persistence contract. Exact storage shape is out of scope; a
/// SQL implementation maps each method onto one transaction.
///
/// `apply_settlement` must be idempotent per play: re-applying an
/// already-settled play is accepted and skipped, so a partially settled
/// round can be retried as a whole.
#[async_trait]
pub trait GameStore: Send + Sync + 'static {
    /// Draw the committed crash point and hash for `game_id`.
    async fn create_round(&self, game_id: u64) -> Result<RoundSeed, StoreError>;

    /// Debit the stake and record the play. Returns the play id.
    async fn record_bet(&self, record: &BetRecord) -> Result<u64, StoreError>;

    /// Record a cashout. Fails with [`StoreError::AlreadySettled`] when the
    /// play already has a recorded payout.
    async fn record_cashout(
        &self,
        user_id: i64,
        play_id: u64,
        payout: i64,
        extra_payout: i64,
    ) -> Result<(), StoreError>;

    /// Persist one play's settlement record and apply its balance cascade
    /// as a single unit.
    async fn apply_settlement(&self, record: &PlaySettlement) -> Result<(), StoreError>;

    async fn bankroll(&self) -> Result<i64, StoreError>;
    async fn demo_pool(&self) -> Result<i64, StoreError>;

    /// Bankroll fraction (percent) a single round may pay out.
    async fn max_profit_percent(&self) -> Result<f64, StoreError>;
    async fn aggregate_commission_percent(&self) -> Result<f64, StoreError>;
    async fn extra_bet_multiplier(&self) -> Result<i64, StoreError>;
    async fn commission_config(&self) -> Result<CommissionConfig, StoreError>;
    async fn no_commission_band(&self) -> Result<NoCommissionBand, StoreError>;
    async fn sync_info(&self) -> Result<SyncInfo, StoreError>;
    async fn range_options(&self) -> Result<Vec<RangeOption>, StoreError>;
    async fn fairness_mode(&self) -> Result<FairnessMode, StoreError>;
    async fn interval_rows(&self) -> Result<Option<Vec<Interval>>, StoreError>;

    /// Book commission volume taken at round start; returns the running
    /// total.
    async fn record_income(&self, amount: i64) -> Result<i64, StoreError>;
}

/// Bounded retry for transactional store operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Re-run `op` (the whole transaction) on transient failures, up to the
/// policy's attempt count. Non-transient errors surface immediately.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt + 1 < policy.attempts.max(1) => {
                attempt += 1;
                tracing::warn!("transient store failure (attempt {}): {}", attempt, err);
                tokio::time::sleep(policy.backoff).await;
            }
            other => return other,
        }
    }
}

/// One account row of the in-memory store.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub balance: i64,
    pub demo: bool,
    pub class: UserClass,
    pub lineage: Lineage,
}

#[derive(Debug, Clone)]
struct PlayRow {
    username: String,
    cash_out: i64,
    settled: bool,
    legs: Option<LegSplit>,
}

/// Operator-tunable values a SQL store would keep in a settings table.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub max_profit_percent: f64,
    pub extra_bet_multiplier: i64,
    pub commission: CommissionConfig,
    pub band: NoCommissionBand,
    pub limits: BetLimits,
    pub show_hash: bool,
    pub fairness_mode: FairnessMode,
    pub interval_rows: Option<Vec<Interval>>,
    pub range_options: Vec<RangeOption>,
    /// Operator top-up added on top of the computed bankroll.
    pub gaming_pool: i64,
    /// Seed balance of the demo pool.
    pub demo_deposit_pool: i64,
    /// Account receiving the company leg.
    pub company_account: String,
    /// Account receiving the staff leg.
    pub staff_account: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_profit_percent: 3.0,
            extra_bet_multiplier: 97,
            commission: CommissionConfig::default(),
            band: NoCommissionBand::default(),
            limits: BetLimits::default(),
            show_hash: true,
            fairness_mode: FairnessMode::Uniform,
            interval_rows: None,
            range_options: vec![
                RangeOption { id: 1, from: 0, to: 150, multiplier: 300 },
                RangeOption { id: 2, from: 150, to: 300, multiplier: 250 },
                RangeOption { id: 3, from: 300, to: 1_000, multiplier: 400 },
            ],
            gaming_pool: 0,
            demo_deposit_pool: 0,
            company_account: "house".to_string(),
            staff_account: "staff".to_string(),
        }
    }
}

/// Complete in-process [`GameStore`].
///
/// Hashes are a pre-generated chain (each round's hash is the SHA-256 of the
/// next round's), so revealed hashes are verifiable back through history.
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    usernames_by_id: DashMap<i64, String>,
    plays: DashMap<u64, PlayRow>,
    chain: Vec<String>,
    settings: RwLock<StoreSettings>,
    funding_total: AtomicI64,
    income_total: AtomicI64,
    play_seq: AtomicU64,
    account_seq: AtomicI64,
    /// Serializes multi-account settlement cascades.
    settle_lock: Mutex<()>,
    transient_failures: AtomicU32,
}

impl MemoryStore {
    /// Build a store with a hash chain covering `rounds` rounds.
    pub fn new(rounds: usize) -> Self {
        let seed: [u8; 16] = rand::thread_rng().gen();
        Self::with_terminal_seed(&hex::encode(seed), rounds)
    }

    /// Deterministic chain for tests: round `i` gets `chain[i]`, where each
    /// hash commits to the one after it.
    pub fn with_terminal_seed(terminal_seed: &str, rounds: usize) -> Self {
        let mut chain = Vec::with_capacity(rounds + 1);
        let mut hash = fairness::game_hash(terminal_seed);
        for _ in 0..=rounds {
            chain.push(hash.clone());
            hash = fairness::game_hash(&hash);
        }
        chain.reverse();

        Self {
            accounts: DashMap::new(),
            usernames_by_id: DashMap::new(),
            plays: DashMap::new(),
            chain,
            settings: RwLock::new(StoreSettings::default()),
            funding_total: AtomicI64::new(0),
            income_total: AtomicI64::new(0),
            play_seq: AtomicU64::new(0),
            account_seq: AtomicI64::new(0),
            settle_lock: Mutex::new(()),
            transient_failures: AtomicU32::new(0),
        }
    }

    /// Register an account with an initial funded balance.
    pub fn add_account(
        &self,
        username: &str,
        balance: i64,
        demo: bool,
        class: UserClass,
        lineage: Lineage,
    ) -> i64 {
        let id = self.account_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.accounts.insert(
            username.to_string(),
            Account {
                id,
                username: username.to_string(),
                balance,
                demo,
                class,
                lineage,
            },
        );
        self.usernames_by_id.insert(id, username.to_string());
        if !demo {
            self.funding_total.fetch_add(balance, Ordering::SeqCst);
        }
        id
    }

    pub fn balance_of(&self, username: &str) -> Option<i64> {
        self.accounts.get(username).map(|a| a.balance)
    }

    pub fn account(&self, username: &str) -> Option<Account> {
        self.accounts.get(username).map(|a| a.clone())
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut StoreSettings)) {
        let mut settings = self.settings.write().expect("settings lock");
        f(&mut settings);
    }

    /// Commission legs recorded for a settled play, if any.
    pub fn settled_legs(&self, play_id: u64) -> Option<LegSplit> {
        self.plays.get(&play_id).and_then(|row| row.legs)
    }

    fn settings(&self) -> StoreSettings {
        self.settings.read().expect("settings lock").clone()
    }

    fn credit(&self, username: &str, amount: i64) {
        if amount == 0 {
            return;
        }
        match self.accounts.get_mut(username) {
            Some(mut account) => account.balance += amount,
            None => tracing::warn!("credit to unknown account {} dropped", username),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn create_round(&self, game_id: u64) -> Result<RoundSeed, StoreError> {
        let hash = self
            .chain
            .get(game_id as usize)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("no hash for round {}", game_id)))?;

        let settings = self.settings();
        let crash_point = match settings.fairness_mode {
            FairnessMode::Uniform => fairness::crash_point(&hash),
            FairnessMode::Weighted => {
                let rows = settings.interval_rows.clone().ok_or_else(|| {
                    StoreError::Corrupt("weighted mode enabled without an interval table".into())
                })?;
                let table = IntervalTable::new(rows)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                fairness::crash_point_weighted(&hash, &table)
            }
        };

        Ok(RoundSeed { crash_point, hash })
    }

    async fn record_bet(&self, record: &BetRecord) -> Result<u64, StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected serialization conflict".into()));
        }

        let username = self
            .usernames_by_id
            .get(&record.user_id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::Unavailable(format!("unknown user {}", record.user_id)))?;

        let stake = record.total_stake();
        {
            let mut account = self
                .accounts
                .get_mut(&username)
                .ok_or_else(|| StoreError::Unavailable(format!("unknown account {}", username)))?;
            if account.balance < stake {
                return Err(StoreError::InsufficientFunds);
            }
            account.balance -= stake;
        }

        let play_id = self.play_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.plays.insert(
            play_id,
            PlayRow {
                username,
                cash_out: 0,
                settled: false,
                legs: None,
            },
        );
        Ok(play_id)
    }

    async fn record_cashout(
        &self,
        _user_id: i64,
        play_id: u64,
        payout: i64,
        extra_payout: i64,
    ) -> Result<(), StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected serialization conflict".into()));
        }

        let mut row = self
            .plays
            .get_mut(&play_id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown play {}", play_id)))?;
        if row.cash_out != 0 {
            return Err(StoreError::AlreadySettled);
        }
        row.cash_out = payout + extra_payout;
        Ok(())
    }

    async fn apply_settlement(&self, record: &PlaySettlement) -> Result<(), StoreError> {
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected serialization conflict".into()));
        }

        let _tx = self.settle_lock.lock().expect("settle lock");

        {
            let mut row = self
                .plays
                .get_mut(&record.play_id)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown play {}", record.play_id)))?;
            if row.username != record.username {
                return Err(StoreError::Corrupt(format!(
                    "play {} belongs to {}, not {}",
                    record.play_id, row.username, record.username
                )));
            }
            if row.settled {
                // Idempotent: the whole round may be retried after a partial
                // failure.
                return Ok(());
            }
            row.settled = true;
            row.legs = Some(record.legs);
        }

        self.credit(&record.username, record.player_credit);

        if !record.demo {
            let settings = self.settings();
            self.credit(&settings.company_account, record.legs.company);
            self.credit(&settings.staff_account, record.legs.staff);
            if let Some(master) = &record.lineage.master {
                self.credit(master, record.legs.master_ib);
            }
            let parent_legs = [
                record.legs.parent1,
                record.legs.parent2,
                record.legs.parent3,
            ];
            for (recipient, leg) in record.lineage.parents.iter().zip(parent_legs) {
                if let Some(name) = recipient {
                    self.credit(name, leg);
                }
            }
        }

        Ok(())
    }

    async fn bankroll(&self) -> Result<i64, StoreError> {
        let user_total: i64 = self
            .accounts
            .iter()
            .filter(|a| !a.demo)
            .map(|a| a.balance)
            .sum();
        let funding = self.funding_total.load(Ordering::SeqCst);
        Ok(funding - user_total + self.settings().gaming_pool)
    }

    async fn demo_pool(&self) -> Result<i64, StoreError> {
        let demo_total: i64 = self
            .accounts
            .iter()
            .filter(|a| a.demo)
            .map(|a| a.balance)
            .sum();
        Ok(self.settings().demo_deposit_pool + demo_total)
    }

    async fn max_profit_percent(&self) -> Result<f64, StoreError> {
        Ok(self.settings().max_profit_percent)
    }

    async fn aggregate_commission_percent(&self) -> Result<f64, StoreError> {
        Ok(self.settings().commission.aggregate())
    }

    async fn extra_bet_multiplier(&self) -> Result<i64, StoreError> {
        Ok(self.settings().extra_bet_multiplier)
    }

    async fn commission_config(&self) -> Result<CommissionConfig, StoreError> {
        Ok(self.settings().commission.clone())
    }

    async fn no_commission_band(&self) -> Result<NoCommissionBand, StoreError> {
        Ok(self.settings().band)
    }

    async fn sync_info(&self) -> Result<SyncInfo, StoreError> {
        let settings = self.settings();
        Ok(SyncInfo {
            limits: settings.limits.clone(),
            extra_bet_multiplier: settings.extra_bet_multiplier,
            show_hash: settings.show_hash,
        })
    }

    async fn range_options(&self) -> Result<Vec<RangeOption>, StoreError> {
        Ok(self.settings().range_options.clone())
    }

    async fn fairness_mode(&self) -> Result<FairnessMode, StoreError> {
        Ok(self.settings().fairness_mode)
    }

    async fn interval_rows(&self) -> Result<Option<Vec<Interval>>, StoreError> {
        Ok(self.settings().interval_rows.clone())
    }

    async fn record_income(&self, amount: i64) -> Result<i64, StoreError> {
        Ok(self.income_total.fetch_add(amount, Ordering::SeqCst) + amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_player(balance: i64) -> (MemoryStore, i64) {
        let store = MemoryStore::with_terminal_seed("test-chain", 64);
        let id = store.add_account("alice", balance, false, UserClass::Player, Lineage::default());
        (store, id)
    }

    fn bet(user_id: i64, amount: i64) -> BetRecord {
        BetRecord {
            user_id,
            game_id: 1,
            bet: amount,
            extra_bet: 0,
            range_bets: vec![],
            auto_cash_out: 200,
        }
    }

    #[tokio::test]
    async fn hash_chain_commits_backwards() {
        let store = MemoryStore::with_terminal_seed("verify", 8);
        let earlier = store.create_round(3).await.unwrap();
        let later = store.create_round(4).await.unwrap();
        // Round 3's hash is the commitment (SHA-256) of round 4's.
        assert_eq!(earlier.hash, fairness::game_hash(&later.hash));
    }

    #[tokio::test]
    async fn record_bet_debits_and_enforces_balance() {
        let (store, id) = store_with_player(1_000);

        let play_id = store.record_bet(&bet(id, 600)).await.unwrap();
        assert!(play_id > 0);
        assert_eq!(store.balance_of("alice"), Some(400));

        let err = store.record_bet(&bet(id, 600)).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientFunds));
        assert_eq!(store.balance_of("alice"), Some(400));
    }

    #[tokio::test]
    async fn double_cashout_is_rejected() {
        let (store, id) = store_with_player(1_000);
        let play_id = store.record_bet(&bet(id, 500)).await.unwrap();

        store.record_cashout(id, play_id, 750, 0).await.unwrap();
        let err = store.record_cashout(id, play_id, 750, 0).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadySettled));
    }

    #[tokio::test]
    async fn weighted_mode_without_table_fails_fast() {
        let (store, _) = store_with_player(0);
        assert_eq!(store.fairness_mode().await.unwrap(), FairnessMode::Uniform);

        store.update_settings(|s| s.fairness_mode = FairnessMode::Weighted);
        assert_eq!(store.fairness_mode().await.unwrap(), FairnessMode::Weighted);
        assert!(store.interval_rows().await.unwrap().is_none());

        let err = store.create_round(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn weighted_mode_with_invalid_table_fails_fast() {
        let (store, _) = store_with_player(0);
        store.update_settings(|s| {
            s.fairness_mode = FairnessMode::Weighted;
            s.interval_rows = Some(vec![Interval { start: 0, end: 500, weight: 9_000 }]);
        });
        let err = store.create_round(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn retry_wrapper_exhausts_then_surfaces() {
        let (store, id) = store_with_player(10_000);
        store.inject_transient_failures(1);

        let record = bet(id, 100);
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let play_id = with_retry(policy, || {
            let record = record.clone();
            let store = &store;
            async move { store.record_bet(&record).await }
        })
        .await
        .unwrap();
        assert!(play_id > 0);

        store.inject_transient_failures(10);
        let err = with_retry(policy, || {
            let record = record.clone();
            let store = &store;
            async move { store.record_bet(&record).await }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bankroll_reflects_player_wins() {
        let (store, id) = store_with_player(1_000);
        store.update_settings(|s| s.gaming_pool = 10_000);

        // Funding 1000 - balances 1000 + pool 10000.
        assert_eq!(store.bankroll().await.unwrap(), 10_000);

        let play_id = store.record_bet(&bet(id, 500)).await.unwrap();
        // Stake left the player's balance, so the bankroll grows until
        // settlement pays it back out.
        assert_eq!(store.bankroll().await.unwrap(), 10_500);
        store.record_cashout(id, play_id, 750, 0).await.unwrap();
        assert_eq!(store.bankroll().await.unwrap(), 10_500);
    }
}
