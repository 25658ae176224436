//! Round lifecycle state machine.
//!
//! One actor task owns every piece of round-scoped state and runs the
//! STARTING -> BLOCKING -> IN_PROGRESS -> ENDED cycle forever. Commands
//! arrive over a channel and run to their synchronous decision point before
//! the next one is looked at; the only suspension points are the fixed
//! timers and calls into the store. Durable bet and cashout writes are
//! spawned so a slow store cannot stall the tick, with explicit status
//! guards (PLAYING/CASHED_OUT) and a pending-admission counter covering the
//! gaps.

use crate::boundary::EngineHandle;
use crate::config::EngineConfig;
use crate::errors::RejectReason;
use crate::growth;
use crate::history::{CompletedRound, RoundHistory};
use crate::round::events::{RoundEvent, EVENT_CHANNEL_CAPACITY};
use crate::round::risk;
use crate::round::types::{
    Play, PlayStatus, PlayerInfo, RangeBet, Round, RoundSnapshot, RoundState, UserSession,
};
use crate::settlement::SettlementEngine;
use crate::store::{BetRecord, GameStore, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

/// Concurrent cashout writes in flight against the store.
const CASHOUT_FAN_OUT: usize = 4;

/// Commands accepted by the engine. Constructed by the boundary adapter.
pub(crate) enum Command {
    PlaceBet {
        user: UserSession,
        bet: i64,
        extra_bet: i64,
        range_bets: Vec<RangeBet>,
        auto_cash_out: u64,
        reply: oneshot::Sender<Result<u64, RejectReason>>,
    },
    CashOut {
        username: String,
        reply: oneshot::Sender<Result<u64, RejectReason>>,
    },
    CashOutAll {
        at: u64,
    },
    FinishRound {
        elapsed_ms: u64,
        multiplier: Option<f64>,
        game_id: u64,
    },
    SetNextZero,
    Shutdown,
    Info {
        reply: oneshot::Sender<RoundSnapshot>,
    },
}

/// Completions of spawned store writes, routed back onto the actor timeline.
enum Internal {
    BetRecorded {
        username: String,
        result: Result<u64, StoreError>,
    },
    CashoutRecorded {
        username: String,
        at: u64,
        extra_success: bool,
        amount: i64,
        result: Result<(), StoreError>,
    },
}

enum Wake {
    Timer,
    Cmd(Command),
    CmdClosed,
    Int(Internal),
}

/// A bet admission whose durable write is still in flight.
struct PendingJoin {
    user: UserSession,
    bet: i64,
    extra_bet: i64,
    range_bets: Vec<RangeBet>,
    auto_cash_out: u64,
    reply: oneshot::Sender<Result<u64, RejectReason>>,
}

pub struct RoundEngine<S> {
    store: Arc<S>,
    config: EngineConfig,
    settlement: SettlementEngine<S>,
    events: broadcast::Sender<RoundEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    cmd_closed: bool,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    cashout_limiter: Arc<Semaphore>,

    state: RoundState,
    round: Round,
    bankroll: i64,
    demo_pool: i64,
    commission_percent: f64,
    income_total: i64,

    started_at: Instant,
    start_deadline: Instant,
    force_point: Option<u64>,

    players: HashMap<String, Play>,
    join_order: Vec<String>,
    pending: HashMap<String, PendingJoin>,
    pending_count: usize,
    outstanding_cashouts: usize,

    force_finish: bool,
    next_zero: bool,
    shutting_down: bool,
    history: RoundHistory,
}

impl<S: GameStore> RoundEngine<S> {
    /// Spawn the engine task. The handle is the only way in; the task runs
    /// rounds until a shutdown request lets the current one finish.
    pub fn spawn(store: Arc<S>, config: EngineConfig) -> (EngineHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (internal_tx, internal_rx) = mpsc::channel(1_024);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let engine = Self {
            settlement: SettlementEngine::new(store.clone(), config.settlement.clone()),
            store: store.clone(),
            config,
            events: events.clone(),
            cmd_rx,
            cmd_closed: false,
            internal_tx,
            internal_rx,
            cashout_limiter: Arc::new(Semaphore::new(CASHOUT_FAN_OUT)),
            state: RoundState::Ended,
            round: Round {
                id: 0,
                hash: String::new(),
                last_hash: String::new(),
                crash_point: 0,
                duration_ms: 0,
                max_win: 0,
                bankroll: 0,
            },
            bankroll: 0,
            demo_pool: 0,
            commission_percent: 0.0,
            income_total: 0,
            started_at: Instant::now(),
            start_deadline: Instant::now(),
            force_point: None,
            players: HashMap::new(),
            join_order: Vec::new(),
            pending: HashMap::new(),
            pending_count: 0,
            outstanding_cashouts: 0,
            force_finish: false,
            next_zero: false,
            shutting_down: false,
            history: RoundHistory::default(),
        };

        let task = tokio::spawn(engine.run());
        (EngineHandle::new(cmd_tx, events, store), task)
    }

    async fn run(mut self) {
        self.refresh_bankroll(true).await;

        loop {
            self.create_round().await;
            self.betting_window().await;
            self.blocking_phase().await;
            let forced = self.progress_phase().await;
            let crashed_at = self.end_phase(forced).await;

            if self.shutting_down {
                break;
            }
            self.cooldown_phase(crashed_at).await;
            if self.shutting_down {
                break;
            }
        }

        let _ = self.events.send(RoundEvent::Shutdown);
        tracing::info!("round cycle stopped after round {}", self.round.id);
    }

    /// Wait for the next timer tick, command, or write completion.
    async fn next_wake(&mut self, deadline: Instant) -> Wake {
        tokio::select! {
            _ = sleep_until(deadline) => Wake::Timer,
            cmd = self.cmd_rx.recv(), if !self.cmd_closed => match cmd {
                Some(cmd) => Wake::Cmd(cmd),
                None => Wake::CmdClosed,
            },
            Some(event) = self.internal_rx.recv() => Wake::Int(event),
        }
    }

    /// Create the next round, retrying on a fixed backoff: the cycle must
    /// keep attempting to resume no matter what the store does.
    async fn create_round(&mut self) {
        self.players.clear();
        self.join_order.clear();
        self.force_point = None;
        self.force_finish = false;

        let next_id = self.round.id + 1;
        let (seed, max_profit) = loop {
            match self.try_create(next_id).await {
                Ok(created) => break created,
                Err(err) => {
                    tracing::error!(
                        "could not create round {}: {}; retrying in {}ms",
                        next_id,
                        err,
                        self.config.timing.create_retry_ms
                    );
                    sleep(Duration::from_millis(self.config.timing.create_retry_ms)).await;
                }
            }
        };

        let mut crash_point = seed.crash_point;
        if let Some(forced) = self.config.overrides.crash_at {
            crash_point = forced;
        }
        if self.next_zero {
            crash_point = 0;
            self.next_zero = false;
        }

        self.state = RoundState::Starting;
        self.round = Round {
            id: next_id,
            hash: seed.hash,
            last_hash: self.round.last_hash.clone(),
            crash_point,
            duration_ms: growth::duration_for(crash_point + 1).ceil().max(0.0) as u64,
            max_win: (self.bankroll as f64 * max_profit / 100.0).round() as i64,
            bankroll: self.bankroll,
        };

        tracing::info!(
            "round {} created, max win {}",
            self.round.id,
            self.round.max_win
        );
        let _ = self.events.send(RoundEvent::GameStarting {
            game_id: self.round.id,
            max_win: self.round.max_win,
            time_till_start_ms: self.config.timing.bet_window_ms,
        });
        self.emit_sync_info().await;
    }

    async fn try_create(
        &self,
        game_id: u64,
    ) -> Result<(crate::store::RoundSeed, f64), StoreError> {
        let seed = self.store.create_round(game_id).await?;
        let max_profit = self.store.max_profit_percent().await?;
        Ok((seed, max_profit))
    }

    /// STARTING: the only phase that admits bets.
    async fn betting_window(&mut self) {
        let deadline = Instant::now() + Duration::from_millis(self.config.timing.bet_window_ms);
        self.start_deadline = deadline;

        loop {
            match self.next_wake(deadline).await {
                Wake::Timer => return,
                Wake::Cmd(cmd) => self.handle_command(cmd),
                Wake::CmdClosed => self.cmd_closed = true,
                Wake::Int(event) => self.handle_internal(event).await,
            }
        }
    }

    /// BLOCKING: no new admissions, but every in-flight write must land
    /// before the multiplier starts moving.
    async fn blocking_phase(&mut self) {
        self.state = RoundState::Blocking;

        while self.pending_count > 0 {
            tracing::info!(
                "delaying round {} by {}ms for {} pending joins",
                self.round.id,
                self.config.timing.blocking_poll_ms,
                self.pending_count
            );
            let deadline =
                Instant::now() + Duration::from_millis(self.config.timing.blocking_poll_ms);
            loop {
                match self.next_wake(deadline).await {
                    Wake::Timer => break,
                    Wake::Cmd(cmd) => self.handle_command(cmd),
                    Wake::CmdClosed => self.cmd_closed = true,
                    Wake::Int(event) => self.handle_internal(event).await,
                }
                if self.pending_count == 0 {
                    return;
                }
            }
        }
    }

    /// IN_PROGRESS: tick until one end condition fires. Returns whether the
    /// end was forced.
    async fn progress_phase(&mut self) -> bool {
        self.state = RoundState::InProgress;
        self.started_at = Instant::now();
        self.pending.clear();
        self.pending_count = 0;

        let mut bets = HashMap::new();
        let mut extra_bets = HashMap::new();
        let mut range_bets = HashMap::new();
        let mut demos = HashMap::new();
        let mut total_real_stake = 0i64;
        for (name, play) in &self.players {
            bets.insert(name.clone(), play.bet);
            extra_bets.insert(name.clone(), play.extra_bet);
            range_bets.insert(name.clone(), play.range_bets.clone());
            demos.insert(name.clone(), play.user.demo);
            if !play.user.demo {
                total_real_stake += play.total_stake();
            }
        }

        let income = (total_real_stake as f64 * self.commission_percent / 100.0).round() as i64;
        match self.store.record_income(income).await {
            Ok(total) => self.income_total = total,
            Err(err) => tracing::warn!("could not record round income: {}", err),
        }

        let _ = self.events.send(RoundEvent::GameStarted {
            bets,
            extra_bets,
            range_bets,
            demos,
            income_total: self.income_total,
        });
        self.emit_sync_info().await;
        self.set_force_point();

        loop {
            let elapsed = self.started_at.elapsed().as_millis() as u64;
            let left = self.round.duration_ms.saturating_sub(elapsed);
            let next_tick = left.min(self.config.timing.tick_ms);
            let deadline = Instant::now() + Duration::from_millis(next_tick);

            match self.next_wake(deadline).await {
                Wake::Timer => {
                    let elapsed = self.started_at.elapsed().as_millis() as u64;
                    let at = growth::multiplier_at(elapsed);

                    self.run_cash_outs(at);

                    // End conditions, strictly in precedence; exactly one
                    // fires per tick.
                    if let Some(fp) = self.force_point {
                        if fp <= at && fp <= self.round.crash_point {
                            tracing::info!(
                                "round {} forced out at cap {} (at {}, crash {})",
                                self.round.id,
                                fp,
                                at,
                                self.round.crash_point
                            );
                            self.round.crash_point = fp;
                            return true;
                        }
                    }
                    if self.force_finish {
                        self.force_finish = false;
                        tracing::info!(
                            "administrator stopped round {} at crash {}",
                            self.round.id,
                            self.round.crash_point
                        );
                        return true;
                    }
                    if at > self.round.crash_point {
                        return false;
                    }

                    let _ = self.events.send(RoundEvent::GameTick { elapsed_ms: elapsed });
                }
                Wake::Cmd(cmd) => self.handle_command(cmd),
                Wake::CmdClosed => self.cmd_closed = true,
                Wake::Int(event) => self.handle_internal(event).await,
            }
        }
    }

    /// ENDED: reveal, refresh, settle. The round does not advance until
    /// settlement succeeds; a heartbeat logs while it is stuck.
    async fn end_phase(&mut self, forced: bool) -> Instant {
        self.state = RoundState::Ended;
        let crashed_at = Instant::now();
        self.round.last_hash = self.round.hash.clone();

        tracing::info!(
            "round {} ended at {} (forced: {})",
            self.round.id,
            self.round.crash_point,
            forced
        );
        let _ = self.events.send(RoundEvent::GameCrash {
            game_crash: self.round.crash_point,
            forced,
            elapsed_ms: self.round.duration_ms,
            hash: self.round.last_hash.clone(),
        });
        self.emit_sync_info().await;
        self.refresh_bankroll(true).await;

        // Let in-flight cashout writes land so settlement sees every final
        // payout; same idea as the blocking phase, applied at round end.
        while self.outstanding_cashouts > 0 {
            match self.internal_rx.recv().await {
                Some(event) => self.handle_internal(event).await,
                None => break,
            }
        }

        self.history.add(CompletedRound {
            game_id: self.round.id,
            game_crash: self.round.crash_point,
            created: Utc::now(),
            player_info: self
                .players
                .iter()
                .map(|(name, play)| (name.clone(), PlayerInfo::from(play)))
                .collect(),
            hash: self.round.last_hash.clone(),
        });

        let plays: Vec<Play> = self.players.values().cloned().collect();
        let game_id = self.round.id;
        let heartbeat_ms = self.config.timing.settle_heartbeat_ms;
        let heartbeat = tokio::spawn(async move {
            let since = Instant::now();
            loop {
                sleep(Duration::from_millis(heartbeat_ms)).await;
                tracing::warn!(
                    "round {} is still ending; {:.3}s since crash",
                    game_id,
                    since.elapsed().as_secs_f64()
                );
            }
        });

        let profits = loop {
            match self
                .settlement
                .settle_round(self.round.id, self.round.crash_point, plays.clone())
                .await
            {
                Ok(profits) => break profits,
                Err(err) => {
                    tracing::error!("could not settle round {}: {}", self.round.id, err);
                    sleep(Duration::from_millis(self.config.timing.settle_retry_ms)).await;
                }
            }
        };
        heartbeat.abort();

        let _ = self.events.send(RoundEvent::Settled {
            game_id: self.round.id,
            profits,
        });

        crashed_at
    }

    /// Post-crash pause before the next round is created.
    async fn cooldown_phase(&mut self, crashed_at: Instant) {
        let deadline = crashed_at + Duration::from_millis(self.config.timing.post_crash_ms);
        loop {
            match self.next_wake(deadline).await {
                Wake::Timer => return,
                Wake::Cmd(cmd) => self.handle_command(cmd),
                Wake::CmdClosed => self.cmd_closed = true,
                Wake::Int(event) => self.handle_internal(event).await,
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PlaceBet {
                user,
                bet,
                extra_bet,
                range_bets,
                auto_cash_out,
                reply,
            } => self.place_bet(user, bet, extra_bet, range_bets, auto_cash_out, reply),
            Command::CashOut { username, reply } => {
                let result = self.cash_out(&username);
                let _ = reply.send(result);
            }
            Command::CashOutAll { at } => self.cash_out_all(at),
            Command::FinishRound {
                elapsed_ms,
                multiplier,
                game_id,
            } => self.finish_round(elapsed_ms, multiplier, game_id),
            Command::SetNextZero => {
                tracing::info!("next round will crash instantly");
                self.next_zero = true;
            }
            Command::Shutdown => {
                if !self.shutting_down {
                    self.shutting_down = true;
                    let _ = self.events.send(RoundEvent::ShuttingDown);
                }
            }
            Command::Info { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::BetRecorded { username, result } => {
                self.pending_count = self.pending_count.saturating_sub(1);
                let Some(join) = self.pending.remove(&username) else {
                    return;
                };

                match result {
                    Ok(play_id) => {
                        let demo = join.user.demo;
                        self.join_order.push(username.clone());
                        let index = self.join_order.len() - 1;
                        self.players.insert(
                            username.clone(),
                            Play {
                                user: join.user,
                                play_id,
                                bet: join.bet,
                                extra_bet: join.extra_bet,
                                range_bets: join.range_bets,
                                auto_cash_out: join.auto_cash_out,
                                status: PlayStatus::Playing,
                                stopped_at: None,
                                cash_out: 0,
                            },
                        );
                        let _ = join.reply.send(Ok(play_id));
                        let _ = self.events.send(RoundEvent::PlayerBet {
                            username,
                            index,
                            demo,
                        });
                        self.set_force_point();
                        self.refresh_bankroll(true).await;
                    }
                    Err(StoreError::InsufficientFunds) => {
                        tracing::info!("bet by {} rejected: not enough money", username);
                        let _ = join.reply.send(Err(RejectReason::NotEnoughMoney));
                    }
                    Err(err) => {
                        tracing::error!("could not record bet for {}: {}", username, err);
                        let _ = join.reply.send(Err(RejectReason::InternalError));
                    }
                }
            }
            Internal::CashoutRecorded {
                username,
                at,
                extra_success,
                amount,
                result,
            } => {
                self.outstanding_cashouts = self.outstanding_cashouts.saturating_sub(1);
                match result {
                    Ok(()) => {
                        if let Some(play) = self.players.get_mut(&username) {
                            play.cash_out = amount;
                        }
                        let _ = self.events.send(RoundEvent::CashedOut {
                            username,
                            stopped_at: at,
                            extra_success,
                            amount,
                        });
                    }
                    Err(err) => {
                        tracing::error!("could not record cashout for {}: {}", username, err);
                    }
                }
            }
        }
    }

    /// Admit a bet: synchronous checks, then a spawned durable write guarded
    /// by the pending counter.
    fn place_bet(
        &mut self,
        user: UserSession,
        bet: i64,
        extra_bet: i64,
        range_bets: Vec<RangeBet>,
        auto_cash_out: u64,
        reply: oneshot::Sender<Result<u64, RejectReason>>,
    ) {
        if self.state != RoundState::Starting {
            let _ = reply.send(Err(RejectReason::GameInProgress));
            return;
        }

        let username = user.username.clone();
        if self.pending.contains_key(&username) || self.players.contains_key(&username) {
            let _ = reply.send(Err(RejectReason::AlreadyPlacedBet));
            return;
        }

        // A play is either a primary stake with a mandatory auto-cashout, or
        // range bets alone.
        let range_total: i64 = range_bets.iter().map(|rb| rb.amount).sum();
        let valid_shape = if range_bets.is_empty() {
            bet > 0 && extra_bet >= 0 && auto_cash_out >= 100
        } else {
            bet == 0 && extra_bet == 0 && range_total > 0 && auto_cash_out == 0
        };
        if !valid_shape {
            let _ = reply.send(Err(RejectReason::PlaceBetError));
            return;
        }

        let record = BetRecord {
            user_id: user.id,
            game_id: self.round.id,
            bet,
            extra_bet,
            range_bets: range_bets.clone(),
            auto_cash_out,
        };
        self.pending.insert(
            username.clone(),
            PendingJoin {
                user,
                bet,
                extra_bet,
                range_bets,
                auto_cash_out,
                reply,
            },
        );
        self.pending_count += 1;

        let store = self.store.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = store.record_bet(&record).await;
            let _ = internal.send(Internal::BetRecorded { username, result }).await;
        });
    }

    /// Per-tick automatic cashout resolution: an auto-cashout fires only
    /// when it is guaranteed payable under the current multiplier, the
    /// committed crash point and the force point.
    fn run_cash_outs(&mut self, at: u64) {
        let mut resolved = Vec::new();
        let mut update = false;

        for (name, play) in &self.players {
            if !play.is_playing() || play.bet == 0 {
                continue;
            }
            update = true;

            if play.extra_bet > 0 && self.round.crash_point == 0 {
                resolved.push((name.clone(), 0, true));
            } else if play.auto_cash_out <= at
                && play.auto_cash_out <= self.round.crash_point
                && self.force_point.map_or(true, |fp| play.auto_cash_out <= fp)
            {
                resolved.push((name.clone(), play.auto_cash_out, false));
            }
        }

        for (name, stop_at, extra_success) in resolved {
            if let Err(err) = self.do_cash_out(&name, stop_at, extra_success) {
                tracing::error!("could not auto cash out {}: {}", name, err);
            }
        }

        if update {
            self.set_force_point();
        }
    }

    /// Shared cashout path. The PLAYING -> CASHED_OUT transition is the
    /// atomic guard: it happens on the actor timeline before the durable
    /// write is spawned, so a concurrent second attempt is rejected here and
    /// the store's own already-settled check is only a backstop.
    fn do_cash_out(
        &mut self,
        username: &str,
        at: u64,
        extra_success: bool,
    ) -> Result<(), RejectReason> {
        let play = self
            .players
            .get_mut(username)
            .ok_or(RejectReason::NoBetPlaced)?;
        if play.status == PlayStatus::CashedOut {
            return Err(RejectReason::AlreadyCashedOut);
        }
        play.status = PlayStatus::CashedOut;
        play.stopped_at = Some(at);

        let user_id = play.user.id;
        let play_id = play.play_id;
        let bet = play.bet;
        let extra_bet = play.extra_bet;
        let username = username.to_string();

        self.outstanding_cashouts += 1;
        let store = self.store.clone();
        let internal = self.internal_tx.clone();
        let limiter = self.cashout_limiter.clone();
        tokio::spawn(async move {
            let _permit = limiter.acquire_owned().await.ok();

            // The extra-bet multiplier is read per operation, not cached.
            let result = match store.extra_bet_multiplier().await {
                Ok(multiplier) => {
                    let (payout, extra_payout) = if extra_success {
                        (bet, extra_bet * (multiplier + 1))
                    } else {
                        (bet * at as i64 / 100, 0)
                    };
                    let amount = payout + extra_payout;
                    let result = store
                        .record_cashout(user_id, play_id, payout, extra_payout)
                        .await;
                    Internal::CashoutRecorded {
                        username,
                        at,
                        extra_success,
                        amount,
                        result,
                    }
                }
                Err(err) => Internal::CashoutRecorded {
                    username,
                    at,
                    extra_success,
                    amount: 0,
                    result: Err(err),
                },
            };
            let _ = internal.send(result).await;
        });

        Ok(())
    }

    /// Manual cashout: clamp to the caller's own threshold and the force
    /// point, reject past the crash point, then the shared path.
    fn cash_out(&mut self, username: &str) -> Result<u64, RejectReason> {
        if self.state != RoundState::InProgress {
            return Err(RejectReason::GameNotInProgress);
        }

        let elapsed = self.started_at.elapsed().as_millis() as u64;
        let mut at = growth::multiplier_at(elapsed);

        let play = self
            .players
            .get(username)
            .ok_or(RejectReason::NoBetPlaced)?;

        if play.auto_cash_out <= at {
            at = play.auto_cash_out;
        }
        if let Some(fp) = self.force_point {
            if fp <= at {
                at = fp;
            }
        }
        if at > self.round.crash_point {
            return Err(RejectReason::GameAlreadyCrashed);
        }
        if play.status == PlayStatus::CashedOut {
            return Err(RejectReason::AlreadyCashedOut);
        }

        self.do_cash_out(username, at, false)?;
        // Removing exposure changes the cap for everyone still in.
        self.set_force_point();
        Ok(at)
    }

    /// Administrative mass cashout. A no-op once the supplied point is past
    /// the crash point: the round is already lost.
    fn cash_out_all(&mut self, at: u64) {
        if self.state != RoundState::InProgress {
            return;
        }
        tracing::info!("cashing everyone out at {}", at);

        self.run_cash_outs(at);
        if at > self.round.crash_point {
            return;
        }

        let remaining: Vec<String> = self
            .players
            .iter()
            .filter(|(_, play)| play.is_playing())
            .map(|(name, _)| name.clone())
            .collect();
        for name in remaining {
            if let Err(err) = self.do_cash_out(&name, at, false) {
                tracing::error!("could not force cash out {}: {}", name, err);
            }
        }
        self.set_force_point();
    }

    /// Administrative finish. A stale round id (or missing multiplier)
    /// forces the fallback high crash point instead.
    fn finish_round(&mut self, elapsed_ms: u64, multiplier: Option<f64>, game_id: u64) {
        let Some(multiplier) = multiplier.filter(|_| game_id == self.round.id) else {
            self.round.crash_point = self.config.overrides.fallback();
            tracing::warn!(
                "finish_round for stale round {}; falling back to crash {}",
                game_id,
                self.round.crash_point
            );
            return;
        };

        self.force_finish = true;
        self.round.crash_point = (multiplier * 100.0).round() as u64;
        self.round.duration_ms = elapsed_ms;
        tracing::info!(
            "round {} will finish at {} after {}ms",
            self.round.id,
            self.round.crash_point,
            elapsed_ms
        );
    }

    fn set_force_point(&mut self) {
        let next = risk::recompute(&self.players, self.round.max_win);
        if next != self.force_point {
            match next {
                Some(fp) => tracing::info!("force point for round {}: {}", self.round.id, fp),
                None => tracing::info!("force point for round {}: unbounded", self.round.id),
            }
        }
        self.force_point = next;
    }

    async fn refresh_bankroll(&mut self, emit: bool) {
        match self.store.bankroll().await {
            Ok(bankroll) => self.bankroll = bankroll,
            Err(err) => {
                tracing::warn!("could not read bankroll: {}", err);
                return;
            }
        }
        if let Ok(pool) = self.store.demo_pool().await {
            self.demo_pool = pool;
        }
        if let Ok(percent) = self.store.aggregate_commission_percent().await {
            self.commission_percent = percent;
        }

        if emit {
            let _ = self.events.send(RoundEvent::BankrollUpdate {
                bankroll: self.bankroll,
                demo_pool: self.demo_pool,
                commission_percent: self.commission_percent,
            });
        }
    }

    async fn emit_sync_info(&self) {
        match self.store.sync_info().await {
            Ok(info) => {
                let _ = self.events.send(RoundEvent::BetInfoUpdate { info });
            }
            Err(err) => tracing::warn!("could not read sync info: {}", err),
        }
        match self.store.range_options().await {
            Ok(ranges) => {
                let _ = self.events.send(RoundEvent::RangeInfoUpdate { ranges });
            }
            Err(err) => tracing::warn!("could not read range options: {}", err),
        }
    }

    fn snapshot(&self) -> RoundSnapshot {
        let elapsed_ms = match self.state {
            RoundState::Starting | RoundState::Blocking => {
                -(self
                    .start_deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis() as i64)
            }
            _ => self.started_at.elapsed().as_millis() as i64,
        };

        RoundSnapshot {
            state: self.state,
            game_id: self.round.id,
            last_hash: self.round.last_hash.clone(),
            max_win: self.round.max_win,
            elapsed_ms,
            player_info: self
                .players
                .iter()
                .map(|(name, play)| (name.clone(), PlayerInfo::from(play)))
                .collect(),
            joined: self.join_order.clone(),
            table_history: self.history.rounds().cloned().collect(),
            crashed_at: (self.state == RoundState::Ended).then_some(self.round.crash_point),
        }
    }
}
