//! crashd - run the engine against the in-memory store.
//!
//! A local harness: seeds a handful of accounts, lets two bots bet every
//! round, and logs the event stream. Real deployments wire a durable store
//! and a transport onto the same [`EngineHandle`].

use clap::Parser;
use crashd::round::types::{Lineage, UserClass};
use crashd::{BetRequest, EngineConfig, EngineHandle, MemoryStore, RoundEngine, RoundEvent, UserSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crashd", about = "Provably-fair crash round engine")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many completed rounds.
    #[arg(long, default_value_t = 5)]
    rounds: u64,

    /// Shrink the round timers for a quick local demo.
    #[arg(long)]
    fast: bool,
}

fn demo_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(10_000));
    store.add_account("house", 0, false, UserClass::Admin, Lineage::default());
    store.add_account("staff", 0, false, UserClass::Staff, Lineage::default());
    store.add_account("marge", 0, false, UserClass::MasterIb, Lineage::default());
    store.add_account(
        "alice",
        1_000_000,
        false,
        UserClass::Player,
        Lineage {
            master: Some("marge".to_string()),
            parents: [None, None, None],
        },
    );
    store.add_account("bob", 1_000_000, false, UserClass::Player, Lineage::default());
    store.update_settings(|settings| settings.gaming_pool = 100_000_000);
    store
}

fn session(store: &MemoryStore, username: &str) -> UserSession {
    let account = store.account(username).expect("seeded account");
    UserSession {
        id: account.id,
        username: account.username,
        demo: account.demo,
        class: account.class,
        lineage: account.lineage,
    }
}

async fn place_demo_bets(store: &MemoryStore, handle: &EngineHandle) {
    let bets = [
        (session(store, "alice"), 5_000i64, 110u64),
        (session(store, "bob"), 2_000, 250),
    ];
    for (user, bet, auto_cash_out) in bets {
        let username = user.username.clone();
        match handle
            .place_bet(
                user,
                BetRequest {
                    bet,
                    extra_bet: 0,
                    auto_cash_out,
                    range_bets: vec![],
                },
            )
            .await
        {
            Ok(play_id) => info!("{} bet {} (play {})", username, bet, play_id),
            Err(reason) => info!("{} bet rejected: {}", username, reason),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if args.fast {
        config.timing.tick_ms = 50;
        config.timing.bet_window_ms = 500;
        config.timing.post_crash_ms = 300;
        config.overrides.crash_at = Some(130);
    }

    let store = demo_store();
    let (handle, engine_task) = RoundEngine::spawn(store.clone(), config);

    let mut events = handle.subscribe();
    let mut completed = 0u64;
    loop {
        match events.recv().await {
            Ok(RoundEvent::GameStarting { game_id, max_win, .. }) => {
                info!("round {} starting (max win {})", game_id, max_win);
                let store = store.clone();
                let handle = handle.clone();
                tokio::spawn(async move { place_demo_bets(&store, &handle).await });
            }
            Ok(RoundEvent::GameCrash { game_crash, forced, .. }) => {
                info!("crash at {} (forced: {})", game_crash, forced);
                completed += 1;
                if completed >= args.rounds {
                    handle.shutdown().await?;
                }
            }
            Ok(RoundEvent::CashedOut { username, stopped_at, amount, .. }) => {
                info!("{} cashed out at {} for {}", username, stopped_at, amount);
            }
            Ok(RoundEvent::Settled { game_id, profits }) => {
                info!("round {} settled for {} players", game_id, profits.len());
            }
            Ok(RoundEvent::Shutdown) => break,
            Ok(event) => info!("event: {}", event.name()),
            Err(err) => {
                tracing::warn!("event stream interrupted: {}", err);
                break;
            }
        }
    }

    engine_task.await?;
    info!(
        "final balances: alice {:?}, bob {:?}, house {:?}",
        store.balance_of("alice"),
        store.balance_of("bob"),
        store.balance_of("house")
    );
    Ok(())
}
