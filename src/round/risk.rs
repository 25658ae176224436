//! Force-point calculator: bounds the house's exposure per round.
//!
//! Recomputed after every admission and cashout. If the rising multiplier
//! reaches the force point before the committed crash point, the round is
//! ended early at the cap, so aggregate payout can never exceed the round's
//! max-win allowance.

use super::types::{Play, PlayStatus};
use std::collections::HashMap;

/// Lowest cap ever applied (1.01x).
pub const MIN_FORCE_POINT: u64 = 101;

/// Cap (x100) given the current exposure, or `None` when no stake is in play
/// and the round may run to its natural crash.
pub fn force_point(total_bet: i64, total_cashed_out: i64, max_win: i64) -> Option<u64> {
    if total_bet == 0 {
        return None;
    }

    let left = max_win as f64 - total_cashed_out as f64 - total_bet as f64 * 0.01;
    let ratio = (left + total_bet as f64) / total_bet as f64;
    let point = (ratio * 100.0).floor() as i64;

    Some(point.max(MIN_FORCE_POINT as i64) as u64)
}

/// Derive the cap from the live play set: still-playing primary stakes count
/// as exposure, cashed-out plays count what they already won above principal.
pub fn recompute(players: &HashMap<String, Play>, max_win: i64) -> Option<u64> {
    let mut total_bet = 0i64;
    let mut total_cashed_out = 0i64;

    for play in players.values() {
        match play.status {
            PlayStatus::CashedOut => {
                let stopped = play.stopped_at.unwrap_or(100);
                total_cashed_out += play.bet * (stopped as i64 - 100) / 100;
            }
            PlayStatus::Playing => total_bet += play.bet,
        }
    }

    force_point(total_bet, total_cashed_out, max_win)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::types::{Lineage, UserClass, UserSession};

    fn play(bet: i64, status: PlayStatus, stopped_at: Option<u64>) -> Play {
        Play {
            user: UserSession {
                id: 1,
                username: "p".into(),
                demo: false,
                class: UserClass::Player,
                lineage: Lineage::default(),
            },
            play_id: 1,
            bet,
            extra_bet: 0,
            range_bets: vec![],
            auto_cash_out: 200,
            status,
            stopped_at,
            cash_out: 0,
        }
    }

    #[test]
    fn unbounded_with_no_stake() {
        assert_eq!(force_point(0, 0, 5_000), None);
    }

    #[test]
    fn reference_scenario() {
        // totalBet=1000, maxWin=5000, cashedOut=0:
        // left = 5000 - 0 - 10 = 4990, ratio = 5.99, point = 599.
        assert_eq!(force_point(1_000, 0, 5_000), Some(599));
    }

    #[test]
    fn never_below_minimum() {
        assert_eq!(force_point(1_000_000, 0, 0), Some(MIN_FORCE_POINT));
        assert_eq!(force_point(10, 1_000_000, 5), Some(MIN_FORCE_POINT));
    }

    #[test]
    fn cashed_out_plays_reduce_headroom() {
        let mut players = HashMap::new();
        players.insert("a".to_string(), play(1_000, PlayStatus::Playing, None));
        players.insert(
            "b".to_string(),
            play(1_000, PlayStatus::CashedOut, Some(300)),
        );

        // b already took 1000 * (300-100)/100 = 2000 above principal.
        // left = 5000 - 2000 - 10 = 2990, ratio = 3.99.
        assert_eq!(recompute(&players, 5_000), Some(399));
    }

    #[test]
    fn all_cashed_out_is_unbounded() {
        let mut players = HashMap::new();
        players.insert(
            "a".to_string(),
            play(1_000, PlayStatus::CashedOut, Some(150)),
        );
        assert_eq!(recompute(&players, 5_000), None);
    }
}
