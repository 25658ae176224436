//! Commission configuration and the per-bet leg split.
//!
//! Every settled bet fans a commissioned share of its stake out to staff,
//! the player's referral lineage and the house. The split is one routine
//! shared by the busted, cashed-out and range-bet paths; redirection rules
//! move money between legs but never create or destroy it.

use crate::round::types::{Play, UserClass, UserSession};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum CommissionError {
    #[error("commission share {0} is negative: {1}")]
    NegativeShare(&'static str, f64),

    #[error("commission shares sum to {0}, exceeding 100")]
    SharesExceedWhole(f64),
}

/// Named percentage shares of each bet's dispense volume. The remainder of
/// the aggregate commissioned percentage flows to the house.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionConfig {
    pub staff: f64,
    pub master_ib: f64,
    pub agent: f64,
    pub parent1: f64,
    pub parent2: f64,
    pub parent3: f64,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            staff: 2.0,
            master_ib: 1.0,
            agent: 5.0,
            parent1: 1.0,
            parent2: 0.5,
            parent3: 0.5,
        }
    }
}

impl CommissionConfig {
    /// Total commissioned percentage of a bet's dispense volume.
    pub fn aggregate(&self) -> f64 {
        self.staff + self.master_ib + self.agent + self.parent1 + self.parent2 + self.parent3
    }

    pub fn validate(&self) -> Result<(), CommissionError> {
        for (name, share) in [
            ("staff", self.staff),
            ("master_ib", self.master_ib),
            ("agent", self.agent),
            ("parent1", self.parent1),
            ("parent2", self.parent2),
            ("parent3", self.parent3),
        ] {
            if share < 0.0 {
                return Err(CommissionError::NegativeShare(name, share));
            }
        }
        let aggregate = self.aggregate();
        if aggregate > 100.0 {
            return Err(CommissionError::SharesExceedWhole(aggregate));
        }
        Ok(())
    }
}

/// Multiplier interval `[from, to)` (x100) in which cashouts earn no
/// commission. Recomputed per round; membership marks a player "forbidden".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoCommissionBand {
    pub from: u64,
    pub to: u64,
}

impl Default for NoCommissionBand {
    fn default() -> Self {
        Self { from: 100, to: 150 }
    }
}

impl NoCommissionBand {
    pub fn contains(&self, multiplier: u64) -> bool {
        multiplier >= self.from && multiplier < self.to
    }
}

/// Scan a round's plays and collect the usernames excluded from commission
/// flow this round: zero-payout busts of an instant-crash round, and plays
/// whose configured auto-cashout or realized payout/stake ratio falls in the
/// no-commission band. A zero-stake play has no defined ratio and is never
/// marked on that ground.
pub fn forbidden_set(
    plays: &[Play],
    crash_point: u64,
    band: &NoCommissionBand,
) -> HashSet<String> {
    let mut forbidden = HashSet::new();

    for play in plays {
        let instant_bust = crash_point == 0 && play.cash_out == 0;
        let auto_in_band = play.auto_cash_out != 0 && band.contains(play.auto_cash_out);
        let ratio_in_band = play.bet > 0 && {
            let ratio_x100 = play.cash_out as f64 * 100.0 / play.bet as f64;
            ratio_x100 >= band.from as f64 && ratio_x100 < band.to as f64
        };

        if instant_bust || auto_in_band || ratio_in_band {
            forbidden.insert(play.user.username.clone());
        }
    }

    forbidden
}

/// Monetary legs carved out of one bet's dispense volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegSplit {
    pub staff: i64,
    pub master_ib: i64,
    /// Commission the player keeps for their own agent/master account.
    pub agent: i64,
    pub parent1: i64,
    pub parent2: i64,
    pub parent3: i64,
    pub company: i64,
}

impl LegSplit {
    /// Sum over every leg; invariant under redirection.
    pub fn total(&self) -> i64 {
        self.staff
            + self.master_ib
            + self.agent
            + self.parent1
            + self.parent2
            + self.parent3
            + self.company
    }
}

/// Split `dispense_volume` into commission legs for one bet.
///
/// Each named leg is `round(volume * share / 100)`; the company leg absorbs
/// the rounding residue of the aggregate so no remainder ever lands on a
/// player or referrer. Redirection voids a leg into the company when:
/// the payer keeps no agent share (not an agent/master account, or forbidden
/// this round), a lineage recipient is absent, or either end of a lineage
/// edge is forbidden. Demo accounts move no real value to the house or
/// staff.
pub fn commission_legs(
    dispense_volume: i64,
    user: &UserSession,
    forbidden: &HashSet<String>,
    cfg: &CommissionConfig,
) -> LegSplit {
    let leg = |share: f64| (dispense_volume as f64 * share / 100.0).round() as i64;

    let mut split = LegSplit {
        staff: leg(cfg.staff),
        master_ib: leg(cfg.master_ib),
        agent: leg(cfg.agent),
        parent1: leg(cfg.parent1),
        parent2: leg(cfg.parent2),
        parent3: leg(cfg.parent3),
        company: 0,
    };
    split.company = leg(cfg.aggregate())
        - (split.staff
            + split.master_ib
            + split.agent
            + split.parent1
            + split.parent2
            + split.parent3);

    let self_forbidden = forbidden.contains(&user.username);

    let retains_agent_share =
        matches!(user.class, UserClass::Agent | UserClass::MasterIb) && !self_forbidden;
    if !retains_agent_share {
        split.company += split.agent;
        split.agent = 0;
    }

    let voided = |recipient: &Option<String>| {
        recipient
            .as_deref()
            .map_or(true, |name| self_forbidden || forbidden.contains(name))
    };

    if voided(&user.lineage.master) {
        split.company += split.master_ib;
        split.master_ib = 0;
    }
    for (idx, leg_value) in [&mut split.parent1, &mut split.parent2, &mut split.parent3]
        .into_iter()
        .enumerate()
    {
        if voided(&user.lineage.parents[idx]) {
            split.company += *leg_value;
            *leg_value = 0;
        }
    }

    if user.demo {
        split.company = 0;
        split.staff = 0;
    }

    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::types::{Lineage, PlayStatus};

    fn user(username: &str, class: UserClass, lineage: Lineage, demo: bool) -> UserSession {
        UserSession {
            id: 1,
            username: username.to_string(),
            demo,
            class,
            lineage,
        }
    }

    fn full_lineage() -> Lineage {
        Lineage {
            master: Some("master".into()),
            parents: [Some("p1".into()), Some("p2".into()), Some("p3".into())],
        }
    }

    #[test]
    fn config_validation() {
        assert!(CommissionConfig::default().validate().is_ok());

        let negative = CommissionConfig {
            staff: -1.0,
            ..CommissionConfig::default()
        };
        assert!(negative.validate().is_err());

        let too_big = CommissionConfig {
            agent: 99.0,
            ..CommissionConfig::default()
        };
        assert!(too_big.validate().is_err());
    }

    #[test]
    fn busted_reference_scenario() {
        // stake 1000, agent=5%, staff=2%, no lineage, crash 0:
        // staff leg 20, agent leg redirected, company = aggregate - staff.
        let cfg = CommissionConfig {
            staff: 2.0,
            master_ib: 0.0,
            agent: 5.0,
            parent1: 0.0,
            parent2: 0.0,
            parent3: 0.0,
        };
        let player = user("solo", UserClass::Player, Lineage::default(), false);
        let legs = commission_legs(1_000, &player, &HashSet::new(), &cfg);

        assert_eq!(legs.staff, 20);
        assert_eq!(legs.agent, 0);
        assert_eq!(legs.master_ib, 0);
        assert_eq!(legs.company, 70 - 20);
        assert_eq!(legs.total(), 70);
    }

    #[test]
    fn legs_sum_is_invariant_under_redirection() {
        let cfg = CommissionConfig::default();
        let volume = 12_345;
        let expected = (volume as f64 * cfg.aggregate() / 100.0).round() as i64;

        let cases = [
            user("a", UserClass::Player, Lineage::default(), false),
            user("b", UserClass::Agent, full_lineage(), false),
            user("c", UserClass::MasterIb, full_lineage(), false),
        ];
        for u in &cases {
            for forbidden_name in [None, Some(u.username.clone()), Some("p2".to_string())] {
                let mut forbidden = HashSet::new();
                if let Some(name) = forbidden_name {
                    forbidden.insert(name);
                }
                let legs = commission_legs(volume, u, &forbidden, &cfg);
                assert_eq!(legs.total(), expected, "user {}", u.username);
            }
        }
    }

    #[test]
    fn forbidden_player_gives_nothing_upstream() {
        let cfg = CommissionConfig::default();
        let u = user("whale", UserClass::Agent, full_lineage(), false);
        let mut forbidden = HashSet::new();
        forbidden.insert("whale".to_string());

        let legs = commission_legs(10_000, &u, &forbidden, &cfg);
        // Forbidden agents keep no agent share and feed no lineage.
        assert_eq!(legs.agent, 0);
        assert_eq!(legs.master_ib, 0);
        assert_eq!(legs.parent1, 0);
        assert_eq!(legs.parent2, 0);
        assert_eq!(legs.parent3, 0);
    }

    #[test]
    fn forbidden_recipient_leg_voids_into_company() {
        let cfg = CommissionConfig::default();
        let u = user("child", UserClass::Agent, full_lineage(), false);
        let mut forbidden = HashSet::new();
        forbidden.insert("p1".to_string());

        let legs = commission_legs(10_000, &u, &forbidden, &cfg);
        assert_eq!(legs.parent1, 0);
        assert!(legs.parent2 > 0);
        assert!(legs.master_ib > 0);
        // Non-forbidden agent keeps their own share.
        assert!(legs.agent > 0);
    }

    #[test]
    fn demo_moves_nothing_to_house_or_staff() {
        let cfg = CommissionConfig::default();
        let u = user("demo", UserClass::Player, full_lineage(), true);
        let legs = commission_legs(10_000, &u, &HashSet::new(), &cfg);
        assert_eq!(legs.company, 0);
        assert_eq!(legs.staff, 0);
    }

    #[test]
    fn forbidden_scan_conditions() {
        let band = NoCommissionBand { from: 100, to: 150 };
        let mk = |name: &str, bet: i64, auto: u64, cash_out: i64| Play {
            user: user(name, UserClass::Player, Lineage::default(), false),
            play_id: 0,
            bet,
            extra_bet: 0,
            range_bets: vec![],
            auto_cash_out: auto,
            status: PlayStatus::Playing,
            stopped_at: None,
            cash_out,
        };

        let plays = vec![
            mk("bust", 1_000, 200, 0),        // instant-crash bust
            mk("lowauto", 1_000, 120, 0),     // auto-cashout inside the band
            mk("lowratio", 1_000, 200, 1_200), // payout/stake = 1.2 in band
            mk("clean", 1_000, 200, 2_000),   // ratio 2.0, outside
            mk("rangeonly", 0, 0, 0),          // no stake: ratio undefined
        ];

        let forbidden = forbidden_set(&plays, 0, &band);
        assert!(forbidden.contains("bust"));
        assert!(forbidden.contains("lowauto"));
        assert!(forbidden.contains("lowratio"));
        assert!(!forbidden.contains("clean"));
        // Zero stake plays are only caught by the other predicates; with a
        // nonzero crash point they stay clean.
        let forbidden = forbidden_set(&plays[4..], 200, &band);
        assert!(forbidden.is_empty());
    }

    #[test]
    fn band_is_half_open() {
        let band = NoCommissionBand { from: 100, to: 150 };
        assert!(band.contains(100));
        assert!(band.contains(149));
        assert!(!band.contains(150));
    }
}
