//! In-memory record of recently completed rounds.
//!
//! Served to joining clients alongside the live snapshot; the durable record
//! lives behind the store.

use crate::round::types::PlayerInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One finished round as shown in the round-history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRound {
    pub game_id: u64,
    pub game_crash: u64,
    pub created: DateTime<Utc>,
    pub player_info: HashMap<String, PlayerInfo>,
    pub hash: String,
}

/// Bounded ring of completed rounds, newest first.
#[derive(Debug)]
pub struct RoundHistory {
    rounds: VecDeque<CompletedRound>,
    capacity: usize,
}

impl RoundHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rounds: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn add(&mut self, round: CompletedRound) {
        if self.rounds.len() == self.capacity {
            self.rounds.pop_back();
        }
        self.rounds.push_front(round);
    }

    pub fn rounds(&self) -> impl Iterator<Item = &CompletedRound> {
        self.rounds.iter()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self::new(20)
    }
}
