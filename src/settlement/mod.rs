pub mod commission;
pub mod engine;

pub use commission::{
    commission_legs, forbidden_set, CommissionConfig, CommissionError, LegSplit, NoCommissionBand,
};
pub use engine::{PlaySettlement, ProfitEntry, SettleError, SettlementEngine};
