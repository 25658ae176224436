pub mod engine;
pub mod events;
pub mod risk;
pub mod types;

pub use engine::RoundEngine;
pub use events::RoundEvent;
pub use types::{Play, PlayStatus, Round, RoundSnapshot, RoundState, UserSession};
