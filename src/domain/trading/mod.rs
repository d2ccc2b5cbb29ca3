mod ledger;
mod types;

pub use ledger::Ledger;
pub use types::{Position, PositionStatus, Side, TradeLogEntry};
