use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level error taxonomy for engine operations.
///
/// Only `StrategyFault` and `PersistenceFault` propagate out of a running
/// simulation; everything else is validation at the perimeter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no data: {0}")]
    NoData(String),

    #[error("strategy fault at {location}: {message}")]
    StrategyFault { message: String, location: String },

    #[error("persistence fault: {0}")]
    PersistenceFault(String),

    #[error("another instance is already running for job '{job}'")]
    Concurrent { job: String },

    #[error("stalled: {0}")]
    Stalled(String),
}

impl EngineError {
    pub fn strategy_fault(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StrategyFault {
            message: message.into(),
            location: location.into(),
        }
    }

    /// Process exit code contract: 0 success, 1 validation/partial, 2 fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) => 1,
            EngineError::NoData(_) => 1,
            EngineError::StrategyFault { .. } => 2,
            EngineError::PersistenceFault(_) => 2,
            EngineError::Concurrent { .. } => 2,
            EngineError::Stalled(_) => 2,
        }
    }
}

/// Errors raised by ledger operations on positions and capital.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("insufficient funds: need ${need}, available ${available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("invalid quantity: {quantity}")]
    InvalidQuantity { quantity: Decimal },

    #[error("invalid price: {price}")]
    InvalidPrice { price: Decimal },

    #[error("position not found: #{id}")]
    PositionNotFound { id: u64 },

    #[error("position #{id} is already closed")]
    AlreadyClosed { id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trading_error_formatting() {
        let err = TradingError::InsufficientFunds {
            need: dec!(1100),
            available: dec!(1000),
        };

        let msg = err.to_string();
        assert!(msg.contains("1100"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineError::InvalidInput("bad date".into()).exit_code(), 1);
        assert_eq!(
            EngineError::Concurrent {
                job: "update-quotes".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            EngineError::strategy_fault("sma_cross::on_close", "boom").exit_code(),
            2
        );
    }
}
