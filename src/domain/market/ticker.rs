use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tradable instrument registered with the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerRecord {
    pub id: i64,
    pub symbol: String,
    pub exchange: String,
    pub source: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TickerRecord {
    /// Field validation applied before create/update.
    pub fn validate(symbol: &str, exchange: &str, source: &str) -> Result<(), String> {
        if symbol.trim().is_empty() {
            return Err("symbol must not be empty".into());
        }
        if symbol.len() > 16 {
            return Err(format!("symbol '{symbol}' is too long (max 16)"));
        }
        if exchange.trim().is_empty() {
            return Err("exchange must not be empty".into());
        }
        if source.trim().is_empty() {
            return Err("source must not be empty".into());
        }
        Ok(())
    }
}

/// Audit row appended on quote updates and administrative actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerAudit {
    pub id: i64,
    pub ticker_id: i64,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
