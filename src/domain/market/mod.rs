mod asset;
mod bar;
mod ticker;

pub use asset::{Asset, AssetBook, Cursor};
pub use bar::{Bar, Resolution};
pub use ticker::{TickerAudit, TickerRecord};
