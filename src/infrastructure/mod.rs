pub mod locks;
pub mod persistence;
pub mod quote_source;
pub mod repositories;
