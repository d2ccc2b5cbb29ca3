pub mod backtest;
pub mod bootstrap;
pub mod jobs;
pub mod monitor;
pub mod optimization;
pub mod quotes;
pub mod strategies;
