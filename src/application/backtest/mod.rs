mod engine;
mod runner;

pub use engine::{DayRecord, SimulationOutcome, Simulator, benchmark_buy_and_hold};
pub use runner::{BacktestRunner, LogBuffer, RunOutput, RunSpec};
