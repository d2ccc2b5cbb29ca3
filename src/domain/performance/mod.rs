mod metrics;
mod stats;

pub use metrics::PerformanceMetrics;
pub use stats::Stats;
