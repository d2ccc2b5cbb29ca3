use crate::application::monitor::{AdvanceOutcome, MonitorService, SkipReason};
use crate::application::quotes::{QuoteUpdateService, QuoteUpdateSummary};
use crate::config::Config;
use crate::domain::repositories::MonitorRepo;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct MonitorAdvanceResult {
    pub monitor_id: i64,
    pub name: String,
    pub outcome: String,
    pub error: Option<String>,
}

/// Consolidated result of one daily-update pass, also serialized as the
/// payload handed to the external notifier.
#[derive(Debug, Clone, Serialize)]
pub struct DailyUpdateReport {
    pub date: NaiveDate,
    pub quotes: Option<QuoteUpdateSummary>,
    pub monitors: Vec<MonitorAdvanceResult>,
    pub monitor_failures: usize,
    pub smtp_configured: bool,
}

impl DailyUpdateReport {
    /// 0 all success, 1 partial failure. Fatal conditions surface as
    /// errors before a report exists.
    pub fn exit_code(&self) -> i32 {
        let quote_trouble = self
            .quotes
            .as_ref()
            .map(|q| q.failed > 0)
            .unwrap_or(false);
        if quote_trouble || self.monitor_failures > 0 {
            1
        } else {
            0
        }
    }

    pub fn to_payload(&self) -> serde_json::Value {
        json!(self)
    }
}

/// The compound daily job: quotes first (must complete), then every
/// active monitor, strictly in that order.
pub struct DailyUpdateJob {
    quotes: QuoteUpdateService,
    monitors_service: MonitorService,
    monitors: Arc<dyn MonitorRepo>,
    config: Config,
}

impl DailyUpdateJob {
    pub fn new(
        quotes: QuoteUpdateService,
        monitors_service: MonitorService,
        monitors: Arc<dyn MonitorRepo>,
        config: Config,
    ) -> Self {
        Self {
            quotes,
            monitors_service,
            monitors,
            config,
        }
    }

    pub async fn run(
        &self,
        date: NaiveDate,
        skip_quotes: bool,
        skip_monitors: bool,
    ) -> Result<DailyUpdateReport> {
        let quotes = if skip_quotes {
            info!("daily-update: quote phase skipped");
            None
        } else {
            // Phase 1 must finish before any monitor advances; partial
            // per-ticker failures are tolerated.
            Some(self.quotes.update(None, false).await?)
        };

        let mut monitors = Vec::new();
        let mut monitor_failures = 0usize;
        if !skip_monitors {
            for monitor in self.monitors.get_active().await? {
                match self.monitors_service.advance(monitor.id, date).await {
                    Ok(AdvanceOutcome::Processed { date, equity }) => {
                        monitors.push(MonitorAdvanceResult {
                            monitor_id: monitor.id,
                            name: monitor.name,
                            outcome: format!("processed {date}, equity {equity}"),
                            error: None,
                        });
                    }
                    Ok(AdvanceOutcome::Skipped(reason)) => {
                        let reason = match reason {
                            SkipReason::AlreadyProcessed => "already processed",
                            SkipReason::NoQuotes => "no quotes",
                        };
                        monitors.push(MonitorAdvanceResult {
                            monitor_id: monitor.id,
                            name: monitor.name,
                            outcome: format!("skipped ({reason})"),
                            error: None,
                        });
                    }
                    Err(e) => {
                        // One bad day does not disable the monitor; it
                        // stays active and the failure is reported
                        error!(monitor_id = monitor.id, error = %format!("{e:#}"), "advance failed");
                        monitor_failures += 1;
                        monitors.push(MonitorAdvanceResult {
                            monitor_id: monitor.id,
                            name: monitor.name,
                            outcome: "failed".to_string(),
                            error: Some(format!("{e:#}")),
                        });
                    }
                }
            }
        } else {
            info!("daily-update: monitor phase skipped");
        }

        Ok(DailyUpdateReport {
            date,
            quotes,
            monitors,
            monitor_failures,
            smtp_configured: self.config.smtp.is_configured(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failed_quotes: usize, monitor_failures: usize) -> DailyUpdateReport {
        DailyUpdateReport {
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            quotes: Some(QuoteUpdateSummary {
                updated: 3,
                failed: failed_quotes,
                results: Vec::new(),
            }),
            monitors: Vec::new(),
            monitor_failures,
            smtp_configured: false,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(0, 0).exit_code(), 0);
        assert_eq!(report(1, 0).exit_code(), 1);
        assert_eq!(report(0, 2).exit_code(), 1);
    }

    #[test]
    fn test_payload_shape() {
        let payload = report(0, 0).to_payload();
        assert_eq!(payload["date"], "2024-05-06");
        assert_eq!(payload["quotes"]["updated"], 3);
        assert_eq!(payload["smtp_configured"], false);
    }
}
