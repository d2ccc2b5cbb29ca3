use serde::Serialize;
use std::path::PathBuf;

/// Process configuration, read once from the environment at startup
/// (after `dotenvy` has loaded `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the SQLite database files.
    pub data_dir: PathBuf,
    /// Root for job lock files.
    pub var_dir: PathBuf,
    pub tickers_db_url: String,
    pub runs_db_url: String,
    pub monitors_db_url: String,
    /// Narrow the update-monitor lock to `update-monitor-<id>.lock` when a
    /// single monitor is targeted. Default off: one global lock.
    pub monitor_scoped_locks: bool,
    /// Pending runs older than this are presumed never spawned.
    pub pending_restart_secs: i64,
    /// Running runs older than this are marked failed.
    pub running_timeout_secs: i64,
    pub smtp: SmtpConfig,
}

/// Mail settings handed through to the external notifier; the engine only
/// reports whether they are present.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub from_email: Option<String>,
    pub to_email: Option<String>,
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.from_email.is_some() && self.to_email.is_some()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir =
            PathBuf::from(std::env::var("SIMTRADE_DATA_DIR").unwrap_or_else(|_| "data".into()));
        let var_dir =
            PathBuf::from(std::env::var("SIMTRADE_VAR_DIR").unwrap_or_else(|_| "var".into()));

        let db_url = |env_key: &str, file: &str| {
            std::env::var(env_key)
                .unwrap_or_else(|_| format!("sqlite://{}/{file}", data_dir.display()))
        };

        Self {
            tickers_db_url: db_url("SIMTRADE_TICKERS_DB", "tickers.db"),
            runs_db_url: db_url("SIMTRADE_RUNS_DB", "runs.db"),
            monitors_db_url: db_url("SIMTRADE_MONITORS_DB", "monitors.db"),
            monitor_scoped_locks: std::env::var("SIMTRADE_MONITOR_SCOPED_LOCKS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            pending_restart_secs: env_i64("SIMTRADE_PENDING_RESTART_SECS", 120),
            running_timeout_secs: env_i64("SIMTRADE_RUNNING_TIMEOUT_SECS", 1800),
            smtp: SmtpConfig {
                host: std::env::var("SMTP_HOST").ok(),
                port: std::env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()),
                user: std::env::var("SMTP_USER").ok(),
                pass: std::env::var("SMTP_PASS").ok(),
                from_email: std::env::var("FROM_EMAIL").ok(),
                to_email: std::env::var("TO_EMAIL").ok(),
            },
            data_dir,
            var_dir,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_configured_needs_host_and_addresses() {
        let mut smtp = SmtpConfig::default();
        assert!(!smtp.is_configured());
        smtp.host = Some("mail.example.com".into());
        smtp.from_email = Some("a@example.com".into());
        smtp.to_email = Some("b@example.com".into());
        assert!(smtp.is_configured());
    }
}
