use std::str::FromStr;

use serde::Deserialize;

use crate::models::CaptureInterval;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub monitored: MonitoredConfig,
    pub capture: CaptureConfig,
    pub rollup: RollupConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Where captured metrics are stored.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

/// The database whose tables are monitored.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoredConfig {
    pub path: String,
    /// Identifies the monitored database in the metrics store.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    pub interval_secs: u64,
    /// Max tables captured in parallel.
    #[serde(default = "default_capture_concurrency")]
    pub concurrency: usize,
}

fn default_capture_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    /// Coarse intervals to produce, finest first (e.g. ["daily", "weekly"]).
    #[serde(default = "default_rollup_intervals")]
    pub intervals: Vec<CaptureInterval>,
    /// Optional cron expression for rollup runs (e.g. "0 5 * * * *" = five past each hour). UTC.
    pub schedule: Option<String>,
    /// Run rollups every N seconds when schedule is not set.
    pub interval_secs: u64,
    /// Roll up all stored history once at startup.
    #[serde(default)]
    pub backfill_on_start: bool,
}

fn default_rollup_intervals() -> Vec<CaptureInterval> {
    vec![CaptureInterval::Daily]
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log capture/rollup totals at INFO level.
    pub stats_log_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            !self.monitored.path.is_empty(),
            "monitored.path must be non-empty"
        );
        anyhow::ensure!(
            !self.monitored.name.is_empty(),
            "monitored.name must be non-empty"
        );
        anyhow::ensure!(
            self.capture.interval_secs > 0,
            "capture.interval_secs must be > 0, got {}",
            self.capture.interval_secs
        );
        anyhow::ensure!(
            self.capture.concurrency > 0,
            "capture.concurrency must be > 0, got {}",
            self.capture.concurrency
        );
        anyhow::ensure!(
            !self.rollup.intervals.is_empty(),
            "rollup.intervals must list at least one interval"
        );
        for (i, interval) in self.rollup.intervals.iter().enumerate() {
            let Some(source) = interval.source() else {
                anyhow::bail!(
                    "rollup.intervals: {} has no finer interval to roll up from",
                    interval
                );
            };
            // captured directly, or produced by an earlier rollup
            anyhow::ensure!(
                source == CaptureInterval::FINEST || self.rollup.intervals[..i].contains(&source),
                "rollup.intervals: {} rolls up {} records, so {} must be listed before it",
                interval,
                source,
                source
            );
        }
        anyhow::ensure!(
            self.rollup.intervals.windows(2).all(|w| w[0] < w[1]),
            "rollup.intervals must be listed finest first without repeats, got {:?}",
            self.rollup.intervals
        );
        if let Some(ref schedule) = self.rollup.schedule {
            cron::Schedule::from_str(schedule)
                .map_err(|e| anyhow::anyhow!("rollup.schedule is not a valid cron expression: {}", e))?;
        }
        anyhow::ensure!(
            self.rollup.interval_secs > 0,
            "rollup.interval_secs must be > 0, got {}",
            self.rollup.interval_secs
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        Ok(())
    }
}
