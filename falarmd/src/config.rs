use clap::Parser;
use falarm_broker::{SessionTiming, DEFAULT_MONITOR_PORT, DEFAULT_SENSOR_PORT};
use falarm_sensor::Thresholds;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse Error")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Fire alarm server: sensor ingestion and monitor fan-out
#[derive(Parser, Debug, Default)]
#[command(name = "falarmd", version, long_about = None)]
pub struct Args {
    /// Path to a TOML config file, flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind both listeners to
    #[arg(long)]
    pub host: Option<String>,

    /// Port sensors connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Port monitors connect to
    #[arg(long)]
    pub monitor_port: Option<u16>,

    /// Seconds without a reading before a sensor is reported stale
    #[arg(long)]
    pub stale_timeout_secs: Option<u64>,

    /// Longest wait for a sensor frame before staleness is re-checked
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Reject sensor connections beyond this many live sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Write logs to a daily rolling file in this directory instead of stdout
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlarmConfig {
    pub listen: ListenConfig,
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    pub thresholds: Thresholds,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    /// Unlimited when unset
    pub max_sessions: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub port: u16,
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub stale_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
    pub level: String,
    /// Log every event published to monitors
    pub log_events: bool,
    /// 0 disables the periodic session count report
    pub stats_interval_secs: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            monitor: MonitorConfig::default(),
            session: SessionConfig::default(),
            thresholds: Thresholds::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_SENSOR_PORT,
            max_sessions: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_MONITOR_PORT,
            write_timeout_secs: 5,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let timing = SessionTiming::default();
        Self {
            stale_timeout_secs: timing.stale_timeout.as_secs(),
            poll_interval_ms: timing.poll_interval.as_millis() as u64,
            max_frame_bytes: timing.max_frame_bytes,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: "info".to_string(),
            log_events: true,
            stats_interval_secs: 300,
        }
    }
}

impl AlarmConfig {
    /// Build the config from the optional file named in `args`, then the
    /// flags in `args`
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.listen.host.clone_from(host);
        }
        if let Some(port) = args.port {
            self.listen.port = port;
        }
        if let Some(port) = args.monitor_port {
            self.monitor.port = port;
        }
        if let Some(secs) = args.stale_timeout_secs {
            self.session.stale_timeout_secs = secs;
        }
        if let Some(millis) = args.poll_interval_ms {
            self.session.poll_interval_ms = millis;
        }
        if args.max_sessions.is_some() {
            self.listen.max_sessions = args.max_sessions;
        }
        if args.log_dir.is_some() {
            self.logging.directory.clone_from(&args.log_dir);
        }
        if args.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.stale_timeout_secs == 0 {
            return Err(ConfigError::Invalid("stale_timeout_secs must be > 0".into()));
        }
        if self.session.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.session.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be > 0".into()));
        }
        if self.monitor.write_timeout_secs == 0 {
            return Err(ConfigError::Invalid("write_timeout_secs must be > 0".into()));
        }
        if self.listen.max_sessions == Some(0) {
            return Err(ConfigError::Invalid(
                "max_sessions must be > 0, leave it unset for no limit".into(),
            ));
        }
        if self.listen.port == self.monitor.port && self.listen.port != 0 {
            return Err(ConfigError::Invalid(format!(
                "sensor and monitor listeners both use port {}",
                self.listen.port
            )));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            stale_timeout: Duration::from_secs(self.session.stale_timeout_secs),
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
            max_frame_bytes: self.session.max_frame_bytes,
        }
    }

    pub fn sensor_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    pub fn monitor_addr(&self) -> String {
        format!("{}:{}", self.listen.host, self.monitor.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.write_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AlarmConfig::default();
        config.validate().expect("defaults are valid");

        assert_eq!(config.sensor_addr(), "0.0.0.0:9001");
        assert_eq!(config.monitor_addr(), "0.0.0.0:9002");
        assert_eq!(config.listen.max_sessions, None);

        let timing = config.session_timing();
        assert_eq!(timing.stale_timeout, Duration::from_secs(3600));
        assert_eq!(timing.poll_interval, Duration::from_secs(1));
        assert_eq!(config.thresholds, Thresholds::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AlarmConfig::from_toml(
            r#"
            [listen]
            port = 9100
            max_sessions = 500

            [session]
            stale_timeout_secs = 600

            [thresholds]
            co2_reference = 280.0
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.port, 9100);
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.max_sessions, Some(500));
        assert_eq!(config.session.stale_timeout_secs, 600);
        assert_eq!(config.session.poll_interval_ms, 1000);
        assert_eq!(config.thresholds.co2_reference, 280.0);
        assert_eq!(config.thresholds.max_temperature, 50.0);
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            AlarmConfig::from_toml("[listen]\nprot = 1\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            AlarmConfig::from_toml("[thresholds]\nmax_temprature = 60.0\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = AlarmConfig::from_toml("[listen]\nport = 9100\n").unwrap();
        let args = Args {
            port: Some(9200),
            stale_timeout_secs: Some(5),
            max_sessions: Some(10),
            verbose: true,
            ..Args::default()
        };
        config.apply_args(&args);

        assert_eq!(config.listen.port, 9200);
        assert_eq!(config.session.stale_timeout_secs, 5);
        assert_eq!(config.listen.max_sessions, Some(10));
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AlarmConfig::default();
        config.session.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AlarmConfig::default();
        config.listen.max_sessions = Some(0);
        assert!(config.validate().is_err());

        let mut config = AlarmConfig::default();
        config.monitor.port = config.listen.port;
        assert!(config.validate().is_err());

        let mut config = AlarmConfig::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::parse_from([
            "falarmd",
            "--port",
            "9500",
            "--stale-timeout-secs",
            "120",
            "-v",
        ]);
        let config = AlarmConfig::load(&args).unwrap();
        assert_eq!(config.listen.port, 9500);
        assert_eq!(config.session.stale_timeout_secs, 120);
        assert_eq!(config.logging.level, "debug");
    }
}
