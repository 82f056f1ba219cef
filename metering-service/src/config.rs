use std::{fs, net::SocketAddr, time::Duration};

use metering_client::domain::Granularity;
use serde::Deserialize;
use time::UtcOffset;

/// Longest accepted trailing window: one leap year.
pub const MAX_WINDOW_SECS: u64 = 366 * 86_400;
/// Longest accepted tick period: one day.
pub const MAX_TICK_PERIOD_MS: u64 = 86_400_000;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub kind: StoreKind,
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub apply_schema: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mqtt,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSourceConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub channel_capacity: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    pub mqtt: Option<MqttSourceConfig>,
    pub http: Option<HttpSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    pub price_per_kwh: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub tick_period_ms: u64,
    pub minute_window_secs: u64,
    pub hour_window_secs: u64,
    pub day_window_secs: u64,
    pub month_window_secs: u64,
    pub utc_offset_minutes: i32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 3_000,
            minute_window_secs: Granularity::Minute.default_window().as_secs(),
            hour_window_secs: Granularity::Hour.default_window().as_secs(),
            day_window_secs: Granularity::Day.default_window().as_secs(),
            month_window_secs: Granularity::Month.default_window().as_secs(),
            utc_offset_minutes: 0,
        }
    }
}

impl AggregationConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn window(&self, granularity: Granularity) -> Duration {
        let secs = match granularity {
            Granularity::Minute => self.minute_window_secs,
            Granularity::Hour => self.hour_window_secs,
            Granularity::Day => self.day_window_secs,
            Granularity::Month => self.month_window_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigError> {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60))
            .map_err(|e| ConfigError::Invalid(format!("aggregation.utc_offset_minutes: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub pricing: PricingConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        use std::env;

        let path = env::var("METERING_CONFIG").unwrap_or_else(|_| "metering-config.toml".to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.database.kind == StoreKind::Postgres && self.database.uri.trim().is_empty() {
            return invalid("database.uri is required for the postgres store");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be > 0");
        }

        if self.source.channel_capacity == 0 {
            return invalid("source.channel_capacity must be > 0");
        }
        if self.source.max_in_flight == 0 {
            return invalid("source.max_in_flight must be > 0");
        }
        match self.source.kind {
            SourceKind::Mqtt => {
                let Some(mqtt) = &self.source.mqtt else {
                    return invalid("[source.mqtt] is required when source.kind = \"mqtt\"");
                };
                if mqtt.host.trim().is_empty() {
                    return invalid("source.mqtt.host must not be empty");
                }
                if mqtt.topic.trim().is_empty() {
                    return invalid("source.mqtt.topic must not be empty");
                }
                if mqtt.keep_alive_secs < 5 {
                    return invalid("source.mqtt.keep_alive_secs must be >= 5");
                }
            }
            SourceKind::Http => {
                let Some(http) = &self.source.http else {
                    return invalid("[source.http] is required when source.kind = \"http\"");
                };
                parse_bind_addr("source.http.bind_addr", &http.bind_addr)?;
            }
        }

        if !(self.pricing.price_per_kwh.is_finite() && self.pricing.price_per_kwh >= 0.0) {
            return invalid("pricing.price_per_kwh must be a finite, non-negative number");
        }

        let agg = &self.aggregation;
        if agg.tick_period_ms == 0 {
            return invalid("aggregation.tick_period_ms must be > 0");
        }
        if agg.tick_period_ms > MAX_TICK_PERIOD_MS {
            return Err(ConfigError::Invalid(format!(
                "aggregation.tick_period_ms must be <= {MAX_TICK_PERIOD_MS}"
            )));
        }
        for g in Granularity::ALL {
            let window = agg.window(g);
            if window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "aggregation.{g}_window_secs must be > 0"
                )));
            }
            if window.as_secs() > MAX_WINDOW_SECS {
                return Err(ConfigError::Invalid(format!(
                    "aggregation.{g}_window_secs must be <= {MAX_WINDOW_SECS}"
                )));
            }
        }
        agg.utc_offset()?;

        if let Some(metrics) = &self.metrics {
            parse_bind_addr("metrics.bind_addr", &metrics.bind_addr)?;
        }

        Ok(())
    }
}

pub fn parse_bind_addr(field: &str, addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|e| ConfigError::Invalid(format!("{field} '{addr}': {e}")))
}

fn default_max_connections() -> u32 {
    4
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_backoff_ms() -> u64 {
    5_000
}

fn default_max_in_flight() -> usize {
    16
}
