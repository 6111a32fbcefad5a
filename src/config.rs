//! Startup configuration
//!
//! Read once at boot and validated before any component is built.

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONNECT_WAIT_MS: u64 = 15_000;
pub const DEFAULT_MAX_UPLOAD_ATTEMPTS: u32 = 3;
pub const DEFAULT_SENSOR_RETRY_COUNT: u32 = 2;
pub const DEFAULT_SENSOR_RETRY_DELAY_MS: u64 = 250;
pub const DEFAULT_MIN_UPLOAD_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_RENDER_BUDGET_MS: u64 = 200;

/// Wi-Fi credentials source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Credentials {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl Credentials {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

/// Payload shape expected by the ingestion endpoint
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// HTTP POST, `application/x-www-form-urlencoded`
    Form,
    /// HTTP POST, `application/json`
    Json,
    /// MQTT publish with a JSON payload
    Mqtt,
}

impl Encoding {
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Form | Self::Json => 80,
            Self::Mqtt => 1883,
        }
    }

    /// Parse the build-time selector; unknown names fall back to `Form`
    pub fn from_name(name: &str) -> Self {
        match name {
            "json" | "JSON" => Self::Json,
            "mqtt" | "MQTT" => Self::Mqtt,
            _ => Self::Form,
        }
    }
}

/// Physically reasonable range for each measured quantity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlausibilityBounds {
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

impl PlausibilityBounds {
    /// Operating range of the BME280 and DHT22 class of sensors
    pub const AMBIENT: Self = Self {
        temperature_min: -40.0,
        temperature_max: 85.0,
        humidity_min: 0.0,
        humidity_max: 100.0,
    };

    pub fn contains(&self, temperature: f64, humidity: f64) -> bool {
        temperature >= self.temperature_min
            && temperature <= self.temperature_max
            && humidity >= self.humidity_min
            && humidity <= self.humidity_max
    }
}

impl Default for PlausibilityBounds {
    fn default() -> Self {
        Self::AMBIENT
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub credentials: Credentials,
    pub endpoint_host: &'static str,
    pub endpoint_port: u16,
    /// Channel number for HTTP endpoints, topic for MQTT
    pub endpoint_id: &'static str,
    /// Write key for HTTP endpoints, password for MQTT
    pub endpoint_key: &'static str,
    pub encoding: Encoding,
    pub tick_interval_ms: u64,
    pub max_connect_wait_ms: u64,
    pub max_upload_attempts: u32,
    pub sensor_retry_count: u32,
    pub sensor_retry_delay_ms: u64,
    pub connect_backoff: BackoffPolicy,
    pub upload_backoff: BackoffPolicy,
    pub bounds: PlausibilityBounds,
    pub min_upload_interval_ms: u64,
    pub render_budget_ms: u64,
}

impl Config {
    pub const fn new(
        credentials: Credentials,
        endpoint_host: &'static str,
        endpoint_id: &'static str,
        endpoint_key: &'static str,
        encoding: Encoding,
    ) -> Self {
        Self {
            credentials,
            endpoint_host,
            endpoint_port: encoding.default_port(),
            endpoint_id,
            endpoint_key,
            encoding,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            max_connect_wait_ms: DEFAULT_MAX_CONNECT_WAIT_MS,
            max_upload_attempts: DEFAULT_MAX_UPLOAD_ATTEMPTS,
            sensor_retry_count: DEFAULT_SENSOR_RETRY_COUNT,
            sensor_retry_delay_ms: DEFAULT_SENSOR_RETRY_DELAY_MS,
            connect_backoff: BackoffPolicy::CONNECT,
            upload_backoff: BackoffPolicy::UPLOAD,
            bounds: PlausibilityBounds::AMBIENT,
            min_upload_interval_ms: DEFAULT_MIN_UPLOAD_INTERVAL_MS,
            render_budget_ms: DEFAULT_RENDER_BUDGET_MS,
        }
    }

    pub const fn with_port(mut self, port: u16) -> Self {
        self.endpoint_port = port;
        self
    }

    pub const fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    pub const fn with_max_connect_wait_ms(mut self, max_connect_wait_ms: u64) -> Self {
        self.max_connect_wait_ms = max_connect_wait_ms;
        self
    }

    pub const fn with_max_upload_attempts(mut self, max_upload_attempts: u32) -> Self {
        self.max_upload_attempts = max_upload_attempts;
        self
    }

    pub const fn with_sensor_retry_count(mut self, sensor_retry_count: u32) -> Self {
        self.sensor_retry_count = sensor_retry_count;
        self
    }

    pub const fn with_bounds(mut self, bounds: PlausibilityBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.ssid.is_empty() {
            return Err(ConfigError::EmptySsid);
        }
        if self.endpoint_host.is_empty() || self.endpoint_id.is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if self.tick_interval_ms < self.min_upload_interval_ms {
            return Err(ConfigError::TickFasterThanUploadLimit);
        }
        if self.max_upload_attempts == 0 {
            return Err(ConfigError::ZeroUploadAttempts);
        }
        let b = &self.bounds;
        if b.temperature_min > b.temperature_max || b.humidity_min > b.humidity_max {
            return Err(ConfigError::InvertedBounds);
        }
        if self.connect_backoff.base_ms > self.connect_backoff.cap_ms
            || self.upload_backoff.base_ms > self.upload_backoff.cap_ms
        {
            return Err(ConfigError::InvertedBackoff);
        }
        Ok(())
    }
}

/// Parse an optional millisecond override, keeping `default` when the value
/// is absent or not a number
pub fn parse_millis(value: Option<&str>, default: u64) -> u64 {
    value
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
