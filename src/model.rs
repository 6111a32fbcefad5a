// Model of the data that flows through one tick of the telemetry loop

use crate::error::{ErrorKind, SensorError, UploadError};

/// Why the link is in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    Timeout,
    AuthRejected,
    LinkLost,
}

impl From<FailReason> for ErrorKind {
    fn from(reason: FailReason) -> Self {
        match reason {
            FailReason::Timeout => Self::ConnectTimeout,
            FailReason::AuthRejected => Self::AuthRejected,
            FailReason::LinkLost => Self::LinkLost,
        }
    }
}

/// Network connection state, owned by the connectivity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(FailReason),
}

impl ConnectionState {
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "offline",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed(FailReason::Timeout) => "timeout",
            Self::Failed(FailReason::AuthRejected) => "auth rejected",
            Self::Failed(FailReason::LinkLost) => "link lost",
        }
    }
}

/// One validated measurement.
///
/// Only the sensor unit creates readings, and only from values that passed
/// validation, so `valid` is true for every reading that leaves it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    timestamp: u64,
    temperature: f64,
    humidity: f64,
    valid: bool,
}

impl Reading {
    pub(crate) const fn validated(timestamp: u64, temperature: f64, humidity: f64) -> Self {
        Self {
            timestamp,
            temperature,
            humidity,
            valid: true,
        }
    }

    /// Monotonic milliseconds at which the sample was taken
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Degrees Celsius
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Relative humidity in percent
    pub const fn humidity(&self) -> f64 {
        self.humidity
    }

    pub const fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Bookkeeping for one reading while the uploader works on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadAttempt {
    pub reading: Reading,
    pub attempt_count: u32,
    pub last_error: Option<ErrorKind>,
    pub next_retry_at: u64,
}

impl UploadAttempt {
    pub const fn new(reading: Reading, now: u64) -> Self {
        Self {
            reading,
            attempt_count: 0,
            last_error: None,
            next_retry_at: now,
        }
    }
}

/// Terminal result of the most recent upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Nothing has been submitted yet
    Idle,
    Delivered { attempts: u32, at: u64 },
    Failed { error: UploadError, attempts: u32 },
}

/// Snapshot handed to the presenter once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub tick: u32,
    /// Milliseconds since the loop started
    pub uptime_ms: u64,
    pub connection: ConnectionState,
    /// Most recent valid reading, possibly from an earlier tick
    pub last_reading: Option<Reading>,
    /// Sensor failure observed this tick
    pub sensor_fault: Option<SensorError>,
    pub upload: UploadOutcome,
}
