//! Error taxonomy for the telemetry loop.
//!
//! Every component returns its own small error enum. `ErrorKind` flattens all
//! of them into one classification used in upload bookkeeping and logs.

use core::fmt;

/// Flat classification of every failure the loop can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectTimeout,
    AuthRejected,
    LinkLost,
    SensorTransient,
    InvalidReading,
    SensorAbsent,
    NotConnected,
    UploadTransient,
    UploadRejected,
    DisplayAbsent,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectTimeout => "connect timeout",
            Self::AuthRejected => "auth rejected",
            Self::LinkLost => "link lost",
            Self::SensorTransient => "sensor busy",
            Self::InvalidReading => "sensor invalid",
            Self::SensorAbsent => "sensor absent",
            Self::NotConnected => "not connected",
            Self::UploadTransient => "upload failed",
            Self::UploadRejected => "upload rejected",
            Self::DisplayAbsent => "display absent",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection establishment failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Association or address assignment did not finish within the wait bound
    Timeout,
    /// The access point refused the credentials
    AuthRejected,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Connection timeout"),
            Self::AuthRejected => write!(f, "Authentication rejected"),
        }
    }
}

impl core::error::Error for ConnectError {}

impl From<ConnectError> for ErrorKind {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Timeout => Self::ConnectTimeout,
            ConnectError::AuthRejected => Self::AuthRejected,
        }
    }
}

/// Sensor acquisition failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Peripheral busy or timed out; worth a short local retry
    Transient,
    /// Not-a-number, sentinel, checksum or out-of-bounds value
    InvalidReading,
    /// Nothing answered on the bus
    PeripheralAbsent,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "Sensor busy"),
            Self::InvalidReading => write!(f, "Invalid sensor reading"),
            Self::PeripheralAbsent => write!(f, "Sensor not present"),
        }
    }
}

impl core::error::Error for SensorError {}

impl From<SensorError> for ErrorKind {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::Transient => Self::SensorTransient,
            SensorError::InvalidReading => Self::InvalidReading,
            SensorError::PeripheralAbsent => Self::SensorAbsent,
        }
    }
}

/// Telemetry submission failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    /// Submission attempted while the link was not connected
    NotConnected,
    /// Transport or server trouble that survived every retry
    Transient,
    /// Endpoint refused the request; retrying will not help
    Rejected,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not connected"),
            Self::Transient => write!(f, "Upload failed after retries"),
            Self::Rejected => write!(f, "Upload rejected by endpoint"),
        }
    }
}

impl core::error::Error for UploadError {}

impl From<UploadError> for ErrorKind {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotConnected => Self::NotConnected,
            UploadError::Transient => Self::UploadTransient,
            UploadError::Rejected => Self::UploadRejected,
        }
    }
}

/// Display failures. Absorbed by the presenter, never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentError {
    PeripheralAbsent,
    Bus,
}

impl fmt::Display for PresentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeripheralAbsent => write!(f, "Display not present"),
            Self::Bus => write!(f, "Display bus error"),
        }
    }
}

impl core::error::Error for PresentError {}

/// Failures reported by a transport collaborator for a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No reply within the transport timeout
    Timeout,
    /// Endpoint host name did not resolve
    Dns,
    /// Socket connect, read or write failed
    Io,
    /// Reply bytes could not be parsed
    Protocol,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Transport timeout"),
            Self::Dns => write!(f, "DNS resolution failed"),
            Self::Io => write!(f, "Socket error"),
            Self::Protocol => write!(f, "Malformed reply"),
        }
    }
}

impl core::error::Error for TransportError {}

/// Encoding and framing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Output buffer too small for the frame
    Overflow,
    /// Input bytes are not a valid frame
    Malformed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "Frame buffer overflow"),
            Self::Malformed => write!(f, "Malformed frame"),
        }
    }
}

impl core::error::Error for WireError {}

impl From<WireError> for TransportError {
    fn from(_: WireError) -> Self {
        Self::Protocol
    }
}

/// Startup configuration problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    EmptySsid,
    EmptyEndpoint,
    TickFasterThanUploadLimit,
    ZeroUploadAttempts,
    InvertedBounds,
    InvertedBackoff,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySsid => write!(f, "Wi-Fi SSID is empty"),
            Self::EmptyEndpoint => write!(f, "Endpoint host or id is empty"),
            Self::TickFasterThanUploadLimit => {
                write!(f, "Tick interval is shorter than the minimum upload interval")
            }
            Self::ZeroUploadAttempts => write!(f, "Upload attempts must be at least 1"),
            Self::InvertedBounds => write!(f, "Plausibility bounds are inverted"),
            Self::InvertedBackoff => write!(f, "Backoff base exceeds its cap"),
        }
    }
}

impl core::error::Error for ConfigError {}
