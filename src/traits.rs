//! Collaborator traits
//!
//! Everything the loop touches outside of its own state goes through one of
//! these. The firmware implements them on top of esp-hal and embassy; the host
//! tests implement them with scripted fakes.

use crate::config::Credentials;
use crate::error::{PresentError, TransportError};
use crate::model::DeviceStatus;
use crate::wire::{Frame, Reply};

/// Monotonic time source and non-busy sleep
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&self, ms: u64);

    async fn sleep_until_ms(&self, deadline: u64) {
        let now = self.now_ms();
        if deadline > now {
            self.sleep_ms(deadline - now).await;
        }
    }
}

/// Source of randomness for backoff jitter
pub trait Jitter {
    fn next_u32(&mut self) -> u32;
}

/// Status reported by the sensor driver alongside a raw sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Ok,
    Busy,
    Timeout,
    Absent,
    Checksum,
}

/// Untranslated output of one physical read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub temperature: f64,
    pub humidity: f64,
    pub status: RawStatus,
}

impl RawSample {
    pub const fn ok(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
            status: RawStatus::Ok,
        }
    }

    pub const fn failed(status: RawStatus) -> Self {
        Self {
            temperature: f64::NAN,
            humidity: f64::NAN,
            status,
        }
    }
}

/// Temperature/humidity peripheral
pub trait SensorPeripheral {
    /// Perform one physical read, bounded by the driver's own timeout
    fn read_raw(&mut self) -> RawSample;
}

/// Link-layer flags, read without performing network I/O
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub associated: bool,
    pub has_address: bool,
    pub auth_rejected: bool,
}

impl LinkStatus {
    pub const fn is_up(self) -> bool {
        self.associated && self.has_address
    }
}

/// Why an association attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    AuthRejected,
    Radio,
}

/// Network interface (Wi-Fi station or equivalent)
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    /// Start association with the given credentials. May resolve before an
    /// address has been assigned.
    async fn associate(&mut self, credentials: &Credentials) -> Result<(), LinkFault>;

    fn status(&self) -> LinkStatus;

    async fn disconnect(&mut self);
}

/// Moves one encoded frame to the ingestion endpoint and returns its reply
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn exchange(&mut self, frame: &Frame) -> Result<Reply, TransportError>;
}

/// Display or indicator peripheral
pub trait StatusDisplay {
    fn show(&mut self, status: &DeviceStatus) -> Result<(), PresentError>;
}

/// Two outputs showing the same status. Both are always driven; the first
/// error is reported.
impl<A: StatusDisplay, B: StatusDisplay> StatusDisplay for (A, B) {
    fn show(&mut self, status: &DeviceStatus) -> Result<(), PresentError> {
        let first = self.0.show(status);
        let second = self.1.show(status);
        first.and(second)
    }
}

impl<T: Clock> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        (**self).sleep_ms(ms).await
    }
}
