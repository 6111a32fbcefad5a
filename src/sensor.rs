//! Sensor acquisition
//!
//! The driver's raw contract (status codes, NaN, sentinels) is translated into
//! [`SensorError`] here and nowhere else. Everything downstream sees either a
//! validated [`Reading`] or a typed error.

use log::{debug, warn};

use crate::config::{Config, PlausibilityBounds};
use crate::error::SensorError;
use crate::model::Reading;
use crate::traits::{Clock, RawSample, RawStatus, SensorPeripheral};

/// Value reported by DS18B20/DHT class drivers when the read failed
pub const FAULT_SENTINEL: f64 = -127.0;

pub struct SensorUnit<P, C> {
    peripheral: P,
    clock: C,
    bounds: PlausibilityBounds,
    retry_count: u32,
    retry_delay_ms: u64,
}

impl<P, C> SensorUnit<P, C>
where
    P: SensorPeripheral,
    C: Clock,
{
    pub fn new(peripheral: P, clock: C, config: &Config) -> Self {
        Self {
            peripheral,
            clock,
            bounds: config.bounds,
            retry_count: config.sensor_retry_count,
            retry_delay_ms: config.sensor_retry_delay_ms,
        }
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    /// Exactly one physical read
    pub fn sample(&mut self) -> Result<Reading, SensorError> {
        let raw = self.peripheral.read_raw();
        let (temperature, humidity) = validate(&raw, &self.bounds)?;
        Ok(Reading::validated(
            self.clock.now_ms(),
            temperature,
            humidity,
        ))
    }

    /// [`sample`](Self::sample) with a short local retry on transient errors
    pub async fn acquire(&mut self) -> Result<Reading, SensorError> {
        let mut retries_left = self.retry_count;
        loop {
            match self.sample() {
                Err(SensorError::Transient) if retries_left > 0 => {
                    retries_left -= 1;
                    debug!(
                        "sensor busy; retrying in {} ms ({} left)",
                        self.retry_delay_ms, retries_left
                    );
                    self.clock.sleep_ms(self.retry_delay_ms).await;
                }
                Err(err) => {
                    warn!("sensor read failed: {}", err);
                    return Err(err);
                }
                Ok(reading) => return Ok(reading),
            }
        }
    }
}

/// Map one raw sample onto the error taxonomy
pub fn validate(raw: &RawSample, bounds: &PlausibilityBounds) -> Result<(f64, f64), SensorError> {
    match raw.status {
        RawStatus::Ok => {}
        RawStatus::Busy | RawStatus::Timeout => return Err(SensorError::Transient),
        RawStatus::Absent => return Err(SensorError::PeripheralAbsent),
        RawStatus::Checksum => return Err(SensorError::InvalidReading),
    }

    let (t, h) = (raw.temperature, raw.humidity);
    if !t.is_finite() || !h.is_finite() {
        return Err(SensorError::InvalidReading);
    }
    if t == FAULT_SENTINEL || h == FAULT_SENTINEL {
        return Err(SensorError::InvalidReading);
    }
    if !bounds.contains(t, h) {
        return Err(SensorError::InvalidReading);
    }
    Ok((t, h))
}
