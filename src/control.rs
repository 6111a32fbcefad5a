//! The tick loop
//!
//! Each tick runs ensure-connected, acquire, submit and render strictly in
//! that order, then sleeps to the next fixed boundary. A failure in one phase
//! only narrows what the later phases do; nothing stops the loop.

use log::{debug, info, warn};

use crate::config::Config;
use crate::connectivity::ConnectivityManager;
use crate::error::{ConnectError, SensorError, UploadError};
use crate::model::{DeviceStatus, Reading, UploadOutcome};
use crate::presenter::StatusPresenter;
use crate::sensor::SensorUnit;
use crate::traits::{Clock, Jitter, NetworkLink, SensorPeripheral, StatusDisplay, Transport};
use crate::uploader::TelemetryUploader;
use crate::wire::TelemetryCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Connecting,
    Sampling,
    Uploading,
    Presenting,
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub tick: u32,
    pub connect: Result<(), ConnectError>,
    pub sensor: Result<Reading, SensorError>,
    /// `None` when the upload was skipped
    pub upload: Option<Result<(), UploadError>>,
}

/// Next boundary at or after `now`, plus how many boundaries were missed
pub fn next_boundary(previous: u64, interval_ms: u64, now: u64) -> (u64, u64) {
    let next = previous.saturating_add(interval_ms);
    if next >= now || interval_ms == 0 {
        return (next, 0);
    }
    let skipped = (now - next).div_ceil(interval_ms);
    (next + skipped * interval_ms, skipped)
}

pub struct ControlLoop<L, P, T, K, D, C, J> {
    config: Config,
    connectivity: ConnectivityManager<L, C, J>,
    sensor: SensorUnit<P, C>,
    uploader: TelemetryUploader<T, K, C, J>,
    presenter: StatusPresenter<D, C>,
    clock: C,
    phase: LoopPhase,
    tick: u32,
    tick_started_at: u64,
    booted_at: u64,
    last_reading: Option<Reading>,
    last_delivered_at: Option<u64>,
}

impl<L, P, T, K, D, C, J> ControlLoop<L, P, T, K, D, C, J>
where
    L: NetworkLink,
    P: SensorPeripheral,
    T: Transport,
    K: TelemetryCodec,
    D: StatusDisplay,
    C: Clock,
    J: Jitter,
{
    pub fn new(
        config: Config,
        connectivity: ConnectivityManager<L, C, J>,
        sensor: SensorUnit<P, C>,
        uploader: TelemetryUploader<T, K, C, J>,
        presenter: StatusPresenter<D, C>,
        clock: C,
    ) -> Self {
        let tick_started_at = clock.now_ms();
        Self {
            config,
            connectivity,
            sensor,
            uploader,
            presenter,
            clock,
            phase: LoopPhase::Idle,
            tick: 0,
            tick_started_at,
            booted_at: tick_started_at,
            last_reading: None,
            last_delivered_at: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn connectivity(&self) -> &ConnectivityManager<L, C, J> {
        &self.connectivity
    }

    pub fn sensor(&self) -> &SensorUnit<P, C> {
        &self.sensor
    }

    pub fn uploader(&self) -> &TelemetryUploader<T, K, C, J> {
        &self.uploader
    }

    pub fn presenter(&self) -> &StatusPresenter<D, C> {
        &self.presenter
    }

    /// Run forever at the configured cadence
    pub async fn run(&mut self) -> ! {
        info!(
            "telemetry loop started: tick={} ms endpoint={}:{}",
            self.config.tick_interval_ms, self.config.endpoint_host, self.config.endpoint_port
        );
        loop {
            let report = self.run_tick().await;
            debug!("tick {} done: {:?}", report.tick, report);
            self.wait_for_next_tick().await;
        }
    }

    /// One full pass through the phases
    pub async fn run_tick(&mut self) -> TickReport {
        self.tick = self.tick.wrapping_add(1);
        self.tick_started_at = self.clock.now_ms();

        self.phase = LoopPhase::Connecting;
        let connect = self
            .connectivity
            .ensure_connected(&self.config.credentials, self.config.max_connect_wait_ms)
            .await;
        if let Err(err) = connect {
            info!("tick {}: offline ({}), upload skipped", self.tick, err);
        }

        self.phase = LoopPhase::Sampling;
        let sensor = self.sensor.acquire().await;
        if let Ok(reading) = sensor {
            self.last_reading = Some(reading);
        }

        self.phase = LoopPhase::Uploading;
        let upload = match (sensor, connect) {
            (Ok(reading), Ok(())) if self.upload_allowed() => {
                let deadline = self
                    .tick_started_at
                    .saturating_add(self.config.tick_interval_ms);
                let result = self
                    .uploader
                    .submit_within(self.connectivity.state(), reading, deadline)
                    .await;
                if let UploadOutcome::Delivered { at, .. } = self.uploader.last_outcome() {
                    self.last_delivered_at = Some(at);
                }
                Some(result)
            }
            _ => None,
        };

        self.phase = LoopPhase::Presenting;
        let status = DeviceStatus {
            tick: self.tick,
            uptime_ms: self.clock.now_ms().saturating_sub(self.booted_at),
            connection: self.connectivity.state(),
            last_reading: self.last_reading,
            sensor_fault: sensor.err(),
            upload: self.uploader.last_outcome(),
        };
        self.presenter.render(&status);

        self.phase = LoopPhase::Idle;
        TickReport {
            tick: self.tick,
            connect,
            sensor,
            upload,
        }
    }

    // Successful submissions stay at least `min_upload_interval_ms` apart. A
    // late delivery in one tick suppresses the next tick's upload instead of
    // queueing it.
    fn upload_allowed(&self) -> bool {
        let Some(delivered_at) = self.last_delivered_at else {
            return true;
        };
        let since = self.clock.now_ms().saturating_sub(delivered_at);
        if since < self.config.min_upload_interval_ms {
            info!(
                "tick {}: last delivery {} ms ago (minimum {} ms), upload skipped",
                self.tick, since, self.config.min_upload_interval_ms
            );
            return false;
        }
        true
    }

    /// Sleep until the next boundary after the current tick's start
    pub async fn wait_for_next_tick(&mut self) {
        let now = self.clock.now_ms();
        let (next, skipped) =
            next_boundary(self.tick_started_at, self.config.tick_interval_ms, now);
        if skipped > 0 {
            warn!(
                "tick {} overran by {} ms; skipping {} boundaries",
                self.tick,
                now - self.tick_started_at - self.config.tick_interval_ms,
                skipped
            );
        }
        self.clock.sleep_until_ms(next).await;
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::config::{Credentials, Encoding};
    use crate::error::TransportError;
    use crate::model::{ConnectionState, FailReason};
    use crate::testing::{
        FakeClock, FakeLink, FixedJitter, LinkBehavior, RecordingDisplay, ScriptedSensor,
        ScriptedTransport, SlowTransport, ok_reply,
    };
    use crate::traits::{RawSample, RawStatus};
    use crate::wire::{FormCodec, Reply};

    type TestLoop<'a, T = ScriptedTransport> = ControlLoop<
        FakeLink,
        ScriptedSensor,
        T,
        FormCodec,
        RecordingDisplay,
        &'a FakeClock,
        FixedJitter,
    >;

    fn config() -> Config {
        Config::new(
            Credentials::new("lab", "secret"),
            "api.thingspeak.com",
            "12345",
            "KEY",
            Encoding::Form,
        )
    }

    fn build<'a, T: Transport>(
        clock: &'a FakeClock,
        link: LinkBehavior,
        sensor: ScriptedSensor,
        transport: T,
    ) -> TestLoop<'a, T> {
        let config = config();
        let connectivity = ConnectivityManager::new(
            FakeLink::new(link),
            clock,
            FixedJitter(0),
            BackoffPolicy::new(1_000, 30_000, 0),
            config.max_connect_wait_ms,
        );
        let uploader = TelemetryUploader::new(
            transport,
            FormCodec {
                channel_id: config.endpoint_id,
                api_key: config.endpoint_key,
            },
            clock,
            FixedJitter(0),
            config.upload_backoff,
            config.max_upload_attempts,
        );
        ControlLoop::new(
            config,
            connectivity,
            SensorUnit::new(sensor, clock, &config),
            uploader,
            StatusPresenter::new(RecordingDisplay::default(), clock, config.render_budget_ms),
            clock,
        )
    }

    fn shown<T: Transport>(control: &TestLoop<'_, T>) -> DeviceStatus {
        *control
            .presenter()
            .display()
            .shown
            .last()
            .expect("nothing rendered")
    }

    #[test]
    fn healthy_tick_uploads_and_presents() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            ScriptedTransport::always(ok_reply()),
        );

        let report = block_on(control.run_tick());

        assert_eq!(report.tick, 1);
        assert_eq!(report.connect, Ok(()));
        assert_eq!(report.upload, Some(Ok(())));
        assert_eq!(control.phase(), LoopPhase::Idle);
        assert_eq!(control.uploader().transport().calls(), 1);
        let status = shown(&control);
        assert_eq!(status.connection, ConnectionState::Connected);
        assert_eq!(status.upload, UploadOutcome::Delivered { attempts: 1, at: 0 });
    }

    #[test]
    fn nan_reading_skips_upload_and_shows_fault() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::scripted(
                [RawSample::ok(f64::NAN, 45.0)],
                RawSample::ok(21.0, 45.0),
            ),
            ScriptedTransport::always(ok_reply()),
        );

        let report = block_on(control.run_tick());
        assert_eq!(report.sensor, Err(SensorError::InvalidReading));
        assert_eq!(report.upload, None);
        assert_eq!(control.uploader().transport().calls(), 0);
        assert_eq!(shown(&control).sensor_fault, Some(SensorError::InvalidReading));
        assert_eq!(
            crate::display::status_lines(&shown(&control))[2].as_str(),
            "sensor invalid"
        );

        // next tick carries on normally
        block_on(control.wait_for_next_tick());
        let report = block_on(control.run_tick());
        assert_eq!(report.upload, Some(Ok(())));
        assert_eq!(report.tick, 2);
    }

    #[test]
    fn three_send_timeouts_drop_the_reading() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            ScriptedTransport::always(Err(TransportError::Timeout)),
        );

        let report = block_on(control.run_tick());
        assert_eq!(report.upload, Some(Err(UploadError::Transient)));
        assert_eq!(control.uploader().transport().calls(), 3);
        assert_eq!(
            shown(&control).upload,
            UploadOutcome::Failed {
                error: UploadError::Transient,
                attempts: 3
            }
        );
    }

    #[test]
    fn permanent_rejection_reported_every_tick_without_retry() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            ScriptedTransport::always(Ok(Reply::http(401, b"bad key"))),
        );

        for tick in 1..=3u32 {
            let report = block_on(control.run_tick());
            assert_eq!(report.upload, Some(Err(UploadError::Rejected)));
            assert_eq!(control.uploader().transport().calls(), tick as usize);
            block_on(control.wait_for_next_tick());
        }
        // only the tick cadence advanced time
        assert_eq!(clock.now_ms(), 30_000);
    }

    #[test]
    fn outage_keeps_sampling_and_resumes_upload() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            ScriptedTransport::always(ok_reply()),
        );
        block_on(control.run_tick());
        block_on(control.wait_for_next_tick());

        // access point disappears
        control.connectivity().link().drop_link();
        control.connectivity().link().set_behavior(LinkBehavior::Hang);

        let report = block_on(control.run_tick());
        assert_eq!(report.connect, Err(ConnectError::Timeout));
        assert!(report.sensor.is_ok());
        assert_eq!(report.upload, None);
        assert_eq!(
            shown(&control).connection,
            ConnectionState::Failed(FailReason::Timeout)
        );
        assert_eq!(control.sensor().peripheral().reads, 2);

        control.connectivity().link().set_behavior(LinkBehavior::Reachable);
        block_on(control.wait_for_next_tick());
        let report = block_on(control.run_tick());
        assert_eq!(report.connect, Ok(()));
        assert_eq!(report.upload, Some(Ok(())));
        assert_eq!(control.uploader().transport().calls(), 2);
    }

    #[test]
    fn sensor_absent_never_stops_the_loop() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::failed(RawStatus::Absent)),
            ScriptedTransport::always(ok_reply()),
        );
        for _ in 0..3 {
            let report = block_on(control.run_tick());
            assert_eq!(report.sensor, Err(SensorError::PeripheralAbsent));
            block_on(control.wait_for_next_tick());
        }
        assert_eq!(control.presenter().display().shown.len(), 3);
        assert_eq!(control.uploader().transport().calls(), 0);
    }

    #[test]
    fn boundaries_are_fixed_and_overruns_skip() {
        assert_eq!(next_boundary(0, 10_000, 3_000), (10_000, 0));
        assert_eq!(next_boundary(10_000, 10_000, 19_999), (20_000, 0));
        // tick started at 0 ran until 25 s: 10 s and 20 s are skipped
        assert_eq!(next_boundary(0, 10_000, 25_000), (30_000, 2));
        // finishing exactly on the boundary starts the next tick right away
        assert_eq!(next_boundary(0, 10_000, 10_000), (10_000, 0));
        assert_eq!(next_boundary(0, 10_000, 20_000), (20_000, 1));
        assert_eq!(next_boundary(0, 10_000, 20_001), (30_000, 2));
    }

    #[test]
    fn endpoint_outage_keeps_the_tick_period() {
        let clock = FakeClock::default();
        let transport = SlowTransport::new(
            ScriptedTransport::always(Err(TransportError::Timeout)),
            &clock,
            2_000,
        );
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            transport,
        );

        let mut starts = Vec::new();
        for _ in 0..4 {
            starts.push(clock.now_ms());
            let report = block_on(control.run_tick());
            assert_eq!(report.upload, Some(Err(UploadError::Transient)));
            block_on(control.wait_for_next_tick());
        }

        assert_eq!(starts, [0, 10_000, 20_000, 30_000]);
        assert_eq!(control.sensor().peripheral().reads, 4);
        // two attempts fit in each tick: 2 s exchange, 2 s wait, 2 s exchange
        assert_eq!(control.uploader().transport().calls(), 8);
        assert_eq!(
            shown(&control).upload,
            UploadOutcome::Failed {
                error: UploadError::Transient,
                attempts: 2
            }
        );
    }

    #[test]
    fn late_delivery_suppresses_the_next_upload() {
        let clock = FakeClock::default();
        let transport = SlowTransport::scripted(
            ScriptedTransport::scripted(
                [Err(TransportError::Timeout), Err(TransportError::Timeout)],
                ok_reply(),
            ),
            &clock,
            [0, 0, 3_500],
            0,
        );
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            transport,
        );

        let report = block_on(control.run_tick());
        assert_eq!(report.upload, Some(Ok(())));
        assert_eq!(
            control.uploader().last_outcome(),
            UploadOutcome::Delivered {
                attempts: 3,
                at: 9_500
            }
        );

        // next boundary is only 500 ms after that delivery
        block_on(control.wait_for_next_tick());
        assert_eq!(clock.now_ms(), 10_000);
        let report = block_on(control.run_tick());
        assert!(report.sensor.is_ok());
        assert_eq!(report.upload, None);
        assert_eq!(control.uploader().transport().calls(), 3);

        block_on(control.wait_for_next_tick());
        let report = block_on(control.run_tick());
        assert_eq!(report.upload, Some(Ok(())));
        assert_eq!(control.uploader().transport().calls(), 4);
    }

    #[test]
    fn overrunning_tick_waits_for_the_following_boundary() {
        let clock = FakeClock::default();
        let mut control = build(
            &clock,
            LinkBehavior::Reachable,
            ScriptedSensor::steady(RawSample::ok(21.0, 45.0)),
            // two retries cost 2 s + 4 s, then the slow endpoint answers
            ScriptedTransport::scripted(
                [Err(TransportError::Timeout), Err(TransportError::Timeout)],
                ok_reply(),
            ),
        );

        block_on(control.run_tick());
        assert_eq!(clock.now_ms(), 6_000);
        clock.advance(5_000);
        block_on(control.wait_for_next_tick());
        assert_eq!(clock.now_ms(), 20_000);
    }
}
