//! Host-side fakes for the collaborator traits

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::vec::Vec;

use crate::config::Credentials;
use crate::error::{PresentError, TransportError};
use crate::model::DeviceStatus;
use crate::traits::{
    Clock, Jitter, LinkFault, LinkStatus, NetworkLink, RawSample, SensorPeripheral, StatusDisplay,
    Transport,
};
use crate::wire::{Frame, Reply};

pub const LINK_UP: LinkStatus = LinkStatus {
    associated: true,
    has_address: true,
    auth_rejected: false,
};

/// Virtual clock: sleeping advances time instantly
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Cell<u64>,
    sleeps: RefCell<Vec<u64>>,
}

impl FakeClock {
    pub fn starting_at(now: u64) -> Self {
        Self {
            now: Cell::new(now),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn sleeps(&self) -> Vec<u64> {
        self.sleeps.borrow().clone()
    }

    pub fn total_slept(&self) -> u64 {
        self.sleeps.borrow().iter().sum()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.sleeps.borrow_mut().push(ms);
        self.advance(ms);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub u32);

impl Jitter for FixedJitter {
    fn next_u32(&mut self) -> u32 {
        self.0
    }
}

/// Deterministic pseudo-random sequence (LCG)
#[derive(Debug, Clone, Copy)]
pub struct SeqJitter(u32);

impl SeqJitter {
    pub fn new(seed: u32) -> Self {
        Self(seed)
    }
}

impl Jitter for SeqJitter {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0
    }
}

/// Sensor that replays a script, then repeats `fallback`
#[derive(Debug)]
pub struct ScriptedSensor {
    script: VecDeque<RawSample>,
    fallback: RawSample,
    pub reads: u32,
}

impl ScriptedSensor {
    pub fn steady(sample: RawSample) -> Self {
        Self::scripted([], sample)
    }

    pub fn scripted(script: impl IntoIterator<Item = RawSample>, fallback: RawSample) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            reads: 0,
        }
    }
}

impl SensorPeripheral for ScriptedSensor {
    fn read_raw(&mut self) -> RawSample {
        self.reads += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

/// How the fake access point answers an association request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkBehavior {
    /// Associates and gets an address
    Reachable,
    /// Associates but DHCP never completes
    NoAddress,
    /// Association never resolves
    Hang,
    /// Credentials refused
    Reject,
}

#[derive(Debug)]
pub struct FakeLink {
    behavior: Cell<LinkBehavior>,
    status: Cell<LinkStatus>,
    pub associate_calls: u32,
    pub disconnect_calls: u32,
}

impl FakeLink {
    pub fn new(behavior: LinkBehavior) -> Self {
        Self {
            behavior: Cell::new(behavior),
            status: Cell::new(LinkStatus::default()),
            associate_calls: 0,
            disconnect_calls: 0,
        }
    }

    pub fn set_behavior(&self, behavior: LinkBehavior) {
        self.behavior.set(behavior);
    }

    /// Simulate the access point going away
    pub fn drop_link(&self) {
        self.status.set(LinkStatus::default());
    }
}

impl NetworkLink for FakeLink {
    async fn associate(&mut self, _credentials: &Credentials) -> Result<(), LinkFault> {
        self.associate_calls += 1;
        match self.behavior.get() {
            LinkBehavior::Reachable => {
                self.status.set(LINK_UP);
                Ok(())
            }
            LinkBehavior::NoAddress => {
                self.status.set(LinkStatus {
                    associated: true,
                    ..LinkStatus::default()
                });
                Ok(())
            }
            LinkBehavior::Hang => core::future::pending().await,
            LinkBehavior::Reject => {
                self.status.set(LinkStatus {
                    auth_rejected: true,
                    ..LinkStatus::default()
                });
                Err(LinkFault::AuthRejected)
            }
        }
    }

    fn status(&self) -> LinkStatus {
        self.status.get()
    }

    async fn disconnect(&mut self) {
        self.disconnect_calls += 1;
        self.status.set(LinkStatus::default());
    }
}

/// Transport that replays canned replies and records every frame
#[derive(Debug)]
pub struct ScriptedTransport {
    script: VecDeque<Result<Reply, TransportError>>,
    fallback: Result<Reply, TransportError>,
    pub frames: Vec<Frame>,
}

impl ScriptedTransport {
    pub fn always(result: Result<Reply, TransportError>) -> Self {
        Self::scripted([], result)
    }

    pub fn scripted(
        script: impl IntoIterator<Item = Result<Reply, TransportError>>,
        fallback: Result<Reply, TransportError>,
    ) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            frames: Vec::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.frames.len()
    }
}

impl Transport for ScriptedTransport {
    async fn exchange(&mut self, frame: &Frame) -> Result<Reply, TransportError> {
        self.frames.push(frame.clone());
        self.script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// [`ScriptedTransport`] whose exchanges take virtual time
#[derive(Debug)]
pub struct SlowTransport<'a> {
    pub inner: ScriptedTransport,
    clock: &'a FakeClock,
    latencies: VecDeque<u64>,
    fallback_latency: u64,
}

impl<'a> SlowTransport<'a> {
    pub fn new(inner: ScriptedTransport, clock: &'a FakeClock, latency_ms: u64) -> Self {
        Self::scripted(inner, clock, [], latency_ms)
    }

    pub fn scripted(
        inner: ScriptedTransport,
        clock: &'a FakeClock,
        latencies: impl IntoIterator<Item = u64>,
        fallback_latency: u64,
    ) -> Self {
        Self {
            inner,
            clock,
            latencies: latencies.into_iter().collect(),
            fallback_latency,
        }
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

impl Transport for SlowTransport<'_> {
    async fn exchange(&mut self, frame: &Frame) -> Result<Reply, TransportError> {
        let latency = self.latencies.pop_front().unwrap_or(self.fallback_latency);
        self.clock.advance(latency);
        self.inner.exchange(frame).await
    }
}

/// Transport that fails the test if it is ever used
#[derive(Debug, Default)]
pub struct PanickingTransport;

impl Transport for PanickingTransport {
    async fn exchange(&mut self, frame: &Frame) -> Result<Reply, TransportError> {
        panic!("unexpected exchange of {frame:?}")
    }
}

/// Display that records what it was asked to show
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    failures: VecDeque<PresentError>,
    pub shown: Vec<DeviceStatus>,
    pub attempts: u32,
}

impl RecordingDisplay {
    pub fn failing(failures: impl IntoIterator<Item = PresentError>) -> Self {
        Self {
            failures: failures.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl StatusDisplay for RecordingDisplay {
    fn show(&mut self, status: &DeviceStatus) -> Result<(), PresentError> {
        self.attempts += 1;
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }
        self.shown.push(*status);
        Ok(())
    }
}

pub fn ok_reply() -> Result<Reply, TransportError> {
    Ok(Reply::http(200, b"1"))
}
