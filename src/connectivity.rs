//! Network interface lifecycle
//!
//! [`ConnectivityManager`] is the only owner of the [`NetworkLink`] and the
//! only writer of [`ConnectionState`]. Every wait it performs is bounded, and
//! consecutive failures are spaced by a capped exponential backoff that is
//! checked against the clock instead of slept through, so a long outage never
//! stalls sampling.

use embassy_futures::select::{Either, select};
use log::{debug, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::config::Credentials;
use crate::error::ConnectError;
use crate::model::{ConnectionState, FailReason};
use crate::traits::{Clock, Jitter, LinkFault, NetworkLink};

/// Cadence of link flag checks while waiting for an address
pub const LINK_POLL_INTERVAL_MS: u64 = 250;

pub struct ConnectivityManager<L, C, J> {
    link: L,
    clock: C,
    jitter: J,
    state: ConnectionState,
    backoff: Backoff,
    next_attempt_at: u64,
    last_error: Option<ConnectError>,
    default_wait_ms: u64,
}

impl<L, C, J> ConnectivityManager<L, C, J>
where
    L: NetworkLink,
    C: Clock,
    J: Jitter,
{
    pub fn new(link: L, clock: C, jitter: J, policy: BackoffPolicy, default_wait_ms: u64) -> Self {
        Self {
            link,
            clock,
            jitter,
            state: ConnectionState::Disconnected,
            backoff: Backoff::new(policy),
            next_attempt_at: 0,
            last_error: None,
            default_wait_ms,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Earliest time another connection attempt will be made
    pub fn next_attempt_at(&self) -> u64 {
        self.next_attempt_at
    }

    /// Bring the link up, waiting at most the default bound. A no-op while
    /// already connected.
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<(), ConnectError> {
        if self.state.is_connected() {
            return Ok(());
        }
        self.attempt(credentials, self.default_wait_ms).await
    }

    /// Called once per tick. Returns immediately when connected or while the
    /// backoff window after a failure is still open.
    pub async fn ensure_connected(
        &mut self,
        credentials: &Credentials,
        max_wait_ms: u64,
    ) -> Result<(), ConnectError> {
        self.observe_link();

        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed(_) => {
                if let Some(err) = self.backoff_pending() {
                    return Err(err);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.attempt(credentials, max_wait_ms).await
    }

    pub async fn disconnect(&mut self) {
        self.link.disconnect().await;
        self.state = ConnectionState::Disconnected;
        self.backoff.reset();
        self.next_attempt_at = 0;
        self.last_error = None;
        info!("wifi disconnected");
    }

    fn observe_link(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        let status = self.link.status();
        if !status.is_up() {
            warn!(
                "wifi state lost (associated={} has_address={}); reconnecting",
                status.associated, status.has_address
            );
            self.state = ConnectionState::Failed(FailReason::LinkLost);
        }
    }

    fn backoff_pending(&self) -> Option<ConnectError> {
        if self.backoff.failures() == 0 {
            return None;
        }
        let now = self.clock.now_ms();
        if now >= self.next_attempt_at {
            return None;
        }
        debug!(
            "wifi backoff: next attempt in {} ms",
            self.next_attempt_at - now
        );
        Some(self.last_error.unwrap_or(ConnectError::Timeout))
    }

    async fn attempt(
        &mut self,
        credentials: &Credentials,
        max_wait_ms: u64,
    ) -> Result<(), ConnectError> {
        self.state = ConnectionState::Connecting;
        info!(
            "wifi connecting to {} (max_wait={} ms)",
            credentials.ssid, max_wait_ms
        );

        match self.wait_for_link(credentials, max_wait_ms).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.backoff.reset();
                self.next_attempt_at = 0;
                self.last_error = None;
                info!("wifi connected and dhcp ready");
                Ok(())
            }
            Err(err) => {
                // leave no half-open association behind
                self.link.disconnect().await;

                let (reason, delay) = match err {
                    ConnectError::AuthRejected => {
                        (FailReason::AuthRejected, self.backoff.saturate(&mut self.jitter))
                    }
                    ConnectError::Timeout => (
                        FailReason::Timeout,
                        self.backoff.record_failure(&mut self.jitter),
                    ),
                };
                self.state = ConnectionState::Failed(reason);
                self.last_error = Some(err);
                self.next_attempt_at = self.clock.now_ms().saturating_add(delay);
                warn!(
                    "wifi connect failed: {}; retrying in {} ms (consecutive_failures={})",
                    err,
                    delay,
                    self.backoff.failures()
                );
                Err(err)
            }
        }
    }

    async fn wait_for_link(
        &mut self,
        credentials: &Credentials,
        max_wait_ms: u64,
    ) -> Result<(), ConnectError> {
        let deadline = self.clock.now_ms().saturating_add(max_wait_ms);

        let associated = match select(
            self.link.associate(credentials),
            self.clock.sleep_ms(max_wait_ms),
        )
        .await
        {
            Either::First(result) => result,
            Either::Second(()) => {
                debug!("wifi association did not finish within {} ms", max_wait_ms);
                return Err(ConnectError::Timeout);
            }
        };

        match associated {
            Ok(()) => {}
            Err(LinkFault::AuthRejected) => return Err(ConnectError::AuthRejected),
            Err(LinkFault::Radio) => {
                debug!("wifi radio fault during association");
                return Err(ConnectError::Timeout);
            }
        }

        loop {
            let status = self.link.status();
            if status.auth_rejected {
                return Err(ConnectError::AuthRejected);
            }
            if status.is_up() {
                return Ok(());
            }
            let now = self.clock.now_ms();
            if now >= deadline {
                debug!(
                    "dhcp timeout (associated={} has_address={})",
                    status.associated, status.has_address
                );
                return Err(ConnectError::Timeout);
            }
            self.clock
                .sleep_ms(LINK_POLL_INTERVAL_MS.min(deadline - now))
                .await;
        }
    }
}
