//! Status presentation
//!
//! Rendering is best effort. A missing or broken display must never hold up
//! sensing or upload, so failures are logged once and swallowed.

use log::{info, warn};

use crate::error::PresentError;
use crate::model::DeviceStatus;
use crate::traits::{Clock, StatusDisplay};

pub struct StatusPresenter<D, C> {
    display: D,
    clock: C,
    budget_ms: u64,
    fault: Option<PresentError>,
    budget_warned: bool,
}

impl<D, C> StatusPresenter<D, C>
where
    D: StatusDisplay,
    C: Clock,
{
    pub fn new(display: D, clock: C, budget_ms: u64) -> Self {
        Self {
            display,
            clock,
            budget_ms,
            fault: None,
            budget_warned: false,
        }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Display failure currently being ignored, if any
    pub fn fault(&self) -> Option<PresentError> {
        self.fault
    }

    pub fn render(&mut self, status: &DeviceStatus) {
        let started = self.clock.now_ms();
        let result = self.display.show(status);
        let elapsed = self.clock.now_ms().saturating_sub(started);

        match result {
            Ok(()) => {
                if let Some(previous) = self.fault.take() {
                    info!("display recovered after: {}", previous);
                }
            }
            Err(err) => {
                if self.fault.is_none() {
                    warn!("display unavailable: {}; continuing without it", err);
                }
                self.fault = Some(err);
            }
        }

        if elapsed > self.budget_ms && !self.budget_warned {
            self.budget_warned = true;
            warn!(
                "display render took {} ms (budget {} ms)",
                elapsed, self.budget_ms
            );
        }
    }
}
