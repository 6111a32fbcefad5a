//! Telemetry submission
//!
//! One `submit` call owns one reading from encoding to a terminal outcome.
//! Transient failures are retried with capped exponential backoff that starts
//! from the base delay for every reading; permanent rejections are reported at
//! once. There is no queue: a reading that exhausts its attempts, or would need
//! a retry past its deadline, is dropped and the next tick brings a fresh one.

use log::{debug, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::{ErrorKind, UploadError};
use crate::model::{ConnectionState, Reading, UploadAttempt, UploadOutcome};
use crate::traits::{Clock, Jitter, Transport};
use crate::wire::{Delivery, TelemetryCodec};

pub struct TelemetryUploader<T, K, C, J> {
    transport: T,
    codec: K,
    clock: C,
    jitter: J,
    backoff: Backoff,
    max_attempts: u32,
    last_outcome: UploadOutcome,
}

impl<T, K, C, J> TelemetryUploader<T, K, C, J>
where
    T: Transport,
    K: TelemetryCodec,
    C: Clock,
    J: Jitter,
{
    pub fn new(
        transport: T,
        codec: K,
        clock: C,
        jitter: J,
        policy: BackoffPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            transport,
            codec,
            clock,
            jitter,
            backoff: Backoff::new(policy),
            max_attempts: max_attempts.max(1),
            last_outcome: UploadOutcome::Idle,
        }
    }

    pub fn last_outcome(&self) -> UploadOutcome {
        self.last_outcome
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver one reading, retrying transient failures within this call
    pub async fn submit(
        &mut self,
        connection: ConnectionState,
        reading: Reading,
    ) -> Result<(), UploadError> {
        self.submit_within(connection, reading, u64::MAX).await
    }

    /// [`submit`](Self::submit), but no retry is scheduled at or after
    /// `deadline`. The first attempt is always made.
    pub async fn submit_within(
        &mut self,
        connection: ConnectionState,
        reading: Reading,
        deadline: u64,
    ) -> Result<(), UploadError> {
        if !connection.is_connected() {
            debug!("upload skipped: link is {}", connection.label());
            return self.finish(Err(UploadError::NotConnected), 0);
        }
        if !reading.is_valid() {
            return self.finish(Err(UploadError::Rejected), 0);
        }

        let frame = match self.codec.encode(&reading) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("upload encoding failed: {}", err);
                return self.finish(Err(UploadError::Rejected), 0);
            }
        };

        self.backoff.reset();
        let mut attempt = UploadAttempt::new(reading, self.clock.now_ms());
        loop {
            self.clock.sleep_until_ms(attempt.next_retry_at).await;
            attempt.attempt_count += 1;

            let delivery = match self.transport.exchange(&frame).await {
                Ok(reply) => self.codec.classify(&reply),
                Err(err) => {
                    debug!("upload exchange failed: {}", err);
                    Delivery::Retry
                }
            };

            match delivery {
                Delivery::Accepted => {
                    self.backoff.reset();
                    info!(
                        "upload delivered (attempts={}, t={:.2}, h={:.2})",
                        attempt.attempt_count,
                        reading.temperature(),
                        reading.humidity()
                    );
                    return self.finish(Ok(()), attempt.attempt_count);
                }
                Delivery::Reject => {
                    attempt.last_error = Some(ErrorKind::UploadRejected);
                    warn!("upload rejected by endpoint; not retrying");
                    return self.finish(Err(UploadError::Rejected), attempt.attempt_count);
                }
                Delivery::Retry => {
                    attempt.last_error = Some(ErrorKind::UploadTransient);
                    let delay = self.backoff.record_failure(&mut self.jitter);
                    if attempt.attempt_count >= self.max_attempts {
                        warn!(
                            "upload failed after {} attempts; dropping reading from t={}",
                            attempt.attempt_count,
                            reading.timestamp()
                        );
                        return self.finish(Err(UploadError::Transient), attempt.attempt_count);
                    }
                    attempt.next_retry_at = self.clock.now_ms().saturating_add(delay);
                    if attempt.next_retry_at >= deadline {
                        warn!(
                            "upload failed (attempt {}/{}); no retry before deadline, dropping t={}",
                            attempt.attempt_count,
                            self.max_attempts,
                            reading.timestamp()
                        );
                        return self.finish(Err(UploadError::Transient), attempt.attempt_count);
                    }
                    info!(
                        "upload retrying in {} ms (attempt {}/{})",
                        delay, attempt.attempt_count, self.max_attempts
                    );
                }
            }
        }
    }

    fn finish(&mut self, result: Result<(), UploadError>, attempts: u32) -> Result<(), UploadError> {
        self.last_outcome = match result {
            Ok(()) => UploadOutcome::Delivered {
                attempts,
                at: self.clock.now_ms(),
            },
            Err(error) => UploadOutcome::Failed { error, attempts },
        };
        result
    }
}
