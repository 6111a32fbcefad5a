//! Networked temperature/humidity telemetry node
//!
//! The core loop (connect, sample, upload, present) is hardware independent
//! and runs on the host under test. ESP32-S3 adapters live behind the
//! `firmware` feature.

#![cfg_attr(not(test), no_std)]

pub mod backoff;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod display;
pub mod error;
#[cfg(feature = "firmware")]
pub mod hardware;
pub mod model;
pub mod presenter;
pub mod sensor;
pub mod traits;
pub mod uploader;
pub mod wire;

#[cfg(test)]
mod testing;
