//! Telemetry encodings
//!
//! A codec turns a [`Reading`] into a [`Frame`] and judges the endpoint's
//! [`Reply`]. The uploader only sees these two calls, so HTTP and MQTT
//! endpoints can be swapped without touching its retry logic.

pub mod http;
pub mod mqtt;

use core::fmt::Write;

use heapless::{String, Vec};

use crate::config::{Config, Encoding};
use crate::error::WireError;
use crate::model::Reading;

pub const FRAME_BODY_CAPACITY: usize = 192;
pub const ROUTE_CAPACITY: usize = 64;
pub const REPLY_BODY_CAPACITY: usize = 32;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_PATH: &str = "/update";
const JSON_PATH: &str = "/update.json";

/// Where a frame goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Post {
        path: String<ROUTE_CAPACITY>,
        content_type: &'static str,
    },
    Publish {
        topic: String<ROUTE_CAPACITY>,
    },
}

/// One encoded submission, ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub route: Route,
    pub body: Vec<u8, FRAME_BODY_CAPACITY>,
}

impl Frame {
    pub fn body_str(&self) -> &str {
        core::str::from_utf8(&self.body).unwrap_or("")
    }
}

/// What the endpoint answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Http {
        status: u16,
        body: Vec<u8, REPLY_BODY_CAPACITY>,
    },
    /// MQTT 5 reason code of the CONNACK or PUBACK that ended the session
    Broker { code: u8 },
}

impl Reply {
    pub fn http(status: u16, body: &[u8]) -> Self {
        let take = body.len().min(REPLY_BODY_CAPACITY);
        let mut stored = Vec::new();
        // cannot fail, length is clamped to capacity
        let _ = stored.extend_from_slice(&body[..take]);
        Self::Http {
            status,
            body: stored,
        }
    }

    /// Generic classification, shared by every codec unless it overrides it
    pub fn delivery(&self) -> Delivery {
        match *self {
            Self::Http { status, .. } => classify_http_status(status),
            Self::Broker { code } => mqtt::classify_reason(code),
        }
    }
}

/// Uploader's view of a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Retry,
    Reject,
}

pub fn classify_http_status(status: u16) -> Delivery {
    match status {
        200..=299 => Delivery::Accepted,
        408 | 425 | 429 => Delivery::Retry,
        400..=499 => Delivery::Reject,
        _ => Delivery::Retry,
    }
}

/// Pluggable encoder for the ingestion endpoint
pub trait TelemetryCodec {
    fn encode(&self, reading: &Reading) -> Result<Frame, WireError>;

    fn classify(&self, reply: &Reply) -> Delivery {
        reply.delivery()
    }
}

// ThingSpeak answers 200 with the new entry id, or "0" when it refused the
// write (rate limit), so a 200 alone is not proof of delivery.
fn classify_channel_reply(reply: &Reply) -> Delivery {
    match reply {
        Reply::Http { status: 200, body } if body.trim_ascii() == b"0" => Delivery::Retry,
        other => other.delivery(),
    }
}

/// HTTP form POST: `channel_id=..&api_key=..&field1=<t>&field2=<h>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormCodec {
    pub channel_id: &'static str,
    pub api_key: &'static str,
}

impl TelemetryCodec for FormCodec {
    fn encode(&self, reading: &Reading) -> Result<Frame, WireError> {
        let mut body = Buffer::new();
        body.push_str("channel_id=")?;
        body.push_form_value(self.channel_id)?;
        body.push_str("&api_key=")?;
        body.push_form_value(self.api_key)?;
        body.write_fmt(format_args!(
            "&field1={:.2}&field2={:.2}",
            reading.temperature(),
            reading.humidity()
        ))
        .map_err(|_| WireError::Overflow)?;

        Ok(Frame {
            route: Route::Post {
                path: route(FORM_PATH)?,
                content_type: FORM_CONTENT_TYPE,
            },
            body: body.into_inner(),
        })
    }

    fn classify(&self, reply: &Reply) -> Delivery {
        classify_channel_reply(reply)
    }
}

/// HTTP JSON POST carrying the same keys as [`FormCodec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec {
    pub channel_id: &'static str,
    pub api_key: &'static str,
}

impl TelemetryCodec for JsonCodec {
    fn encode(&self, reading: &Reading) -> Result<Frame, WireError> {
        let mut body = Buffer::new();
        body.push_str("{\"channel_id\":")?;
        body.push_json_str(self.channel_id)?;
        body.push_str(",\"api_key\":")?;
        body.push_json_str(self.api_key)?;
        body.write_fmt(format_args!(
            ",\"field1\":{:.2},\"field2\":{:.2}}}",
            reading.temperature(),
            reading.humidity()
        ))
        .map_err(|_| WireError::Overflow)?;

        Ok(Frame {
            route: Route::Post {
                path: route(JSON_PATH)?,
                content_type: JSON_CONTENT_TYPE,
            },
            body: body.into_inner(),
        })
    }

    fn classify(&self, reply: &Reply) -> Delivery {
        classify_channel_reply(reply)
    }
}

/// MQTT publish of `{"temperature":<t>,"humidity":<h>}` to a fixed topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttJsonCodec {
    pub topic: &'static str,
}

impl TelemetryCodec for MqttJsonCodec {
    fn encode(&self, reading: &Reading) -> Result<Frame, WireError> {
        let mut body = Buffer::new();
        body.write_fmt(format_args!(
            "{{\"temperature\":{:.2},\"humidity\":{:.2}}}",
            reading.temperature(),
            reading.humidity()
        ))
        .map_err(|_| WireError::Overflow)?;

        Ok(Frame {
            route: Route::Publish {
                topic: route(self.topic)?,
            },
            body: body.into_inner(),
        })
    }
}

/// Codec picked from [`Encoding`] at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedCodec {
    Form(FormCodec),
    Json(JsonCodec),
    Mqtt(MqttJsonCodec),
}

impl SelectedCodec {
    pub fn from_config(config: &Config) -> Self {
        match config.encoding {
            Encoding::Form => Self::Form(FormCodec {
                channel_id: config.endpoint_id,
                api_key: config.endpoint_key,
            }),
            Encoding::Json => Self::Json(JsonCodec {
                channel_id: config.endpoint_id,
                api_key: config.endpoint_key,
            }),
            Encoding::Mqtt => Self::Mqtt(MqttJsonCodec {
                topic: config.endpoint_id,
            }),
        }
    }
}

impl TelemetryCodec for SelectedCodec {
    fn encode(&self, reading: &Reading) -> Result<Frame, WireError> {
        match self {
            Self::Form(codec) => codec.encode(reading),
            Self::Json(codec) => codec.encode(reading),
            Self::Mqtt(codec) => codec.encode(reading),
        }
    }

    fn classify(&self, reply: &Reply) -> Delivery {
        match self {
            Self::Form(codec) => codec.classify(reply),
            Self::Json(codec) => codec.classify(reply),
            Self::Mqtt(codec) => codec.classify(reply),
        }
    }
}

fn route(value: &str) -> Result<String<ROUTE_CAPACITY>, WireError> {
    let mut out = String::new();
    out.push_str(value).map_err(|_| WireError::Overflow)?;
    Ok(out)
}

/// Fixed-capacity body writer
struct Buffer(Vec<u8, FRAME_BODY_CAPACITY>);

impl Buffer {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn into_inner(self) -> Vec<u8, FRAME_BODY_CAPACITY> {
        self.0
    }

    fn push_str(&mut self, s: &str) -> Result<(), WireError> {
        self.0
            .extend_from_slice(s.as_bytes())
            .map_err(|_| WireError::Overflow)
    }

    fn push_byte(&mut self, b: u8) -> Result<(), WireError> {
        self.0.push(b).map_err(|_| WireError::Overflow)
    }

    fn push_form_value(&mut self, value: &str) -> Result<(), WireError> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        for &b in value.as_bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                self.push_byte(b)?;
            } else {
                self.push_byte(b'%')?;
                self.push_byte(HEX[usize::from(b >> 4)])?;
                self.push_byte(HEX[usize::from(b & 0x0F)])?;
            }
        }
        Ok(())
    }

    fn push_json_str(&mut self, value: &str) -> Result<(), WireError> {
        self.push_byte(b'"')?;
        for c in value.chars() {
            match c {
                '"' => self.push_str("\\\"")?,
                '\\' => self.push_str("\\\\")?,
                c if (c as u32) < 0x20 => {
                    self.write_fmt(format_args!("\\u{:04x}", c as u32))
                        .map_err(|_| WireError::Overflow)?;
                }
                c => {
                    let mut utf8 = [0u8; 4];
                    self.push_str(c.encode_utf8(&mut utf8))?;
                }
            }
        }
        self.push_byte(b'"')
    }
}

impl Write for Buffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0
            .extend_from_slice(s.as_bytes())
            .map_err(|_| core::fmt::Error)
    }
}
