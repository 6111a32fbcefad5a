//! MQTT 5 reason codes the uploader acts on
//!
//! The broker session itself is driven by `rust-mqtt` in the firmware
//! transport. What comes back here is the single reason code of the CONNACK
//! or PUBACK that ended the exchange.

use super::Delivery;

pub const SUCCESS: u8 = 0x00;
/// PUBACK: accepted, nobody is subscribed yet
pub const NO_MATCHING_SUBSCRIBERS: u8 = 0x10;
pub const UNSPECIFIED_ERROR: u8 = 0x80;
pub const MALFORMED_PACKET: u8 = 0x81;
pub const PROTOCOL_ERROR: u8 = 0x82;
pub const UNSUPPORTED_PROTOCOL_VERSION: u8 = 0x84;
pub const CLIENT_ID_NOT_VALID: u8 = 0x85;
pub const BAD_USER_NAME_OR_PASSWORD: u8 = 0x86;
pub const NOT_AUTHORIZED: u8 = 0x87;
pub const SERVER_UNAVAILABLE: u8 = 0x88;
pub const SERVER_BUSY: u8 = 0x89;
pub const BANNED: u8 = 0x8A;
pub const BAD_AUTHENTICATION_METHOD: u8 = 0x8C;
pub const TOPIC_NAME_INVALID: u8 = 0x90;
pub const PACKET_TOO_LARGE: u8 = 0x95;
pub const QUOTA_EXCEEDED: u8 = 0x97;
pub const PAYLOAD_FORMAT_INVALID: u8 = 0x99;
pub const CONNECTION_RATE_EXCEEDED: u8 = 0x9F;

/// Map a CONNACK/PUBACK reason code onto what the uploader should do.
///
/// Codes that point at configuration (credentials, client id, topic,
/// payload shape) are permanent. Load and availability codes, and anything
/// unknown, are worth another attempt.
pub fn classify_reason(code: u8) -> Delivery {
    match code {
        SUCCESS | NO_MATCHING_SUBSCRIBERS => Delivery::Accepted,
        MALFORMED_PACKET
        | PROTOCOL_ERROR
        | UNSUPPORTED_PROTOCOL_VERSION
        | CLIENT_ID_NOT_VALID
        | BAD_USER_NAME_OR_PASSWORD
        | NOT_AUTHORIZED
        | BANNED
        | BAD_AUTHENTICATION_METHOD
        | TOPIC_NAME_INVALID
        | PACKET_TOO_LARGE
        | PAYLOAD_FORMAT_INVALID => Delivery::Reject,
        _ => Delivery::Retry,
    }
}
