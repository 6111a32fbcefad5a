//! ESP32-S3 adapters for the collaborator traits
//!
//! Wiring:
//! - BME280 on I2C0, GPIO8 (SDA) / GPIO9 (SCL), address 0x76
//! - SSD1306 on I2C1, GPIO2 (SDA) / GPIO1 (SCL), address 0x3C

use core::sync::atomic::{AtomicU8, Ordering};

use bme280::i2c::BME280;
use embassy_net::{IpAddress, IpEndpoint, Stack, dns::DnsQueryType, tcp::TcpSocket};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use esp_hal::{
    Blocking,
    delay::Delay,
    gpio::AnyPin,
    i2c::master::{Config as I2cConfig, ConfigError as I2cConfigError, I2c},
    peripherals::{I2C0, I2C1},
    rng::Rng,
    time::Rate,
};
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController,
    event::{self, EventExt},
};
use heapless::Vec;
use log::{debug, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::{publish_packet::QualityOfService, reason_codes::ReasonCode},
    utils::rng_generator::CountingRng,
};

use crate::config::Credentials;
use crate::error::TransportError;
use crate::traits::{
    Clock, Jitter, LinkFault, LinkStatus, NetworkLink, RawSample, RawStatus, SensorPeripheral,
    Transport,
};
use crate::wire::{Frame, Reply, Route, http, mqtt};

const SENSOR_I2C_KHZ: u32 = 100;
const DISPLAY_I2C_KHZ: u32 = 400;

pub fn sensor_bus<'a, SDA, SCL>(
    i2c_periph: I2C0<'a>,
    sda: SDA,
    scl: SCL,
) -> Result<I2c<'a, Blocking>, I2cConfigError>
where
    SDA: Into<AnyPin<'a>>,
    SCL: Into<AnyPin<'a>>,
{
    Ok(I2c::new(
        i2c_periph,
        I2cConfig::default().with_frequency(Rate::from_khz(SENSOR_I2C_KHZ)),
    )?
    .with_sda(sda.into())
    .with_scl(scl.into()))
}

pub fn display_bus<'a, SDA, SCL>(
    i2c_periph: I2C1<'a>,
    sda: SDA,
    scl: SCL,
) -> Result<I2c<'a, Blocking>, I2cConfigError>
where
    SDA: Into<AnyPin<'a>>,
    SCL: Into<AnyPin<'a>>,
{
    Ok(I2c::new(
        i2c_periph,
        I2cConfig::default().with_frequency(Rate::from_khz(DISPLAY_I2C_KHZ)),
    )?
    .with_sda(sda.into())
    .with_scl(scl.into()))
}

/// BME280 temperature/humidity sensor, initialised on first use and again
/// after any bus failure
pub struct Bme280Sensor<'a> {
    driver: BME280<I2c<'a, Blocking>>,
    delay: Delay,
    ready: bool,
}

impl<'a> Bme280Sensor<'a> {
    pub fn new(i2c: I2c<'a, Blocking>) -> Self {
        Self {
            driver: BME280::new_primary(i2c),
            delay: Delay::new(),
            ready: false,
        }
    }

    fn init(&mut self) -> Result<(), RawStatus> {
        self.driver.init(&mut self.delay).map_err(|err| {
            debug!("bme280 init failed: {:?}", err);
            RawStatus::Absent
        })?;
        self.ready = true;
        info!("bme280 initialised");
        Ok(())
    }
}

impl SensorPeripheral for Bme280Sensor<'_> {
    fn read_raw(&mut self) -> RawSample {
        if !self.ready {
            if let Err(status) = self.init() {
                return RawSample::failed(status);
            }
        }

        match self.driver.measure(&mut self.delay) {
            Ok(m) => RawSample::ok(f64::from(m.temperature), f64::from(m.humidity)),
            Err(err) => {
                let status = match err {
                    bme280::Error::Bus(_) => RawStatus::Busy,
                    bme280::Error::Delay => RawStatus::Timeout,
                    bme280::Error::CompensationFailed | bme280::Error::InvalidData => {
                        RawStatus::Checksum
                    }
                    bme280::Error::NoCalibrationData | bme280::Error::UnsupportedChip => {
                        RawStatus::Absent
                    }
                };
                if status != RawStatus::Checksum {
                    self.ready = false;
                }
                RawSample::failed(status)
            }
        }
    }
}

// Espressif `wifi_err_reason_t` codes that mean the credentials were refused
const REASON_4WAY_HANDSHAKE_TIMEOUT: u8 = 15;
const REASON_AUTH_FAIL: u8 = 202;
const REASON_HANDSHAKE_TIMEOUT: u8 = 204;

static LAST_DISCONNECT_REASON: AtomicU8 = AtomicU8::new(0);

fn is_auth_reason(reason: u8) -> bool {
    matches!(
        reason,
        REASON_4WAY_HANDSHAKE_TIMEOUT | REASON_AUTH_FAIL | REASON_HANDSHAKE_TIMEOUT
    )
}

/// Wi-Fi station plus the embassy-net stack running on top of it
pub struct WifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl WifiLink {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        event::StaDisconnected::update_handler(|event| {
            LAST_DISCONNECT_REASON.store(event.reason(), Ordering::Relaxed);
        });
        Self { controller, stack }
    }

    pub fn stack(&self) -> Stack<'static> {
        self.stack
    }
}

impl NetworkLink for WifiLink {
    async fn associate(&mut self, credentials: &Credentials) -> Result<(), LinkFault> {
        LAST_DISCONNECT_REASON.store(0, Ordering::Relaxed);

        let client_config = ClientConfig::default()
            .with_ssid(credentials.ssid.into())
            .with_password(credentials.password.into());
        if let Err(err) = self.controller.set_config(&ModeConfig::Client(client_config)) {
            warn!("wifi mode config failed: {:?}", err);
            return Err(LinkFault::Radio);
        }

        if !self.controller.is_started().unwrap_or(false) {
            if let Err(err) = self.controller.start_async().await {
                warn!("wifi start failed: {:?}", err);
                return Err(LinkFault::Radio);
            }
        }

        match self.controller.connect_async().await {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = LAST_DISCONNECT_REASON.load(Ordering::Relaxed);
                info!("wifi connect failed: {:?} (reason={})", err, reason);
                if is_auth_reason(reason) {
                    Err(LinkFault::AuthRejected)
                } else {
                    Err(LinkFault::Radio)
                }
            }
        }
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            associated: matches!(self.controller.is_connected(), Ok(true)),
            has_address: self.stack.is_link_up() && self.stack.config_v4().is_some(),
            auth_rejected: is_auth_reason(LAST_DISCONNECT_REASON.load(Ordering::Relaxed)),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.controller.disconnect_async().await {
            debug!("wifi disconnect: {:?}", err);
        }
    }
}

const SOCKET_BUFFER: usize = 1024;
const REQUEST_CAPACITY: usize = 512;
const RESPONSE_CAPACITY: usize = 1024;
const MQTT_BUFFER: usize = 512;
const MQTT_MAX_PROPERTIES: usize = 5;
const MQTT_KEEP_ALIVE_SECS: u16 = 60;

/// Endpoint parameters for [`TcpTransport`]
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub host: &'static str,
    pub port: u16,
    pub mqtt_client_id: &'static str,
    pub mqtt_username: Option<&'static str>,
    pub mqtt_password: Option<&'static str>,
}

/// One TCP connection per exchange: HTTP POST or a full MQTT
/// connect/publish/disconnect session, depending on the frame's route
pub struct TcpTransport {
    stack: Stack<'static>,
    endpoint: Endpoint,
    timeout: Duration,
    rx: [u8; SOCKET_BUFFER],
    tx: [u8; SOCKET_BUFFER],
    sessions: u64,
}

impl TcpTransport {
    pub fn new(stack: Stack<'static>, endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            stack,
            endpoint,
            timeout,
            rx: [0; SOCKET_BUFFER],
            tx: [0; SOCKET_BUFFER],
            sessions: 0,
        }
    }

    async fn resolve(&self) -> Result<IpAddress, TransportError> {
        let addresses = self
            .stack
            .dns_query(self.endpoint.host, DnsQueryType::A)
            .await
            .map_err(|err| {
                debug!("dns query for {} failed: {:?}", self.endpoint.host, err);
                TransportError::Dns
            })?;
        addresses.first().copied().ok_or(TransportError::Dns)
    }


    async fn exchange_once(&mut self, frame: &Frame) -> Result<Reply, TransportError> {
        let address = self.resolve().await?;
        self.sessions = self.sessions.wrapping_add(1);
        let session = self.sessions;
        let endpoint = self.endpoint;

        let mut socket = TcpSocket::new(self.stack, &mut self.rx, &mut self.tx);
        socket.set_timeout(Some(self.timeout));
        socket
            .connect(IpEndpoint::new(address, endpoint.port))
            .await
            .map_err(|err| {
                debug!("tcp connect to {}:{} failed: {:?}", endpoint.host, endpoint.port, err);
                TransportError::Io
            })?;

        let reply = match &frame.route {
            Route::Post { path, content_type } => {
                post(&mut socket, endpoint.host, path, content_type, &frame.body).await
            }
            Route::Publish { topic } => {
                publish(&mut socket, &endpoint, topic, session, &frame.body).await
            }
        };

        socket.close();
        let _ = socket.flush().await;
        reply
    }
}

impl Transport for TcpTransport {
    async fn exchange(&mut self, frame: &Frame) -> Result<Reply, TransportError> {
        let timeout = self.timeout;
        match with_timeout(timeout, self.exchange_once(frame)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

async fn post(
    socket: &mut TcpSocket<'_>,
    host: &str,
    path: &str,
    content_type: &str,
    body: &[u8],
) -> Result<Reply, TransportError> {
    let mut request: Vec<u8, REQUEST_CAPACITY> = Vec::new();
    http::write_request(host, path, content_type, body, &mut request)?;
    write_all(socket, &request).await?;

    let mut response = [0u8; RESPONSE_CAPACITY];
    let mut len = 0;
    // servers that ignore `Connection: close` are cut off once the body is in
    while len < response.len() && !http::response_complete(&response[..len]) {
        let n = socket
            .read(&mut response[len..])
            .await
            .map_err(|_| TransportError::Io)?;
        if n == 0 {
            break;
        }
        len += n;
    }
    Ok(http::parse_response(&response[..len])?)
}

/// One MQTT 5 session: CONNECT, PUBLISH at QoS 1, DISCONNECT
async fn publish(
    socket: &mut TcpSocket<'_>,
    endpoint: &Endpoint,
    topic: &str,
    session: u64,
    payload: &[u8],
) -> Result<Reply, TransportError> {
    // packet identifiers are drawn from this generator
    let mut config: ClientConfig<'_, MQTT_MAX_PROPERTIES, CountingRng> =
        ClientConfig::new(MqttVersion::MQTTv5, CountingRng(session));
    config.add_client_id(endpoint.mqtt_client_id);
    if let Some(username) = endpoint.mqtt_username {
        config.add_username(username);
    }
    if let Some(password) = endpoint.mqtt_password {
        config.add_password(password);
    }
    config.keep_alive = MQTT_KEEP_ALIVE_SECS;
    config.max_packet_size = MQTT_BUFFER as u32;

    let mut write_buffer = [0u8; MQTT_BUFFER];
    let mut recv_buffer = [0u8; MQTT_BUFFER];
    let mut client = MqttClient::<_, MQTT_MAX_PROPERTIES, _>::new(
        socket,
        &mut write_buffer,
        MQTT_BUFFER,
        &mut recv_buffer,
        MQTT_BUFFER,
        config,
    );

    if let Err(code) = client.connect_to_broker().await {
        debug!("mqtt connect refused: {:?}", code);
        return broker_reply(code);
    }
    if let Err(code) = client
        .send_message(topic, payload, QualityOfService::QoS1, false)
        .await
    {
        debug!("mqtt publish to {} failed: {:?}", topic, code);
        return broker_reply(code);
    }
    if let Err(code) = client.disconnect().await {
        debug!("mqtt disconnect not sent ({:?}); publish already acknowledged", code);
    }
    Ok(Reply::Broker {
        code: mqtt::SUCCESS,
    })
}

// rust-mqtt folds socket failures into its reason codes
fn broker_reply(code: ReasonCode) -> Result<Reply, TransportError> {
    match code {
        ReasonCode::NetworkError => Err(TransportError::Io),
        code => Ok(Reply::Broker {
            code: u8::from(code),
        }),
    }
}

async fn write_all(socket: &mut TcpSocket<'_>, mut bytes: &[u8]) -> Result<(), TransportError> {
    while !bytes.is_empty() {
        let n = socket.write(bytes).await.map_err(|_| TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::Io);
        }
        bytes = &bytes[n..];
    }
    socket.flush().await.map_err(|_| TransportError::Io)
}

/// embassy-time backed clock
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn sleep_ms(&self, ms: u64) {
        Timer::after_millis(ms).await;
    }
}

/// Backoff jitter from the hardware RNG
#[derive(Clone, Copy)]
pub struct HardwareJitter(Rng);

impl HardwareJitter {
    pub fn new(rng: Rng) -> Self {
        Self(rng)
    }
}

impl Jitter for HardwareJitter {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }
}
