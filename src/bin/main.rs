#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{
    gpio::{Level, Output, OutputConfig},
    rng::Rng,
    timer::timg::TimerGroup,
};
use esp_radio::wifi::WifiDevice;
use log::{error, info};
use static_cell::StaticCell;

use telemetry_node::{
    config::{self, Config, Credentials, Encoding},
    connectivity::ConnectivityManager,
    control::ControlLoop,
    display::{LedIndicator, OledDisplay},
    hardware::{
        self, Bme280Sensor, EmbassyClock, Endpoint, HardwareJitter, TcpTransport, WifiLink,
    },
    presenter::StatusPresenter,
    sensor::SensorUnit,
    uploader::TelemetryUploader,
    wire::SelectedCodec,
};

const WIFI_SSID: &str = env!(
    "TELEMETRY_WIFI_SSID",
    "Set TELEMETRY_WIFI_SSID in your environment before building/flashing."
);
const WIFI_PASSWORD: &str = env!(
    "TELEMETRY_WIFI_PASSWORD",
    "Set TELEMETRY_WIFI_PASSWORD in your environment before building/flashing."
);
// Channel number for ThingSpeak style endpoints, topic for MQTT
const ENDPOINT_ID: &str = env!(
    "TELEMETRY_ENDPOINT_ID",
    "Set TELEMETRY_ENDPOINT_ID in your environment before building/flashing."
);
const ENDPOINT_HOST: &str = match option_env!("TELEMETRY_ENDPOINT_HOST") {
    Some(host) => host,
    None => "api.thingspeak.com",
};
const ENDPOINT_KEY: &str = match option_env!("TELEMETRY_ENDPOINT_KEY") {
    Some(key) => key,
    None => "",
};
const MQTT_USERNAME: Option<&str> = option_env!("TELEMETRY_ENDPOINT_USER");
const MQTT_CLIENT_ID: &str = "telemetry-node";

const TRANSPORT_TIMEOUT_MS: u64 = 5_000;
const HEAP_SIZE: usize = 72 * 1024;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

fn load_config() -> Config {
    let encoding = Encoding::from_name(option_env!("TELEMETRY_ENCODING").unwrap_or("form"));
    let mut config = Config::new(
        Credentials::new(WIFI_SSID, WIFI_PASSWORD),
        ENDPOINT_HOST,
        ENDPOINT_ID,
        ENDPOINT_KEY,
        encoding,
    );
    if let Some(port) = option_env!("TELEMETRY_ENDPOINT_PORT").and_then(|p| p.parse().ok()) {
        config = config.with_port(port);
    }
    config.with_tick_interval_ms(config::parse_millis(
        option_env!("TELEMETRY_TICK_MS"),
        config::DEFAULT_TICK_INTERVAL_MS,
    ))
}

async fn halt() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());
    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    esp_println::println!("=== Telemetry node ===");

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let config = load_config();
    if let Err(err) = config.validate() {
        error!("invalid configuration: {}", err);
        halt().await;
    }

    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(err) => {
            error!("esp-radio init failed: {:?}", err);
            halt().await;
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                error!("wifi peripheral init failed: {:?}", err);
                halt().await;
            }
        };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::<4>::new()),
        seed,
    );
    if let Err(err) = spawner.spawn(net_task(runner)) {
        error!("failed to spawn net task: {:?}", err);
        halt().await;
    }

    let sensor_bus =
        match hardware::sensor_bus(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9) {
            Ok(bus) => bus,
            Err(err) => {
                error!("sensor i2c config failed: {:?}", err);
                halt().await;
            }
        };
    let display_bus =
        match hardware::display_bus(peripherals.I2C1, peripherals.GPIO2, peripherals.GPIO1) {
            Ok(bus) => bus,
            Err(err) => {
                error!("display i2c config failed: {:?}", err);
                halt().await;
            }
        };

    let led = Output::new(peripherals.GPIO14, Level::Low, OutputConfig::default());

    let clock = EmbassyClock;
    let endpoint = Endpoint {
        host: config.endpoint_host,
        port: config.endpoint_port,
        mqtt_client_id: MQTT_CLIENT_ID,
        mqtt_username: MQTT_USERNAME,
        mqtt_password: (!config.endpoint_key.is_empty() && MQTT_USERNAME.is_some())
            .then_some(config.endpoint_key),
    };

    let connectivity = ConnectivityManager::new(
        WifiLink::new(controller, stack),
        clock,
        HardwareJitter::new(rng),
        config.connect_backoff,
        config.max_connect_wait_ms,
    );
    let sensor = SensorUnit::new(Bme280Sensor::new(sensor_bus), clock, &config);
    let uploader = TelemetryUploader::new(
        TcpTransport::new(stack, endpoint, Duration::from_millis(TRANSPORT_TIMEOUT_MS)),
        SelectedCodec::from_config(&config),
        clock,
        HardwareJitter::new(rng),
        config.upload_backoff,
        config.max_upload_attempts,
    );
    let presenter = StatusPresenter::new(
        (OledDisplay::new(display_bus), LedIndicator::new(led)),
        clock,
        config.render_budget_ms,
    );

    info!(
        "Wi-Fi ssid={} endpoint={}:{} encoding={:?}",
        config.credentials.ssid, config.endpoint_host, config.endpoint_port, config.encoding
    );
    info!("Sensor pins: SDA=GPIO8 SCL=GPIO9; display pins: SDA=GPIO2 SCL=GPIO1; LED=GPIO14");

    let mut control = ControlLoop::new(config, connectivity, sensor, uploader, presenter, clock);
    control.run().await
}
