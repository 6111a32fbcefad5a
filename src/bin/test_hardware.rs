#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{
    gpio::{Level, Output, OutputConfig},
    timer::timg::TimerGroup,
};

use telemetry_node::{
    config::{Config, Credentials, Encoding, PlausibilityBounds},
    display::{LedIndicator, LedSignal, OledDisplay, comfort_label, led_signal, status_lines},
    error::{SensorError, UploadError},
    hardware::{self, Bme280Sensor, EmbassyClock},
    model::{ConnectionState, DeviceStatus, FailReason, Reading, UploadOutcome},
    sensor::{self, SensorUnit},
    traits::{RawSample, RawStatus, StatusDisplay},
    wire::{Delivery, FormCodec, MqttJsonCodec, Reply, TelemetryCodec},
};

esp_bootloader_esp_idf::esp_app_desc!();

// Test result tracking
struct TestResults {
    passed: u32,
    failed: u32,
    total: u32,
}

impl TestResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
        }
    }

    fn assert(&mut self, condition: bool, test_name: &str) {
        self.total += 1;
        if condition {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED", test_name);
        }
    }

    fn assert_eq<T: PartialEq + core::fmt::Debug>(&mut self, left: T, right: T, test_name: &str) {
        self.total += 1;
        if left == right {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED: {:?} != {:?}", test_name, left, right);
        }
    }

    fn assert_close(&mut self, value: f64, expected: f64, tolerance: f64, test_name: &str) {
        self.total += 1;
        if (value - expected).abs() < tolerance {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!(
                "  ✗ {} FAILED: {:.2} not close to {:.2} (tolerance: {:.2})",
                test_name,
                value,
                expected,
                tolerance
            );
        }
    }

    fn print_summary(&self) {
        esp_println::println!("\n==========================================");
        esp_println::println!("Test Summary:");
        esp_println::println!("  Total:  {}", self.total);
        esp_println::println!("  Passed: {}", self.passed);
        esp_println::println!("  Failed: {}", self.failed);
        if self.failed == 0 {
            esp_println::println!("\n✓ ALL TESTS PASSED!");
        } else {
            esp_println::println!("\n✗ SOME TESTS FAILED");
        }
        esp_println::println!("==========================================");
    }
}

fn bench_config() -> Config {
    Config::new(
        Credentials::new("bench", ""),
        "api.thingspeak.com",
        "0",
        "",
        Encoding::Form,
    )
}

fn test_validation(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Reading validation");
    let bounds = PlausibilityBounds::AMBIENT;

    results.assert_eq(
        sensor::validate(&RawSample::ok(21.5, 40.0), &bounds),
        Ok((21.5, 40.0)),
        "plausible sample accepted",
    );
    results.assert_eq(
        sensor::validate(&RawSample::ok(f64::NAN, 40.0), &bounds),
        Err(SensorError::InvalidReading),
        "NaN rejected",
    );
    results.assert_eq(
        sensor::validate(&RawSample::ok(sensor::FAULT_SENTINEL, 40.0), &bounds),
        Err(SensorError::InvalidReading),
        "fault sentinel rejected",
    );
    results.assert_eq(
        sensor::validate(&RawSample::ok(21.5, 104.0), &bounds),
        Err(SensorError::InvalidReading),
        "humidity above 100% rejected",
    );
    results.assert_eq(
        sensor::validate(&RawSample::failed(RawStatus::Busy), &bounds),
        Err(SensorError::Transient),
        "busy is transient",
    );
    results.assert_eq(
        sensor::validate(&RawSample::failed(RawStatus::Absent), &bounds),
        Err(SensorError::PeripheralAbsent),
        "absent peripheral reported",
    );
}

fn test_labels(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Status labels");

    results.assert_eq(comfort_label(5.0), "Cold", "cold label");
    results.assert_eq(comfort_label(15.0), "Cool", "cool label");
    results.assert_eq(comfort_label(22.0), "Comfortable", "comfortable label");
    results.assert_eq(comfort_label(28.0), "Warm", "warm label");
    results.assert_eq(comfort_label(35.0), "Hot", "hot label");

    let offline = DeviceStatus {
        tick: 0,
        uptime_ms: 61_000,
        connection: ConnectionState::Failed(FailReason::Timeout),
        last_reading: None,
        sensor_fault: None,
        upload: UploadOutcome::Failed {
            error: UploadError::NotConnected,
            attempts: 0,
        },
    };
    let lines = status_lines(&offline);
    results.assert_eq(lines[0].as_str(), "WiFi timeout", "connection line");
    results.assert_eq(lines[1].as_str(), "--.-C --%RH", "placeholder reading");
    results.assert_eq(lines[3].as_str(), "not connected", "upload line");
    results.assert_eq(lines[4].as_str(), "up 0:01:01 #0", "uptime line");
}

fn test_codecs(results: &mut TestResults, reading: &Reading) {
    esp_println::println!("\n[TEST] Payload codecs");

    let form = FormCodec {
        channel_id: "1234",
        api_key: "KEY",
    };
    match form.encode(reading) {
        Ok(frame) => {
            let body = frame.body_str();
            esp_println::println!("    form body: {}", body);
            results.assert(body.starts_with("channel_id=1234&api_key=KEY&field1="), "form keys");
            results.assert(body.contains("&field2="), "form humidity field");
        }
        Err(e) => {
            esp_println::println!("    form encode failed: {}", e);
            results.assert(false, "form encode");
        }
    }
    results.assert_eq(
        form.classify(&Reply::http(200, b"0")),
        Delivery::Retry,
        "channel refusal retried",
    );

    let mqtt = MqttJsonCodec {
        topic: "bench/climate",
    };
    match mqtt.encode(reading) {
        Ok(frame) => {
            let body = frame.body_str();
            esp_println::println!("    mqtt payload: {}", body);
            results.assert(body.starts_with("{\"temperature\":"), "mqtt payload shape");
        }
        Err(e) => {
            esp_println::println!("    mqtt encode failed: {}", e);
            results.assert(false, "mqtt encode");
        }
    }
}

async fn test_bme280_sensor<SDA, SCL>(
    results: &mut TestResults,
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: SDA,
    scl: SCL,
) -> Option<Reading>
where
    SDA: Into<esp_hal::gpio::AnyPin<'static>>,
    SCL: Into<esp_hal::gpio::AnyPin<'static>>,
{
    esp_println::println!("\n[TEST] BME280 Sensor Tests");

    let bus = match hardware::sensor_bus(i2c0, sda, scl) {
        Ok(bus) => bus,
        Err(e) => {
            esp_println::println!("  I2C config failed: {:?}", e);
            results.assert(false, "sensor I2C config");
            return None;
        }
    };
    let config = bench_config();
    let mut unit = SensorUnit::new(Bme280Sensor::new(bus), EmbassyClock, &config);

    esp_println::println!("  Reading samples (5 samples)...");
    let mut samples = heapless::Vec::<Reading, 5>::new();
    for i in 0..5 {
        Timer::after(Duration::from_millis(100)).await;
        match unit.acquire().await {
            Ok(reading) => {
                esp_println::println!(
                    "    Sample {}: {:.2}°C {:.1}%RH",
                    i + 1,
                    reading.temperature(),
                    reading.humidity()
                );
                let _ = samples.push(reading);
            }
            Err(e) => {
                esp_println::println!("    Failed to read sensor: {}", e);
            }
        }
    }

    results.assert_eq(samples.len(), 5, "collected 5 samples");
    if samples.len() < 5 {
        return samples.last().copied();
    }

    for reading in samples.iter() {
        results.assert(reading.is_valid(), "reading marked valid");
    }
    results.assert(
        samples.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()),
        "timestamps monotonic",
    );

    // Bench readings should stay within 2°C over half a second
    let min_temp = samples
        .iter()
        .fold(f64::INFINITY, |a, r| a.min(r.temperature()));
    let max_temp = samples
        .iter()
        .fold(f64::NEG_INFINITY, |a, r| a.max(r.temperature()));
    results.assert_close(max_temp, min_temp, 2.0, "temperature readings stable");

    samples.last().copied()
}

fn test_oled(
    results: &mut TestResults,
    i2c1: esp_hal::peripherals::I2C1<'static>,
    sda: esp_hal::peripherals::GPIO2<'static>,
    scl: esp_hal::peripherals::GPIO1<'static>,
    reading: Option<Reading>,
) {
    esp_println::println!("\n[TEST] SSD1306 Display Tests");

    let bus = match hardware::display_bus(i2c1, sda, scl) {
        Ok(bus) => bus,
        Err(e) => {
            esp_println::println!("  I2C config failed: {:?}", e);
            results.assert(false, "display I2C config");
            return;
        }
    };
    let mut display = OledDisplay::new(bus);
    let status = DeviceStatus {
        tick: 0,
        uptime_ms: 0,
        connection: ConnectionState::Disconnected,
        last_reading: reading,
        sensor_fault: None,
        upload: UploadOutcome::Idle,
    };

    match display.show(&status) {
        Ok(()) => results.assert(true, "status drawn"),
        Err(e) => {
            esp_println::println!("    display error: {}", e);
            results.assert(false, "status drawn");
        }
    }
    results.assert(display.show(&status).is_ok(), "second frame drawn");
}

fn test_led(results: &mut TestResults, pin: esp_hal::peripherals::GPIO14<'static>) {
    esp_println::println!("\n[TEST] Indicator LED (watch GPIO14)");

    let mut led = LedIndicator::new(Output::new(pin, Level::Low, OutputConfig::default()));
    let mut status = DeviceStatus {
        tick: 0,
        uptime_ms: 0,
        connection: ConnectionState::Connected,
        last_reading: None,
        sensor_fault: None,
        upload: UploadOutcome::Idle,
    };
    results.assert_eq(led_signal(&status), LedSignal::Pulses(1), "idle flashes once");

    let started = embassy_time::Instant::now();
    results.assert(led.show(&status).is_ok(), "single flash");
    status.sensor_fault = Some(SensorError::Transient);
    results.assert(led.show(&status).is_ok(), "triple flash");
    let elapsed = started.elapsed().as_millis();
    esp_println::println!("    four flashes took {} ms", elapsed);
    results.assert(elapsed >= 200 && elapsed < 260, "flash timing");

    status.connection = ConnectionState::Disconnected;
    results.assert(led.show(&status).is_ok(), "steady while offline");
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_println::println!("\n==========================================");
    esp_println::println!("=== Hardware Unit Test Runner ===");
    esp_println::println!("==========================================");

    let mut results = TestResults::new();

    // Run tests that don't need hardware
    test_validation(&mut results);
    test_labels(&mut results);

    // Initialize RTOS timer for embassy (this consumes TIMG0)
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Run hardware tests
    let reading =
        test_bme280_sensor(&mut results, peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9)
            .await;
    if let Some(reading) = reading.as_ref() {
        test_codecs(&mut results, reading);
    }
    test_oled(
        &mut results,
        peripherals.I2C1,
        peripherals.GPIO2,
        peripherals.GPIO1,
        reading,
    );
    test_led(&mut results, peripherals.GPIO14);

    results.print_summary();

    esp_println::println!("\nTest run complete. Looping...");
    loop {
        if results.failed == 0 {
            Timer::after(Duration::from_millis(200)).await;
        } else {
            Timer::after(Duration::from_millis(1000)).await;
        }
    }
}
