//! Rendering of [`DeviceStatus`]
//!
//! `status_lines` and `led_signal` are pure and host-tested; the SSD1306 and
//! LED drivers below only act on what they produce.

use core::fmt::Write;

use heapless::String;

use crate::error::ErrorKind;
use crate::model::{DeviceStatus, UploadOutcome};

/// 128 px wide panel with a 6 px font
pub const LINE_CAPACITY: usize = 21;
pub const LINE_COUNT: usize = 5;

pub type Line = String<LINE_CAPACITY>;

/// Short comfort label for a temperature in °C
pub fn comfort_label(temperature: f64) -> &'static str {
    match temperature {
        t if t < 10.0 => "Cold",
        t if t < 20.0 => "Cool",
        t if t < 25.0 => "Comfortable",
        t if t < 30.0 => "Warm",
        _ => "Hot",
    }
}

/// Connection, reading, sensor state, upload outcome and uptime, one per line
pub fn status_lines(status: &DeviceStatus) -> [Line; LINE_COUNT] {
    let mut lines: [Line; LINE_COUNT] = Default::default();

    let _ = write!(lines[0], "WiFi {}", status.connection.label());

    match status.last_reading {
        Some(reading) => {
            let _ = write!(
                lines[1],
                "{:.1}C {:.0}%RH",
                reading.temperature(),
                reading.humidity()
            );
        }
        None => {
            let _ = lines[1].push_str("--.-C --%RH");
        }
    }

    let sensor_line = match (status.sensor_fault, status.last_reading) {
        (Some(fault), _) => ErrorKind::from(fault).as_str(),
        (None, Some(reading)) => comfort_label(reading.temperature()),
        (None, None) => "No data",
    };
    let _ = lines[2].push_str(sensor_line);

    match status.upload {
        UploadOutcome::Idle => {
            let _ = lines[3].push_str("no upload yet");
        }
        UploadOutcome::Delivered { attempts, .. } => {
            let _ = write!(lines[3], "sent (try {attempts})");
        }
        UploadOutcome::Failed { error, .. } => {
            let _ = lines[3].push_str(ErrorKind::from(error).as_str());
        }
    }

    let uptime_s = status.uptime_ms / 1_000;
    let _ = write!(
        lines[4],
        "up {}:{:02}:{:02} #{}",
        uptime_s / 3_600,
        uptime_s / 60 % 60,
        uptime_s % 60,
        status.tick
    );

    lines
}

/// On and off time of one indicator flash
pub const LED_PULSE_MS: u32 = 25;

/// What the indicator LED does for one status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedSignal {
    /// Held on until the link comes back
    Steady,
    /// Short flashes, then off
    Pulses(u8),
}

impl LedSignal {
    /// Time spent blocking while the signal is shown
    pub const fn duration_ms(self) -> u32 {
        match self {
            Self::Steady => 0,
            Self::Pulses(n) => n as u32 * 2 * LED_PULSE_MS,
        }
    }
}

/// One flash per delivered reading, two when the upload failed, three for a
/// sensor fault. Offline holds the LED on.
pub fn led_signal(status: &DeviceStatus) -> LedSignal {
    if !status.connection.is_connected() {
        return LedSignal::Steady;
    }
    if status.sensor_fault.is_some() {
        return LedSignal::Pulses(3);
    }
    match status.upload {
        UploadOutcome::Failed { .. } => LedSignal::Pulses(2),
        UploadOutcome::Idle | UploadOutcome::Delivered { .. } => LedSignal::Pulses(1),
    }
}

#[cfg(feature = "firmware")]
pub use led::LedIndicator;
#[cfg(feature = "firmware")]
pub use oled::OledDisplay;

#[cfg(feature = "firmware")]
mod led {
    use esp_hal::{delay::Delay, gpio::Output};

    use super::{LED_PULSE_MS, LedSignal, led_signal};
    use crate::error::PresentError;
    use crate::model::DeviceStatus;
    use crate::traits::StatusDisplay;

    /// Single indicator LED, active high
    pub struct LedIndicator<'a> {
        pin: Output<'a>,
        delay: Delay,
    }

    impl<'a> LedIndicator<'a> {
        pub fn new(pin: Output<'a>) -> Self {
            Self {
                pin,
                delay: Delay::new(),
            }
        }
    }

    impl StatusDisplay for LedIndicator<'_> {
        fn show(&mut self, status: &DeviceStatus) -> Result<(), PresentError> {
            match led_signal(status) {
                LedSignal::Steady => self.pin.set_high(),
                LedSignal::Pulses(count) => {
                    for _ in 0..count {
                        self.pin.set_high();
                        self.delay.delay_millis(LED_PULSE_MS);
                        self.pin.set_low();
                        self.delay.delay_millis(LED_PULSE_MS);
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(feature = "firmware")]
mod oled {
    use embedded_graphics::{
        mono_font::{MonoTextStyle, MonoTextStyleBuilder, ascii::FONT_6X10},
        pixelcolor::BinaryColor,
        prelude::*,
        text::{Baseline, Text},
    };
    use esp_hal::{Blocking, i2c::master::I2c};
    use log::debug;
    use ssd1306::{I2CDisplayInterface, Ssd1306, mode::BufferedGraphicsMode, prelude::*};

    use super::{LINE_COUNT, status_lines};
    use crate::error::PresentError;
    use crate::model::DeviceStatus;
    use crate::traits::StatusDisplay;

    const LINE_HEIGHT: i32 = 12;

    type Panel<'a> = Ssd1306<
        I2CInterface<I2c<'a, Blocking>>,
        DisplaySize128x64,
        BufferedGraphicsMode<DisplaySize128x64>,
    >;

    /// SSD1306 128x64 over I2C, initialised lazily so a panel plugged in
    /// after boot is picked up
    pub struct OledDisplay<'a> {
        panel: Panel<'a>,
        ready: bool,
        style: MonoTextStyle<'static, BinaryColor>,
    }

    impl<'a> OledDisplay<'a> {
        pub fn new(i2c: I2c<'a, Blocking>) -> Self {
            let interface = I2CDisplayInterface::new(i2c);
            let panel = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
                .into_buffered_graphics_mode();
            let style = MonoTextStyleBuilder::new()
                .font(&FONT_6X10)
                .text_color(BinaryColor::On)
                .build();

            Self {
                panel,
                ready: false,
                style,
            }
        }

        fn draw(&mut self, status: &DeviceStatus) -> Result<(), PresentError> {
            self.panel.clear_buffer();
            let lines = status_lines(status);
            for (row, line) in lines.iter().enumerate().take(LINE_COUNT) {
                let y = row as i32 * LINE_HEIGHT;
                Text::with_baseline(line.as_str(), Point::new(0, y), self.style, Baseline::Top)
                    .draw(&mut self.panel)
                    .map_err(|_| PresentError::Bus)?;
            }
            self.panel.flush().map_err(|_| PresentError::Bus)
        }
    }

    impl StatusDisplay for OledDisplay<'_> {
        fn show(&mut self, status: &DeviceStatus) -> Result<(), PresentError> {
            if !self.ready {
                self.panel
                    .init()
                    .map_err(|_| PresentError::PeripheralAbsent)?;
                self.ready = true;
                debug!("oled initialised");
            }

            let result = self.draw(status);
            if result.is_err() {
                // force a fresh init on the next tick
                self.ready = false;
            }
            result
        }
    }
}
