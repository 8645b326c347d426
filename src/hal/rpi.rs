// Geekworm X728 UPS Daemon
// License: GPL-3.0

//! Raspberry Pi backend built on rppal.

use log::{debug, trace};
use rppal::gpio::{self, Event, Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::i2c::I2c;

use super::{EdgeSink, GpioChip, HalError, InputLine, OutputLine, RegisterBus};
use crate::signal::{EdgeDirection, EdgeEvent, RawLevel};

pub struct RpiChip {
    gpio: Gpio,
}

impl RpiChip {
    pub fn open() -> Result<Self, HalError> {
        let gpio = Gpio::new().map_err(|e| HalError::Open(e.to_string()))?;
        debug!("GPIO controller opened");
        Ok(RpiChip { gpio })
    }

    fn pin(&self, line: u8) -> Result<gpio::Pin, HalError> {
        self.gpio.get(line).map_err(|e| match e {
            gpio::Error::PinUsed(pin) => HalError::LineBusy(pin),
            other => HalError::Gpio(other.to_string()),
        })
    }
}

impl GpioChip for RpiChip {
    fn request_input(&self, line: u8) -> Result<Box<dyn InputLine>, HalError> {
        let pin = self.pin(line)?.into_input_pullup();
        Ok(Box::new(RpiInput { line, pin }))
    }

    fn request_output(&self, line: u8, initial: RawLevel) -> Result<Box<dyn OutputLine>, HalError> {
        // into_output_{low,high} latch the level before switching the pin mode.
        let pin = match initial {
            RawLevel::High => self.pin(line)?.into_output_high(),
            RawLevel::Low => self.pin(line)?.into_output_low(),
        };
        Ok(Box::new(RpiOutput { pin, level: initial }))
    }
}

struct RpiInput {
    line: u8,
    pin: InputPin,
}

impl InputLine for RpiInput {
    fn read(&self) -> RawLevel {
        from_level(self.pin.read())
    }

    fn watch(&mut self, mut sink: EdgeSink) -> Result<(), HalError> {
        let line = self.line;
        self.pin
            .set_async_interrupt(Trigger::Both, None, move |event: Event| {
                let direction = match event.trigger {
                    Trigger::RisingEdge => EdgeDirection::Rising,
                    Trigger::FallingEdge => EdgeDirection::Falling,
                    _ => return,
                };
                trace!("GPIO {} edge {:?} seq={}", line, direction, event.seqno);
                sink(EdgeEvent {
                    line,
                    direction,
                    timestamp: event.timestamp,
                });
            })
            .map_err(|e| HalError::Gpio(e.to_string()))
    }
}

struct RpiOutput {
    pin: OutputPin,
    level: RawLevel,
}

impl OutputLine for RpiOutput {
    fn write(&mut self, level: RawLevel) {
        self.pin.write(to_level(level));
        self.level = level;
    }

    fn level(&self) -> RawLevel {
        self.level
    }
}

fn from_level(level: Level) -> RawLevel {
    match level {
        Level::High => RawLevel::High,
        Level::Low => RawLevel::Low,
    }
}

fn to_level(level: RawLevel) -> Level {
    match level {
        RawLevel::High => Level::High,
        RawLevel::Low => Level::Low,
    }
}

/// SMBus access to the fuel gauge.
pub struct I2cBus {
    i2c: I2c,
}

impl I2cBus {
    pub fn open(bus: u8, address: u16) -> Result<Self, HalError> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| HalError::Bus(e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| HalError::Bus(e.to_string()))?;
        debug!("I2C bus {} opened, device 0x{:02X}", bus, address);
        Ok(I2cBus { i2c })
    }
}

impl RegisterBus for I2cBus {
    fn read_word(&mut self, register: u8) -> Result<u16, HalError> {
        self.i2c
            .smbus_read_word(register)
            .map_err(|e| HalError::Bus(e.to_string()))
    }
}
