//! GPIO-backed endpoints for the six input lines and the inhibit outputs.
//!
//! The cell bus is not a GPIO concern and stays behind its own transport;
//! this module only covers the discrete lines. Inputs are deglitched with a
//! short stability window so relay chatter does not masquerade as a level
//! change.

use crate::error::{HwError, Result};
use crate::util::stable_level_with_timeout;
use bms_traits::{InhibitBank, SignalSnapshot, SignalSource};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use std::time::Duration;

/// Consecutive matching reads required for a line level to count.
const DEGLITCH_READS: u8 = 3;
const DEGLITCH_POLL: Duration = Duration::from_micros(200);
const DEGLITCH_TIMEOUT: Duration = Duration::from_millis(5);

/// BCM pin numbers for the six input lines.
#[derive(Debug, Clone, Copy)]
pub struct InputPins {
    pub ignition: u8,
    pub charge_enable: u8,
    pub batt1_inhibit: u8,
    pub batt2_inhibit: u8,
    pub charger_inhibit: u8,
    pub heater_enable: u8,
}

/// BCM pin numbers for the output lines; one contactor pin per pack.
#[derive(Debug, Clone)]
pub struct OutputPins {
    pub drive_inhibit: u8,
    pub charge_inhibit: u8,
    pub heater: u8,
    pub pack_inhibit: Vec<u8>,
}

fn gpio() -> Result<Gpio> {
    Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))
}

fn input(gpio: &Gpio, pin: u8) -> Result<InputPin> {
    Ok(gpio
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
        .into_input_pullup())
}

fn output(gpio: &Gpio, pin: u8) -> Result<OutputPin> {
    Ok(gpio
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
        .into_output_low())
}

/// Reads the six control lines through GPIO.
pub struct GpioSignals {
    ignition: InputPin,
    charge_enable: InputPin,
    batt1_inhibit: InputPin,
    batt2_inhibit: InputPin,
    charger_inhibit: InputPin,
    heater_enable: InputPin,
}

impl GpioSignals {
    pub fn open(pins: InputPins) -> Result<Self> {
        let gpio = gpio()?;
        Ok(Self {
            ignition: input(&gpio, pins.ignition)?,
            charge_enable: input(&gpio, pins.charge_enable)?,
            batt1_inhibit: input(&gpio, pins.batt1_inhibit)?,
            batt2_inhibit: input(&gpio, pins.batt2_inhibit)?,
            charger_inhibit: input(&gpio, pins.charger_inhibit)?,
            heater_enable: input(&gpio, pins.heater_enable)?,
        })
    }
}

/// Lines are wired active-low against the pull-up.
fn read_line(pin: &InputPin) -> Result<bool> {
    stable_level_with_timeout(
        || pin.read() == Level::Low,
        DEGLITCH_READS,
        DEGLITCH_POLL,
        DEGLITCH_TIMEOUT,
    )
}

impl SignalSource for GpioSignals {
    fn capture(&mut self) -> std::result::Result<SignalSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        Ok(SignalSnapshot {
            ignition: read_line(&self.ignition)?,
            charge_enable: read_line(&self.charge_enable)?,
            batt1_inhibit: read_line(&self.batt1_inhibit)?,
            batt2_inhibit: read_line(&self.batt2_inhibit)?,
            charger_inhibit: read_line(&self.charger_inhibit)?,
            heater_enable: read_line(&self.heater_enable)?,
        })
    }
}

/// Drives the inhibit, heater and contactor lines through GPIO.
pub struct GpioOutputs {
    drive_inhibit: OutputPin,
    charge_inhibit: OutputPin,
    heater: OutputPin,
    pack_inhibit: Vec<OutputPin>,
}

impl GpioOutputs {
    pub fn open(pins: OutputPins) -> Result<Self> {
        let gpio = gpio()?;
        let mut pack_inhibit = Vec::with_capacity(pins.pack_inhibit.len());
        for pin in &pins.pack_inhibit {
            pack_inhibit.push(output(&gpio, *pin)?);
        }
        Ok(Self {
            drive_inhibit: output(&gpio, pins.drive_inhibit)?,
            charge_inhibit: output(&gpio, pins.charge_inhibit)?,
            heater: output(&gpio, pins.heater)?,
            pack_inhibit,
        })
    }
}

fn write_line(pin: &mut OutputPin, active: bool) {
    if active {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

impl InhibitBank for GpioOutputs {
    fn set_drive_inhibit(
        &mut self,
        active: bool,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        write_line(&mut self.drive_inhibit, active);
        Ok(())
    }

    fn set_charge_inhibit(
        &mut self,
        active: bool,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        write_line(&mut self.charge_inhibit, active);
        Ok(())
    }

    fn set_heater(
        &mut self,
        on: bool,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        write_line(&mut self.heater, on);
        Ok(())
    }

    fn set_pack_inhibit(
        &mut self,
        pack: u8,
        active: bool,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self.pack_inhibit.get_mut(usize::from(pack)) {
            Some(pin) => {
                write_line(pin, active);
                Ok(())
            }
            None => Err(Box::new(HwError::Gpio(format!(
                "no contactor pin configured for pack {pack}"
            )))),
        }
    }
}
