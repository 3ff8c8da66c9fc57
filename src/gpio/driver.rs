//! GPIO driver abstraction with a real (`rppal`) and an in-memory backend

use rppal::gpio::{Gpio, OutputPin};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::error::GpioError;

/// Electrical level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    High,
    Low,
}

/// Minimal pin-control surface the registry needs
pub trait GpioDriver {
    /// Acquire `pin` as an output. Must be called before `write`/`read`.
    fn claim_output(&mut self, pin: u8) -> Result<(), GpioError>;

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<(), GpioError>;

    /// Level the output is currently driven to
    fn read(&self, pin: u8) -> Result<PinLevel, GpioError>;

    /// Short label used in log lines
    fn backend(&self) -> &'static str;
}

impl<T: GpioDriver + ?Sized> GpioDriver for Box<T> {
    fn claim_output(&mut self, pin: u8) -> Result<(), GpioError> {
        (**self).claim_output(pin)
    }

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<(), GpioError> {
        (**self).write(pin, level)
    }

    fn read(&self, pin: u8) -> Result<PinLevel, GpioError> {
        (**self).read(pin)
    }

    fn backend(&self) -> &'static str {
        (**self).backend()
    }
}

/// Raspberry Pi GPIO through `rppal`
pub struct RppalDriver {
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
}

impl RppalDriver {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(GpioError::Unavailable)?;
        info!("Opened GPIO peripheral");
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
        })
    }
}

impl GpioDriver for RppalDriver {
    fn claim_output(&mut self, pin: u8) -> Result<(), GpioError> {
        let output = self
            .gpio
            .get(pin)
            .map_err(|source| GpioError::Pin { pin, source })?
            .into_output();
        debug!("Claimed BCM pin {} as output", pin);
        self.outputs.insert(pin, output);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<(), GpioError> {
        let output = self
            .outputs
            .get_mut(&pin)
            .ok_or(GpioError::NotClaimed(pin))?;
        match level {
            PinLevel::High => output.set_high(),
            PinLevel::Low => output.set_low(),
        }
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<PinLevel, GpioError> {
        let output = self.outputs.get(&pin).ok_or(GpioError::NotClaimed(pin))?;
        Ok(if output.is_set_high() {
            PinLevel::High
        } else {
            PinLevel::Low
        })
    }

    fn backend(&self) -> &'static str {
        "gpio"
    }
}

/// In-memory pins for development machines and tests
#[derive(Debug, Default)]
pub struct MockDriver {
    levels: HashMap<u8, PinLevel>,
    failing: HashSet<u8>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of a claimed pin
    pub fn level(&self, pin: u8) -> Option<PinLevel> {
        self.levels.get(&pin).copied()
    }

    /// Make every following write to `pin` fail
    pub fn fail_pin(&mut self, pin: u8) {
        self.failing.insert(pin);
    }

    pub fn restore_pin(&mut self, pin: u8) {
        self.failing.remove(&pin);
    }

    /// Change a level behind the registry's back, as external wiring would
    pub fn force_level(&mut self, pin: u8, level: PinLevel) {
        self.levels.insert(pin, level);
    }
}

impl GpioDriver for MockDriver {
    fn claim_output(&mut self, pin: u8) -> Result<(), GpioError> {
        if self.failing.contains(&pin) {
            return Err(GpioError::Simulated(pin));
        }
        self.levels.entry(pin).or_insert(PinLevel::Low);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: PinLevel) -> Result<(), GpioError> {
        if self.failing.contains(&pin) {
            return Err(GpioError::Simulated(pin));
        }
        let slot = self.levels.get_mut(&pin).ok_or(GpioError::NotClaimed(pin))?;
        *slot = level;
        debug!("mock pin {} = {:?}", pin, level);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<PinLevel, GpioError> {
        self.levels
            .get(&pin)
            .copied()
            .ok_or(GpioError::NotClaimed(pin))
    }

    fn backend(&self) -> &'static str {
        "dev-mode"
    }
}
