//! Error types for the GPIO layer

use thiserror::Error;

/// Failures reported by a [`GpioDriver`](super::driver::GpioDriver)
#[derive(Debug, Error)]
pub enum GpioError {
    /// The GPIO peripheral could not be opened (not a Pi, missing permissions)
    #[error("GPIO peripheral unavailable: {0}")]
    Unavailable(#[source] rppal::gpio::Error),

    /// A single pin could not be acquired
    #[error("Failed to acquire pin {pin}: {source}")]
    Pin {
        pin: u8,
        #[source]
        source: rppal::gpio::Error,
    },

    /// The pin was never claimed as an output
    #[error("Pin {0} is not configured as an output")]
    NotClaimed(u8),

    /// Failure injected through the mock driver
    #[error("Simulated failure on pin {0}")]
    Simulated(u8),
}

/// Errors returned by the [`PinRegistry`](super::registry::PinRegistry)
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The switch id is not part of the loaded configuration
    #[error("Unknown switch: {0}")]
    UnknownSwitch(String),

    /// Driving the physical pin failed, in-memory state is unchanged
    #[error("Hardware error on switch '{id}': {source}")]
    Hardware {
        id: String,
        #[source]
        source: GpioError,
    },
}
