//! # GPIO Module
//!
//! Owns everything that touches pins:
//!
//! ```text
//! gpio/
//! ├── driver.rs    - GpioDriver trait, rppal backend and in-memory mock
//! ├── registry.rs  - PinRegistry, the only place switch state changes
//! ├── switch.rs    - Switch definition and logical on/off state
//! └── error.rs     - GpioError / RegistryError
//! ```
//!
//! The registry is generic over the driver so tests run against
//! [`MockDriver`] while the daemon uses a boxed driver chosen at startup.

pub mod driver;
pub mod error;
pub mod registry;
pub mod switch;

pub use driver::{GpioDriver, MockDriver, PinLevel, RppalDriver};
pub use error::{GpioError, RegistryError};
pub use registry::{Drift, PinRegistry};
pub use switch::{Switch, SwitchState};

use std::fmt;
use tracing::{info, warn};

/// Which driver backs the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpioBackend {
    /// Real GPIO when available, otherwise fall back to mock pins
    #[default]
    Auto,
    Rppal,
    Mock,
}

impl GpioBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(GpioBackend::Auto),
            "rppal" | "gpio" => Some(GpioBackend::Rppal),
            "mock" => Some(GpioBackend::Mock),
            _ => None,
        }
    }
}

impl fmt::Display for GpioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpioBackend::Auto => write!(f, "auto"),
            GpioBackend::Rppal => write!(f, "rppal"),
            GpioBackend::Mock => write!(f, "mock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpioConfig {
    pub backend: GpioBackend,
}

/// Opens the driver selected by `backend`
pub fn open_driver(backend: GpioBackend) -> Result<Box<dyn GpioDriver>, GpioError> {
    match backend {
        GpioBackend::Rppal => Ok(Box::new(RppalDriver::new()?)),
        GpioBackend::Mock => {
            info!("Using mock GPIO pins");
            Ok(Box::new(MockDriver::new()))
        }
        GpioBackend::Auto => match RppalDriver::new() {
            Ok(driver) => Ok(Box::new(driver)),
            Err(e) => {
                warn!("Not running on a Pi ({}), using mock pins", e);
                Ok(Box::new(MockDriver::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(GpioBackend::parse("AUTO"), Some(GpioBackend::Auto));
        assert_eq!(GpioBackend::parse("rppal"), Some(GpioBackend::Rppal));
        assert_eq!(GpioBackend::parse("gpio"), Some(GpioBackend::Rppal));
        assert_eq!(GpioBackend::parse("mock"), Some(GpioBackend::Mock));
        assert_eq!(GpioBackend::parse("sysfs"), None);
    }

    #[test]
    fn test_open_mock_driver() {
        let mut driver = open_driver(GpioBackend::Mock).unwrap();
        driver.claim_output(3).unwrap();
        driver.write(3, PinLevel::High).unwrap();
        assert_eq!(driver.read(3).unwrap(), PinLevel::High);
    }
}
