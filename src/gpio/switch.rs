use std::fmt;

use super::driver::PinLevel;

/// Logical state of a switch as seen by Home Assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }

    /// Physical level for this logical state; inverted pins are active low
    pub fn level(self, inverted: bool) -> PinLevel {
        match (self.is_on(), inverted) {
            (true, false) | (false, true) => PinLevel::High,
            (true, true) | (false, false) => PinLevel::Low,
        }
    }

    /// Logical state implied by a physical level
    pub fn from_level(level: PinLevel, inverted: bool) -> Self {
        let high = matches!(level, PinLevel::High);
        SwitchState::from(high != inverted)
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchState::On => write!(f, "on"),
            SwitchState::Off => write!(f, "off"),
        }
    }
}

/// A GPIO-backed switch as declared in the config file
///
/// `id` is the stable identifier used in topics and discovery; `name` is the
/// display name shown in Home Assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Switch {
    pub id: String,
    pub name: String,
    pub pin: u8,
    pub inverted: bool,
    pub initial_state: SwitchState,
}

impl Switch {
    /// Switch with display name equal to its id, not inverted, initially off
    pub fn new(id: impl Into<String>, pin: u8) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            pin,
            inverted: false,
            initial_state: SwitchState::Off,
        }
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn initial_state(mut self, state: SwitchState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping_plain_pin() {
        assert_eq!(SwitchState::On.level(false), PinLevel::High);
        assert_eq!(SwitchState::Off.level(false), PinLevel::Low);
    }

    #[test]
    fn test_level_mapping_inverted_pin() {
        assert_eq!(SwitchState::On.level(true), PinLevel::Low);
        assert_eq!(SwitchState::Off.level(true), PinLevel::High);
    }

    #[test]
    fn test_from_level_is_inverse_of_level() {
        for inverted in [false, true] {
            for state in [SwitchState::On, SwitchState::Off] {
                assert_eq!(SwitchState::from_level(state.level(inverted), inverted), state);
            }
        }
    }

    #[test]
    fn test_switch_builder() {
        let switch = Switch::new("lamp", 17)
            .inverted(true)
            .initial_state(SwitchState::On)
            .named("Living room lamp");
        assert_eq!(switch.id, "lamp");
        assert_eq!(switch.name, "Living room lamp");
        assert_eq!(switch.pin, 17);
        assert!(switch.inverted);
        assert_eq!(switch.initial_state, SwitchState::On);
    }
}
