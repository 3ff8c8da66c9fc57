//! Pin registry: the single owner of switch state
//!
//! Maps switch ids to their pins and keeps the authoritative logical state of
//! each switch. State only changes after the driver confirmed the write, so a
//! failed write can never be published as a successful one.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::driver::GpioDriver;
use super::error::{GpioError, RegistryError};
use super::switch::{Switch, SwitchState};

#[derive(Debug)]
struct SwitchEntry {
    switch: Switch,
    state: SwitchState,
}

/// A switch whose physical level no longer matches its in-memory state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub id: String,
    pub expected: SwitchState,
    pub observed: SwitchState,
}

pub struct PinRegistry<D: GpioDriver> {
    driver: D,
    entries: BTreeMap<String, SwitchEntry>,
}

impl<D: GpioDriver> PinRegistry<D> {
    /// Claims every switch pin as an output and drives it to its initial state
    ///
    /// Any failure here is a startup failure: a switch that cannot be driven
    /// at boot would advertise a state it does not have.
    pub fn new(mut driver: D, switches: &[Switch]) -> Result<Self, RegistryError> {
        let mut entries = BTreeMap::new();

        for switch in switches {
            let hardware = |source: GpioError| RegistryError::Hardware {
                id: switch.id.clone(),
                source,
            };

            driver.claim_output(switch.pin).map_err(hardware)?;
            driver
                .write(switch.pin, switch.initial_state.level(switch.inverted))
                .map_err(hardware)?;

            info!(
                "Creating {}:{} ({}) inverted={} initial={}",
                switch.id,
                switch.pin,
                driver.backend(),
                switch.inverted,
                switch.initial_state
            );

            entries.insert(
                switch.id.clone(),
                SwitchEntry {
                    switch: switch.clone(),
                    state: switch.initial_state,
                },
            );
        }

        Ok(Self { driver, entries })
    }

    /// Drives the switch to `desired` and returns the applied logical state
    pub fn set_pin(&mut self, id: &str, desired: SwitchState) -> Result<SwitchState, RegistryError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownSwitch(id.to_string()))?;

        let level = desired.level(entry.switch.inverted);
        if let Err(source) = self.driver.write(entry.switch.pin, level) {
            return Err(RegistryError::Hardware {
                id: id.to_string(),
                source,
            });
        }

        debug!(
            "{}:{} ({}) = {} ({:?})",
            id,
            entry.switch.pin,
            self.driver.backend(),
            desired,
            level
        );
        entry.state = desired;
        Ok(desired)
    }

    /// In-memory state; the hardware is not consulted
    pub fn get_state(&self, id: &str) -> Result<SwitchState, RegistryError> {
        self.entries
            .get(id)
            .map(|entry| entry.state)
            .ok_or_else(|| RegistryError::UnknownSwitch(id.to_string()))
    }

    /// Switches with their current state, ordered by id
    pub fn switches(&self) -> impl Iterator<Item = (&Switch, SwitchState)> {
        self.entries.values().map(|entry| (&entry.switch, entry.state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads back every pin and reports the ones that disagree with memory
    ///
    /// Nothing is corrected here; callers decide what to do with the report.
    pub fn drift(&self) -> Vec<Drift> {
        self.entries
            .values()
            .filter_map(|entry| match self.driver.read(entry.switch.pin) {
                Ok(level) => {
                    let observed = SwitchState::from_level(level, entry.switch.inverted);
                    (observed != entry.state).then(|| Drift {
                        id: entry.switch.id.clone(),
                        expected: entry.state,
                        observed,
                    })
                }
                Err(e) => {
                    warn!(switch = %entry.switch.id, "Failed to read back pin: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::driver::{MockDriver, PinLevel};

    fn registry(switches: &[Switch]) -> PinRegistry<MockDriver> {
        PinRegistry::new(MockDriver::new(), switches).unwrap()
    }

    #[test]
    fn test_initial_state_is_driven() {
        let reg = registry(&[
            Switch::new("lamp", 17),
            Switch::new("fan", 22).initial_state(SwitchState::On),
            Switch::new("relay", 23).inverted(true),
        ]);

        assert_eq!(reg.driver().level(17), Some(PinLevel::Low));
        assert_eq!(reg.driver().level(22), Some(PinLevel::High));
        // inverted + off means the pin idles high
        assert_eq!(reg.driver().level(23), Some(PinLevel::High));
        assert_eq!(reg.get_state("fan").unwrap(), SwitchState::On);
    }

    #[test]
    fn test_set_pin_drives_hardware_and_memory() {
        let mut reg = registry(&[Switch::new("lamp", 17)]);

        let applied = reg.set_pin("lamp", SwitchState::On).unwrap();
        assert_eq!(applied, SwitchState::On);
        assert_eq!(reg.get_state("lamp").unwrap(), SwitchState::On);
        assert_eq!(reg.driver().level(17), Some(PinLevel::High));
    }

    #[test]
    fn test_inverted_only_changes_physical_level() {
        let mut reg = registry(&[Switch::new("relay", 23).inverted(true)]);

        reg.set_pin("relay", SwitchState::On).unwrap();
        assert_eq!(reg.get_state("relay").unwrap(), SwitchState::On);
        assert_eq!(reg.driver().level(23), Some(PinLevel::Low));
    }

    #[test]
    fn test_on_then_off_restores_previous_state() {
        for inverted in [false, true] {
            let mut reg = registry(&[Switch::new("lamp", 17).inverted(inverted)]);
            let before_state = reg.get_state("lamp").unwrap();
            let before_level = reg.driver().level(17);

            reg.set_pin("lamp", SwitchState::On).unwrap();
            reg.set_pin("lamp", SwitchState::Off).unwrap();

            assert_eq!(reg.get_state("lamp").unwrap(), before_state);
            assert_eq!(reg.driver().level(17), before_level);
        }
    }

    #[test]
    fn test_unknown_switch() {
        let mut reg = registry(&[Switch::new("lamp", 17)]);
        assert!(matches!(
            reg.set_pin("garage", SwitchState::On),
            Err(RegistryError::UnknownSwitch(id)) if id == "garage"
        ));
        assert!(matches!(
            reg.get_state("garage"),
            Err(RegistryError::UnknownSwitch(_))
        ));
    }

    #[test]
    fn test_hardware_error_leaves_state_untouched() {
        let mut reg = registry(&[Switch::new("lamp", 17)]);
        reg.driver_mut().fail_pin(17);

        let result = reg.set_pin("lamp", SwitchState::On);
        assert!(matches!(result, Err(RegistryError::Hardware { .. })));
        assert_eq!(reg.get_state("lamp").unwrap(), SwitchState::Off);
    }

    #[test]
    fn test_hardware_error_names_switch_and_pin() {
        let mut reg = registry(&[Switch::new("lamp", 17)]);
        reg.driver_mut().fail_pin(17);

        // the caller logs this message as the only record of the failure
        let message = reg.set_pin("lamp", SwitchState::On).unwrap_err().to_string();
        assert!(message.contains("'lamp'"), "{}", message);
        assert!(message.contains("pin 17"), "{}", message);
    }

    #[test]
    fn test_claim_failure_is_reported() {
        let mut driver = MockDriver::new();
        driver.fail_pin(17);
        let result = PinRegistry::new(driver, &[Switch::new("lamp", 17)]);
        assert!(matches!(result, Err(RegistryError::Hardware { id, .. }) if id == "lamp"));
    }

    #[test]
    fn test_drift_detection() {
        let mut reg = registry(&[Switch::new("lamp", 17), Switch::new("fan", 22)]);
        assert!(reg.drift().is_empty());

        reg.driver_mut().force_level(22, PinLevel::High);
        let drift = reg.drift();
        assert_eq!(
            drift,
            vec![Drift {
                id: "fan".to_string(),
                expected: SwitchState::Off,
                observed: SwitchState::On,
            }]
        );
        // drift is reported, never corrected
        assert_eq!(reg.get_state("fan").unwrap(), SwitchState::Off);
    }

    #[test]
    fn test_switches_are_ordered_by_id() {
        let reg = registry(&[Switch::new("zeta", 5), Switch::new("alpha", 6)]);
        let ids: Vec<&str> = reg.switches().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(reg.len(), 2);
    }
}
