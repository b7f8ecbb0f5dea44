//! Hotkey table owned by the script engine

use std::collections::HashMap;

use rhai::FnPtr;
use thiserror::Error;

use crate::common::constants::hid::REPORT_LEN;
use crate::hid::HidReport;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("hotkeys can only be registered while the script loads")]
    Sealed,
    #[error("a chord without keys or modifiers cannot be a hotkey")]
    NeutralChord,
}

/// Canonical report bytes -> callback. Filled during script load, then sealed.
#[derive(Debug, Default)]
pub struct HotkeyRegistry {
    entries: HashMap<[u8; REPORT_LEN], FnPtr>,
    sealed: bool,
}

impl HotkeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. A second registration for the same report
    /// replaces the first and the old callback is returned.
    pub fn register(
        &mut self,
        report: HidReport,
        callback: FnPtr,
    ) -> Result<Option<FnPtr>, RegistryError> {
        if self.is_sealed() {
            return Err(RegistryError::Sealed);
        }
        if report.is_neutral() {
            return Err(RegistryError::NeutralChord);
        }
        Ok(self.entries.insert(*report.as_bytes(), callback))
    }

    /// Exact byte match; reports that are not 8 bytes never match
    pub fn lookup(&self, bytes: &[u8]) -> Option<FnPtr> {
        let key: [u8; REPORT_LEN] = bytes.try_into().ok()?;
        self.entries.get(&key).cloned()
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTRL_A: [u8; 8] = [0x01, 0, 0x04, 0, 0, 0, 0, 0];

    fn callback(name: &str) -> FnPtr {
        FnPtr::new(name).unwrap()
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HotkeyRegistry::new();
        let report = HidReport::from_array(CTRL_A);

        assert!(registry.register(report, callback("first")).unwrap().is_none());
        let replaced = registry.register(report, callback("second")).unwrap();
        assert_eq!(replaced.unwrap().fn_name(), "first");

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&CTRL_A).unwrap().fn_name(), "second");
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut registry = HotkeyRegistry::new();
        registry
            .register(HidReport::from_array(CTRL_A), callback("hit"))
            .unwrap();

        let mut other = CTRL_A;
        other[0] = 0x02;
        assert!(registry.lookup(&other).is_none());
        assert!(registry.lookup(&CTRL_A[..7]).is_none());
        assert!(registry.lookup(&[0x01, 0, 0x04, 0, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn test_sealed_registry_rejects_registration() {
        let mut registry = HotkeyRegistry::new();
        registry.seal();
        assert_eq!(
            registry
                .register(HidReport::from_array(CTRL_A), callback("late"))
                .unwrap_err(),
            RegistryError::Sealed
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_neutral_chord_rejected() {
        let mut registry = HotkeyRegistry::new();
        assert_eq!(
            registry
                .register(HidReport::NEUTRAL, callback("release"))
                .unwrap_err(),
            RegistryError::NeutralChord
        );
    }
}
