//! Chord -> boot-keyboard report encoding
//!
//! Modifiers are OR-ed into byte 0, then named keys and text fragments fill
//! the six key slots in request order. Items past the sixth slot are dropped
//! without being resolved (rollover truncation).

use thiserror::Error;
use tracing::debug;

use super::report::{HidReport, Modifier};
use super::usage::{named_key_usage, scancode_to_usage};
use crate::common::constants::hid::KEY_SLOTS;
use crate::keymap::KeymapTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid UTF-8 in key fragment {0:02x?}")]
    InvalidUtf8(Vec<u8>),
    #[error("character {0:?} cannot be typed with the active keymap")]
    Unencodable(char),
    #[error("unknown key name '{0}'")]
    UnknownKey(String),
}

/// One non-modifier item of a chord
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordKey {
    /// Non-printable key resolved through the static name table
    Named(String),
    /// Raw UTF-8 fragment holding a single character
    Text(Vec<u8>),
}

/// A requested key combination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChordSpec {
    pub modifiers: Vec<Modifier>,
    pub keys: Vec<ChordKey>,
}

impl ChordSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chord from script tokens such as `["ctrl", "alt", "f1"]`.
    ///
    /// A token is a modifier tag, a named key, or a single character; anything
    /// else is rejected so typos don't silently become text.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, EncodeError> {
        let mut chord = ChordSpec::new();
        for token in tokens {
            let token = token.as_ref();
            if let Some(modifier) = Modifier::from_tag(token) {
                chord.modifiers.push(modifier);
            } else if named_key_usage(token).is_some() {
                chord.keys.push(ChordKey::Named(token.to_string()));
            } else if token.chars().count() == 1 {
                chord.keys.push(ChordKey::Text(token.as_bytes().to_vec()));
            } else {
                return Err(EncodeError::UnknownKey(token.to_string()));
            }
        }
        Ok(chord)
    }
}

#[cfg(test)]
impl ChordSpec {
    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.keys.push(ChordKey::Named(name.to_string()));
        self
    }

    pub fn text(mut self, fragment: &str) -> Self {
        self.keys.push(ChordKey::Text(fragment.as_bytes().to_vec()));
        self
    }
}

/// Encode a chord into its canonical report
pub fn encode(chord: &ChordSpec, keymap: &KeymapTable) -> Result<HidReport, EncodeError> {
    let mut report = HidReport::NEUTRAL;

    for modifier in &chord.modifiers {
        report.set_modifier_bits(modifier.bit());
    }

    if chord.keys.len() > KEY_SLOTS {
        debug!(
            requested = chord.keys.len(),
            kept = KEY_SLOTS,
            "Chord exceeds rollover limit, truncating"
        );
    }

    for (slot, key) in chord.keys.iter().take(KEY_SLOTS).enumerate() {
        let usage = match key {
            ChordKey::Named(name) => {
                named_key_usage(name).ok_or_else(|| EncodeError::UnknownKey(name.clone()))?
            }
            ChordKey::Text(fragment) => text_usage(fragment, keymap)?,
        };
        report.set_slot(slot, usage);
    }

    Ok(report)
}

fn text_usage(fragment: &[u8], keymap: &KeymapTable) -> Result<u8, EncodeError> {
    let ch = decode_codepoint(fragment)?;
    let scancode = keymap
        .scancode_for(ch)
        .ok_or(EncodeError::Unencodable(ch))?;
    match scancode_to_usage(scancode) {
        0x00 => Err(EncodeError::Unencodable(ch)),
        usage => Ok(usage),
    }
}

/// Decode the single codepoint carried by a text fragment
pub fn decode_codepoint(fragment: &[u8]) -> Result<char, EncodeError> {
    decode_utf8(fragment)?
        .first()
        .copied()
        .ok_or_else(|| EncodeError::InvalidUtf8(fragment.to_vec()))
}

/// Decode UTF-8 text into codepoints; invalid or truncated sequences are errors
pub fn decode_utf8(bytes: &[u8]) -> Result<Vec<char>, EncodeError> {
    std::str::from_utf8(bytes)
        .map(|s| s.chars().collect())
        .map_err(|_| EncodeError::InvalidUtf8(bytes.to_vec()))
}

/// Split a report back into its modifier byte and active usages
pub fn decode(report: &HidReport) -> (u8, Vec<u8>) {
    (report.modifiers(), report.active_usages())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::table::tests::us_keymap;

    #[test]
    fn test_modifiers_are_ored() {
        let keymap = us_keymap();
        let chord = ChordSpec::new()
            .modifier(Modifier::LeftCtrl)
            .modifier(Modifier::RightAlt)
            .modifier(Modifier::LeftCtrl);
        let report = encode(&chord, &keymap).unwrap();
        assert_eq!(report.modifiers(), 0x01 | 0x40);
        assert!(report.active_usages().is_empty());
    }

    #[test]
    fn test_keys_fill_slots_in_request_order() {
        let keymap = us_keymap();
        let chord = ChordSpec::new()
            .modifier(Modifier::LeftShift)
            .text("b")
            .named("enter")
            .text("a");
        let report = encode(&chord, &keymap).unwrap();
        assert_eq!(
            report.as_bytes(),
            &[0x02, 0x00, 0x05, 0x28, 0x04, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_rollover_truncates_at_six() {
        let keymap = us_keymap();
        let mut chord = ChordSpec::new();
        for name in ["f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8"] {
            chord = chord.named(name);
        }
        let report = encode(&chord, &keymap).unwrap();
        assert_eq!(report.key_slots(), &[0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f]);

        // Items past the sixth slot are never resolved
        let chord = ChordSpec {
            modifiers: vec![],
            keys: (0..6)
                .map(|_| ChordKey::Named("tab".into()))
                .chain([ChordKey::Text(vec![0xff])])
                .collect(),
        };
        assert!(encode(&chord, &keymap).is_ok());
    }

    #[test]
    fn test_named_keys_round_trip() {
        let keymap = us_keymap();
        let names = ["escape", "f5", "home", "pagedown", "numlock"];
        let chord = names.iter().fold(ChordSpec::new(), |c, n| c.named(n));
        let (mods, usages) = decode(&encode(&chord, &keymap).unwrap());
        assert_eq!(mods, 0);
        let expected: Vec<u8> = names.iter().map(|n| named_key_usage(n).unwrap()).collect();
        assert_eq!(usages, expected);
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let keymap = us_keymap();
        let chord = ChordSpec {
            modifiers: vec![],
            keys: vec![ChordKey::Text(vec![0xe2, 0x82])],
        };
        assert_eq!(
            encode(&chord, &keymap),
            Err(EncodeError::InvalidUtf8(vec![0xe2, 0x82]))
        );

        let empty = ChordSpec {
            modifiers: vec![],
            keys: vec![ChordKey::Text(vec![])],
        };
        assert!(matches!(
            encode(&empty, &keymap),
            Err(EncodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_unencodable_characters() {
        let keymap = us_keymap();
        assert_eq!(
            encode(&ChordSpec::new().text("€"), &keymap),
            Err(EncodeError::Unencodable('€'))
        );
        // Uppercase letters only live in the shift layer
        assert_eq!(
            encode(&ChordSpec::new().text("A"), &keymap),
            Err(EncodeError::Unencodable('A'))
        );
    }

    #[test]
    fn test_from_tokens() {
        let chord = ChordSpec::from_tokens(&["ctrl", "alt", "Delete"]).unwrap();
        assert_eq!(chord.modifiers, vec![Modifier::LeftCtrl, Modifier::LeftAlt]);
        assert_eq!(chord.keys, vec![ChordKey::Named("Delete".into())]);

        let chord = ChordSpec::from_tokens(&["shift", "x"]).unwrap();
        assert_eq!(chord.keys, vec![ChordKey::Text(b"x".to_vec())]);

        assert_eq!(
            ChordSpec::from_tokens(&["ctrl", "bogus"]),
            Err(EncodeError::UnknownKey("bogus".into()))
        );
    }

    #[test]
    fn test_decode_utf8() {
        assert_eq!(decode_utf8("aé€".as_bytes()).unwrap(), vec!['a', 'é', '€']);
        assert!(decode_utf8(&[0x61, 0xc3]).is_err());
    }
}
