//! USB HID boot-protocol keyboard report
//!
//! Layout (8 bytes):
//! ```text
//! Byte 0: Modifier keys (bitfield)
//!         Bit 0 = Left Ctrl,  Bit 1 = Left Shift,
//!         Bit 2 = Left Alt,   Bit 3 = Left GUI,
//!         Bit 4 = Right Ctrl, Bit 5 = Right Shift,
//!         Bit 6 = Right Alt,  Bit 7 = Right GUI
//! Byte 1: Reserved (0x00)
//! Byte 2-7: Up to 6 simultaneous key codes (USB HID usage codes)
//! ```

use std::fmt;

use crate::common::constants::hid::{KEY_SLOTS, REPORT_LEN};

/// Modifier key bit in byte 0 of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    LeftCtrl,
    LeftShift,
    LeftAlt,
    LeftGui,
    RightCtrl,
    RightShift,
    RightAlt,
    RightGui,
}

impl Modifier {
    pub const fn bit(self) -> u8 {
        match self {
            Modifier::LeftCtrl => 0x01,
            Modifier::LeftShift => 0x02,
            Modifier::LeftAlt => 0x04,
            Modifier::LeftGui => 0x08,
            Modifier::RightCtrl => 0x10,
            Modifier::RightShift => 0x20,
            Modifier::RightAlt => 0x40,
            Modifier::RightGui => 0x80,
        }
    }

    /// Parse a modifier tag as written in hotkey scripts (case-insensitive)
    pub fn from_tag(tag: &str) -> Option<Self> {
        let modifier = match tag.to_ascii_lowercase().as_str() {
            "ctrl" | "control" | "lctrl" | "left_ctrl" => Modifier::LeftCtrl,
            "shift" | "lshift" | "left_shift" => Modifier::LeftShift,
            "alt" | "lalt" | "left_alt" => Modifier::LeftAlt,
            "gui" | "super" | "meta" | "win" | "lgui" | "left_gui" => Modifier::LeftGui,
            "rctrl" | "right_ctrl" => Modifier::RightCtrl,
            "rshift" | "right_shift" => Modifier::RightShift,
            "ralt" | "altgr" | "right_alt" => Modifier::RightAlt,
            "rgui" | "rsuper" | "right_gui" => Modifier::RightGui,
            _ => return None,
        };
        Some(modifier)
    }
}

/// One 8-byte boot-keyboard report
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HidReport([u8; REPORT_LEN]);

impl HidReport {
    /// The all-keys-released report
    pub const NEUTRAL: HidReport = HidReport([0; REPORT_LEN]);

    pub const fn from_array(bytes: [u8; REPORT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a report from raw bytes; anything but exactly 8 bytes is rejected
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; REPORT_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn modifiers(&self) -> u8 {
        self.0[0]
    }

    /// The six key slots, including empty (zero) slots
    pub fn key_slots(&self) -> &[u8] {
        &self.0[2..2 + KEY_SLOTS]
    }

    /// Non-zero usage IDs in slot order
    pub fn active_usages(&self) -> Vec<u8> {
        self.key_slots().iter().copied().filter(|&u| u != 0).collect()
    }

    pub fn is_neutral(&self) -> bool {
        self.0 == [0; REPORT_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.0
    }

    pub(crate) fn set_modifier_bits(&mut self, bits: u8) {
        self.0[0] |= bits;
    }

    pub(crate) fn set_slot(&mut self, slot: usize, usage: u8) {
        self.0[2 + slot] = usage;
    }
}

impl fmt::Debug for HidReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HidReport({})", self)
    }
}

impl fmt::Display for HidReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
