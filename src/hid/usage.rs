//! Static USB HID usage tables
//!
//! Usage IDs come from the HID Usage Tables, Keyboard/Keypad page (0x07).

/// Linux key code (scancode) -> HID usage ID, indexed by key code.
/// Key codes without a keyboard-page usage map to 0x00.
#[rustfmt::skip]
pub const SCANCODE_TO_USAGE: [u8; 128] = [
    // 0: reserved, esc, 1..0, minus, equal, backspace, tab
    0x00, 0x29, 0x1e, 0x1f, 0x20, 0x21, 0x22, 0x23,
    0x24, 0x25, 0x26, 0x27, 0x2d, 0x2e, 0x2a, 0x2b,
    // 16: q w e r t y u i o p [ ] enter lctrl a s
    0x14, 0x1a, 0x08, 0x15, 0x17, 0x1c, 0x18, 0x0c,
    0x12, 0x13, 0x2f, 0x30, 0x28, 0xe0, 0x04, 0x16,
    // 32: d f g h j k l ; ' ` lshift \ z x c v
    0x07, 0x09, 0x0a, 0x0b, 0x0d, 0x0e, 0x0f, 0x33,
    0x34, 0x35, 0xe1, 0x31, 0x1d, 0x1b, 0x06, 0x19,
    // 48: b n m , . / rshift kp* lalt space capslock f1..f5
    0x05, 0x11, 0x10, 0x36, 0x37, 0x38, 0xe5, 0x55,
    0xe2, 0x2c, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e,
    // 64: f6..f10 numlock scrolllock kp7 kp8 kp9 kp- kp4 kp5 kp6 kp+ kp1
    0x3f, 0x40, 0x41, 0x42, 0x43, 0x53, 0x47, 0x5f,
    0x60, 0x61, 0x56, 0x5c, 0x5d, 0x5e, 0x57, 0x59,
    // 80: kp2 kp3 kp0 kp. (84) zenkakuhankaku 102nd f11 f12 ro katakana hiragana henkan katakanahiragana muhenkan kpjpcomma
    0x5a, 0x5b, 0x62, 0x63, 0x00, 0x94, 0x64, 0x44,
    0x45, 0x87, 0x92, 0x93, 0x8a, 0x88, 0x8b, 0x8c,
    // 96: kpenter rctrl kp/ sysrq ralt linefeed home up pageup left right end down pagedown insert delete
    0x58, 0xe4, 0x54, 0x46, 0xe6, 0x00, 0x4a, 0x52,
    0x4b, 0x50, 0x4f, 0x4d, 0x51, 0x4e, 0x49, 0x4c,
    // 112: macro mute volumedown volumeup power kp= kp+- pause scale kp, hangeul hanja yen lmeta rmeta compose
    0x00, 0x7f, 0x81, 0x80, 0x66, 0x67, 0xd7, 0x48,
    0x00, 0x85, 0x90, 0x91, 0x89, 0xe3, 0xe7, 0x65,
];

/// Named non-printable keys usable in chords
const NAMED_KEYS: &[(&str, u8)] = &[
    ("enter", 0x28),
    ("return", 0x28),
    ("escape", 0x29),
    ("esc", 0x29),
    ("backspace", 0x2a),
    ("tab", 0x2b),
    ("space", 0x2c),
    ("capslock", 0x39),
    ("f1", 0x3a),
    ("f2", 0x3b),
    ("f3", 0x3c),
    ("f4", 0x3d),
    ("f5", 0x3e),
    ("f6", 0x3f),
    ("f7", 0x40),
    ("f8", 0x41),
    ("f9", 0x42),
    ("f10", 0x43),
    ("f11", 0x44),
    ("f12", 0x45),
    ("printscreen", 0x46),
    ("sysrq", 0x46),
    ("scrolllock", 0x47),
    ("pause", 0x48),
    ("insert", 0x49),
    ("home", 0x4a),
    ("pageup", 0x4b),
    ("delete", 0x4c),
    ("end", 0x4d),
    ("pagedown", 0x4e),
    ("right", 0x4f),
    ("left", 0x50),
    ("down", 0x51),
    ("up", 0x52),
    ("numlock", 0x53),
    ("kp_enter", 0x58),
    ("menu", 0x65),
    ("compose", 0x65),
];

/// HID usage for a Linux key code, 0x00 when unmapped or out of range
pub fn scancode_to_usage(scancode: u16) -> u8 {
    SCANCODE_TO_USAGE
        .get(usize::from(scancode))
        .copied()
        .unwrap_or(0x00)
}

/// HID usage for a named key (case-insensitive)
pub fn named_key_usage(name: &str) -> Option<u8> {
    let name = name.to_ascii_lowercase();
    NAMED_KEYS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|&(_, usage)| usage)
}
