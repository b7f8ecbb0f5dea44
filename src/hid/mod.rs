//! USB HID boot-keyboard reports: encoding, decoding and descriptor analysis

pub mod codec;
pub mod descriptor;
pub mod report;
pub mod usage;

pub use codec::{ChordSpec, decode, encode};
pub use report::HidReport;
