//! HID report forwarding from physical devices to the USB gadget

pub mod gate;
pub mod link;

pub use gate::{DispatchRequest, HotkeyGate, Verdict};
pub use link::{ForwarderLink, LinkEvent};
