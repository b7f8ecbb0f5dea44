//! Isolated script engine for user hotkeys
//!
//! The engine lives on one thread and is reached only through
//! [`SandboxBridge::handle_report`]; values come back as detached JSON.

pub mod bridge;
pub mod registry;
pub mod value;

pub use bridge::{HotkeyOutcome, SandboxBridge, SandboxError};
