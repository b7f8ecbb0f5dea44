//! Configuration management
//!
//! JSON configuration for the appliance: paths, external commands, device
//! discovery and script sandbox limits.

pub mod settings;

pub use settings::{AppConfig, CommandSpec, DeviceConfig, GadgetConfig, KeymapConfig, SandboxLimits};
