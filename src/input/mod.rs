//! Input device discovery and exclusive grabs

pub mod device_detection;
pub mod grab;
