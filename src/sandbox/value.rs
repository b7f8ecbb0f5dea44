//! Values that cross the sandbox boundary
//!
//! A callback result is serialized to JSON inside the sandbox and parsed
//! back into a host-owned value, so nothing returned by a script can refer to
//! engine state.

use rhai::Dynamic;
use serde_json::Value;

use crate::common::constants::hid::REPORT_LEN;
use crate::hid::HidReport;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryValue(Value);

impl BoundaryValue {
    pub fn from_dynamic(value: &Dynamic) -> Result<Self, serde_json::Error> {
        let message = serde_json::to_string(value)?;
        Self::from_message(&message)
    }

    pub fn from_message(message: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(message).map(BoundaryValue)
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// Reports a callback asked to be typed.
    ///
    /// `()` means none, a single 8-byte array (or `encode` blob) is one
    /// report, and an array of those is a sequence.
    pub fn reports(&self) -> Result<Vec<HidReport>, String> {
        match &self.0 {
            Value::Null | Value::Bool(_) => Ok(Vec::new()),
            Value::Array(items) if items.is_empty() => Ok(Vec::new()),
            Value::Array(items) if items.iter().all(Value::is_number) => {
                Ok(vec![report_from_json(&self.0)?])
            }
            Value::Array(items) => items.iter().map(report_from_json).collect(),
            other => Err(format!("unsupported callback result: {other}")),
        }
    }
}

fn report_from_json(value: &Value) -> Result<HidReport, String> {
    let items = value
        .as_array()
        .ok_or_else(|| format!("expected an array of bytes, got {value}"))?;
    if items.len() != REPORT_LEN {
        return Err(format!(
            "report has {} bytes, expected {REPORT_LEN}",
            items.len()
        ));
    }

    let mut bytes = [0u8; REPORT_LEN];
    for (slot, item) in bytes.iter_mut().zip(items) {
        *slot = item
            .as_u64()
            .and_then(|b| u8::try_from(b).ok())
            .ok_or_else(|| format!("invalid report byte {item}"))?;
    }
    Ok(HidReport::from_array(bytes))
}
