//! HID report descriptor analysis
//!
//! Walks the item stream of a raw report descriptor to work out how many
//! bytes one input report of the device occupies. Only what the gadget needs
//! is tracked: Report Size, Report Count, Report ID and Input items.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::common::constants::hid::{DEFAULT_REPORT_LEN, MAX_REPORT_LEN};

const LONG_ITEM_PREFIX: u8 = 0xfe;

const ITEM_TYPE_MAIN: u8 = 0;
const ITEM_TYPE_GLOBAL: u8 = 1;

const MAIN_TAG_INPUT: u8 = 0x08;
const GLOBAL_TAG_REPORT_SIZE: u8 = 0x07;
const GLOBAL_TAG_REPORT_ID: u8 = 0x08;
const GLOBAL_TAG_REPORT_COUNT: u8 = 0x09;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor truncated inside item at offset {0}")]
    Truncated(usize),
    #[error("descriptor declares no input reports")]
    NoInputReports,
    #[error("input report of {0} bits exceeds the 16384-byte hidraw limit")]
    Oversized(u64),
}

#[derive(Default)]
struct Walker {
    report_size: u64,
    report_count: u64,
    report_bits: u64,
    has_report_ids: bool,
    max_len: usize,
}

impl Walker {
    fn flush(&mut self) -> Result<(), DescriptorError> {
        if self.report_bits == 0 {
            return Ok(());
        }
        let bytes = self.report_bits.div_ceil(8) + u64::from(self.has_report_ids);
        let len = usize::try_from(bytes)
            .ok()
            .filter(|len| *len <= MAX_REPORT_LEN)
            .ok_or(DescriptorError::Oversized(self.report_bits))?;
        self.max_len = self.max_len.max(len);
        Ok(())
    }
}

/// Largest input report length declared by the descriptor, in bytes
pub fn analyze(descriptor: &[u8]) -> Result<usize, DescriptorError> {
    let mut walker = Walker::default();
    let mut i = 0;

    while i < descriptor.len() {
        let prefix = descriptor[i];
        let item_start = i;
        i += 1;

        if prefix == LONG_ITEM_PREFIX {
            // bDataSize, bLongItemTag, data
            let size = *descriptor
                .get(i)
                .ok_or(DescriptorError::Truncated(item_start))?;
            i += 2 + usize::from(size);
            if i > descriptor.len() {
                return Err(DescriptorError::Truncated(item_start));
            }
            continue;
        }

        let size = [0usize, 1, 2, 4][usize::from(prefix & 0x03)];
        let item_type = (prefix >> 2) & 0x03;
        let tag = (prefix >> 4) & 0x0f;

        let data = descriptor
            .get(i..i + size)
            .ok_or(DescriptorError::Truncated(item_start))?;
        let value = data
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        i += size;

        match (item_type, tag) {
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_SIZE) => walker.report_size = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_COUNT) => walker.report_count = value,
            (ITEM_TYPE_GLOBAL, GLOBAL_TAG_REPORT_ID) => {
                walker.flush()?;
                walker.has_report_ids = true;
                walker.report_bits = 0;
            }
            (ITEM_TYPE_MAIN, MAIN_TAG_INPUT) => {
                walker.report_bits = walker
                    .report_bits
                    .saturating_add(walker.report_size.saturating_mul(walker.report_count));
            }
            _ => {}
        }
    }

    walker.flush()?;
    match walker.max_len {
        0 => Err(DescriptorError::NoInputReports),
        len => Ok(len),
    }
}

/// Expected report length, falling back to 8 bytes for unusable descriptors
pub fn report_length(descriptor: &[u8]) -> usize {
    analyze(descriptor).unwrap_or_else(|e| {
        debug!(error = %e, fallback = DEFAULT_REPORT_LEN, "Using default report length");
        DEFAULT_REPORT_LEN
    })
}

/// Read a descriptor file (usually from sysfs) and compute its report length
pub fn report_length_from_file(path: &Path) -> usize {
    match std::fs::read(path) {
        Ok(descriptor) => {
            let len = report_length(&descriptor);
            debug!(path = %path.display(), report_length = len, "Analyzed report descriptor");
            len
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read report descriptor, assuming default length");
            DEFAULT_REPORT_LEN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Boot keyboard descriptor (HID 1.11 appendix B.1)
    const BOOT_KEYBOARD: &[u8] = &[
        0x05, 0x01, 0x09, 0x06, 0xa1, 0x01, 0x05, 0x07, 0x19, 0xe0, 0x29, 0xe7, 0x15, 0x00,
        0x25, 0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x01, 0x75, 0x08, 0x81, 0x01,
        0x95, 0x05, 0x75, 0x01, 0x05, 0x08, 0x19, 0x01, 0x29, 0x05, 0x91, 0x02, 0x95, 0x01,
        0x75, 0x03, 0x91, 0x01, 0x95, 0x06, 0x75, 0x08, 0x15, 0x00, 0x25, 0x65, 0x05, 0x07,
        0x19, 0x00, 0x29, 0x65, 0x81, 0x00, 0xc0,
    ];

    #[test]
    fn test_single_report_without_id() {
        // Report Size 8, Report Count 8, Input
        let descriptor = [0x75, 0x08, 0x95, 0x08, 0x81, 0x02];
        assert_eq!(report_length(&descriptor), 8);
    }

    #[test]
    fn test_boot_keyboard() {
        assert_eq!(analyze(BOOT_KEYBOARD), Ok(8));
    }

    #[test]
    fn test_empty_descriptor_uses_default() {
        assert_eq!(analyze(&[]), Err(DescriptorError::NoInputReports));
        assert_eq!(report_length(&[]), DEFAULT_REPORT_LEN);
    }

    #[test]
    fn test_largest_report_id_wins() {
        let descriptor = [
            0x85, 0x01, // Report ID 1
            0x75, 0x08, 0x95, 0x08, 0x81, 0x02, // 64 bits
            0x85, 0x02, // Report ID 2
            0x75, 0x08, 0x95, 0x10, 0x81, 0x02, // 128 bits
        ];
        assert_eq!(report_length(&descriptor), 17);

        let reversed = [
            0x85, 0x01, 0x75, 0x08, 0x95, 0x10, 0x81, 0x02, 0x85, 0x02, 0x75, 0x08, 0x95, 0x02,
            0x81, 0x02,
        ];
        assert_eq!(report_length(&reversed), 17);
    }

    #[test]
    fn test_output_and_feature_items_are_ignored() {
        // Output (0x91) and Feature (0xb1) with large sizes
        let descriptor = [
            0x75, 0x08, 0x95, 0x04, 0x81, 0x02, 0x95, 0x40, 0x91, 0x02, 0xb1, 0x02,
        ];
        assert_eq!(report_length(&descriptor), 4);
    }

    #[test]
    fn test_partial_bits_round_up() {
        let descriptor = [0x75, 0x01, 0x95, 0x05, 0x81, 0x02];
        assert_eq!(report_length(&descriptor), 1);
    }

    #[test]
    fn test_long_items_are_skipped() {
        let descriptor = [
            0xfe, 0x03, 0x10, 0xaa, 0xbb, 0xcc, // long item with 3 data bytes
            0x75, 0x08, 0x95, 0x03, 0x81, 0x02,
        ];
        assert_eq!(report_length(&descriptor), 3);
    }

    #[test]
    fn test_four_byte_values() {
        // Report Count encoded in 4 bytes
        let descriptor = [0x75, 0x08, 0x97, 0x0a, 0x00, 0x00, 0x00, 0x81, 0x02];
        assert_eq!(report_length(&descriptor), 10);
    }

    #[test]
    fn test_malformed_descriptors_fall_back() {
        assert_eq!(analyze(&[0x75]), Err(DescriptorError::Truncated(0)));
        assert_eq!(report_length(&[0x75, 0x08, 0x95]), DEFAULT_REPORT_LEN);
        assert_eq!(report_length(&[0xfe, 0x10, 0x00, 0x01]), DEFAULT_REPORT_LEN);
        assert_eq!(report_length(&[0xfe]), DEFAULT_REPORT_LEN);
    }

    #[test]
    fn test_oversized_report_falls_back() {
        // Report Size and Report Count both 0xffffffff
        let descriptor = [
            0x77, 0xff, 0xff, 0xff, 0xff, 0x97, 0xff, 0xff, 0xff, 0xff, 0x81, 0x02,
        ];
        assert!(matches!(analyze(&descriptor), Err(DescriptorError::Oversized(_))));
        assert_eq!(report_length(&descriptor), DEFAULT_REPORT_LEN);

        // One byte over the hidraw limit, counting the report ID
        let over = [0x85, 0x01, 0x75, 0x08, 0x96, 0x00, 0x40, 0x81, 0x02];
        assert_eq!(report_length(&over), DEFAULT_REPORT_LEN);

        let at_limit = [0x75, 0x08, 0x96, 0x00, 0x40, 0x81, 0x02];
        assert_eq!(report_length(&at_limit), MAX_REPORT_LEN);
    }

    #[test]
    fn test_report_length_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            report_length_from_file(&dir.path().join("report_descriptor")),
            DEFAULT_REPORT_LEN
        );

        let path = dir.path().join("desc");
        std::fs::write(&path, BOOT_KEYBOARD).unwrap();
        assert_eq!(report_length_from_file(&path), 8);
    }
}
