// SPDX-License-Identifier: GPL-3.0-only

//! Common utility types shared across models

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// GPT alignment boundary (1 MiB) - standard for modern disks
pub const GPT_ALIGNMENT_BYTES: u64 = 1024 * 1024;

/// A byte range representing a contiguous region (free space, partitions)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Check if this range is valid for a disk of the given size
    pub fn is_valid_for_disk(&self, disk_size: u64) -> bool {
        self.start < self.end && self.end <= disk_size
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The same range with its start moved up to the next `alignment` boundary.
    pub fn aligned(&self, alignment: u64) -> Self {
        Self {
            start: align_up(self.start, alignment).min(self.end),
            end: self.end,
        }
    }
}

/// Rounds `value` up to a multiple of `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment).saturating_mul(alignment)
}

/// Rounds `value` down to a multiple of `alignment`.
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value - value % alignment
}

/// Format bytes using binary units, e.g. "1.50 GiB".
pub fn bytes_to_pretty(bytes: u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = bytes as f64;

    while val >= 1024. && steps < 6 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KiB",
        2 => "MiB",
        3 => "GiB",
        4 => "TiB",
        5 => "PiB",
        _ => "EiB",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{val:.2} {unit} ({bytes_str} bytes)")
    } else {
        format!("{val:.2} {unit}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_to_mebibyte() {
        assert_eq!(align_up(1, GPT_ALIGNMENT_BYTES), GPT_ALIGNMENT_BYTES);
        assert_eq!(align_up(GPT_ALIGNMENT_BYTES, GPT_ALIGNMENT_BYTES), GPT_ALIGNMENT_BYTES);
        assert_eq!(align_down(GPT_ALIGNMENT_BYTES + 7, GPT_ALIGNMENT_BYTES), GPT_ALIGNMENT_BYTES);

        let range = ByteRange::new(17_408, 10 * GPT_ALIGNMENT_BYTES).aligned(GPT_ALIGNMENT_BYTES);
        assert_eq!(range.start, GPT_ALIGNMENT_BYTES);
        assert_eq!(range.size(), 9 * GPT_ALIGNMENT_BYTES);
    }

    #[test]
    fn formats_pretty_sizes() {
        assert_eq!(bytes_to_pretty(512, false), "512.00 B");
        assert_eq!(bytes_to_pretty(1024 * 1024, false), "1.00 MiB");
        assert_eq!(
            bytes_to_pretty(1536 * 1024 * 1024, true),
            "1.50 GiB (1,610,612,736 bytes)"
        );
    }

    #[test]
    fn detects_overlaps() {
        let a = ByteRange::new(0, 10);
        assert!(a.overlaps(&ByteRange::new(9, 20)));
        assert!(!a.overlaps(&ByteRange::new(10, 20)));
    }
}
