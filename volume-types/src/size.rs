// SPDX-License-Identifier: GPL-3.0-only

//! Byte and percentage sizes with human readable I/O
//!
//! Sizes keep the text they were parsed from so that documents round-trip
//! without rewriting `50GiB` into `53687091200`.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid size {input:?}: {reason}")]
pub struct SizeError {
    pub input: String,
    pub reason: String,
}

impl SizeError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// A byte count, possibly unset, possibly negative (counted from the end).
///
/// Unset is distinct from zero: `ByteSize::parse("0")` is set.
#[derive(Clone, Default)]
pub struct ByteSize {
    value: Option<u64>,
    raw: Option<String>,
    negative: bool,
}

impl ByteSize {
    pub fn new(value: u64) -> Self {
        Self {
            value: Some(value),
            raw: None,
            negative: false,
        }
    }

    /// A size reserved from the end of the available space.
    pub fn new_negative(value: u64) -> Self {
        Self {
            value: Some(value),
            raw: None,
            negative: true,
        }
    }

    pub fn parse(text: &str) -> Result<Self, SizeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let (negative, magnitude) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };

        Ok(Self {
            value: Some(parse_bytes(text, magnitude)?),
            raw: Some(trimmed.to_string()),
            negative,
        })
    }

    /// Byte count; zero when unset.
    pub fn value(&self) -> u64 {
        self.value.unwrap_or(0)
    }

    pub fn is_unset(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }
}

fn parse_bytes(input: &str, text: &str) -> Result<u64, SizeError> {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    if number.is_empty() {
        return Err(SizeError::new(input, "missing number"));
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1000,
        "ki" | "kib" => 1 << 10,
        "m" | "mb" => 1000u64.pow(2),
        "mi" | "mib" => 1 << 20,
        "g" | "gb" => 1000u64.pow(3),
        "gi" | "gib" => 1 << 30,
        "t" | "tb" => 1000u64.pow(4),
        "ti" | "tib" => 1 << 40,
        "p" | "pb" => 1000u64.pow(5),
        "pi" | "pib" => 1 << 50,
        "e" | "eb" => 1000u64.pow(6),
        "ei" | "eib" => 1 << 60,
        other => return Err(SizeError::new(input, format!("unknown unit {other:?}"))),
    };

    if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| SizeError::new(input, "malformed number"))?;
        let bytes = (value * multiplier as f64).floor();
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(SizeError::new(input, "size overflows 64 bits"));
        }
        return Ok(bytes as u64);
    }

    number
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(multiplier))
        .ok_or_else(|| SizeError::new(input, "size overflows 64 bits"))
}

impl PartialEq for ByteSize {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.negative == other.negative
    }
}

impl Eq for ByteSize {}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            None => f.write_str("ByteSize(unset)"),
            Some(v) => write!(f, "ByteSize({}{v})", if self.negative { "-" } else { "" }),
        }
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.raw, self.value) {
            (Some(raw), _) => f.write_str(raw),
            (None, Some(v)) if self.negative => write!(f, "-{v}"),
            (None, Some(v)) => write!(f, "{v}"),
            (None, None) => Ok(()),
        }
    }
}

impl FromStr for ByteSize {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte size such as 1073741824, \"10GiB\" or \"-5GB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                Ok(ByteSize::new(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                if v < 0 {
                    Ok(ByteSize::new_negative(v.unsigned_abs()))
                } else {
                    Ok(ByteSize::new(v.unsigned_abs()))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                ByteSize::parse(v).map_err(E::custom)
            }

            fn visit_unit<E: de::Error>(self) -> Result<ByteSize, E> {
                Ok(ByteSize::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<ByteSize, E> {
                Ok(ByteSize::default())
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// A share of the disk, `0%` to `100%`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PercentageSize {
    value: u8,
}

impl PercentageSize {
    pub fn new(value: u8) -> Result<Self, SizeError> {
        if value > 100 {
            return Err(SizeError::new(
                &format!("{value}%"),
                "percentage must be between 0 and 100",
            ));
        }
        Ok(Self { value })
    }

    pub fn parse(text: &str) -> Result<Self, SizeError> {
        let number = text
            .trim()
            .strip_suffix('%')
            .ok_or_else(|| SizeError::new(text, "percentage must end with '%'"))?
            .trim();
        let value: i64 = number
            .parse()
            .map_err(|_| SizeError::new(text, "percentage must be an integer"))?;
        if !(0..=100).contains(&value) {
            return Err(SizeError::new(text, "percentage must be between 0 and 100"));
        }
        Ok(Self { value: value as u8 })
    }

    pub fn value(&self) -> u64 {
        u64::from(self.value)
    }

    /// The share of `total` this percentage represents.
    pub fn of(&self, total: u64) -> u64 {
        ((u128::from(total) * u128::from(self.value)) / 100) as u64
    }
}

impl fmt::Debug for PercentageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PercentageSize({}%)", self.value)
    }
}

impl fmt::Display for PercentageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.value)
    }
}

impl FromStr for PercentageSize {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PercentageSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PercentageSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(de::Error::custom)
    }
}

/// Either an absolute [`ByteSize`] or a [`PercentageSize`].
#[derive(Clone, PartialEq, Eq)]
pub enum Size {
    Bytes(ByteSize),
    Percentage(PercentageSize),
}

impl Default for Size {
    fn default() -> Self {
        Size::Bytes(ByteSize::default())
    }
}

impl Size {
    pub fn parse(text: &str) -> Result<Self, SizeError> {
        if text.trim().ends_with('%') {
            PercentageSize::parse(text).map(Size::Percentage)
        } else {
            ByteSize::parse(text).map(Size::Bytes)
        }
    }

    /// Absolute byte count; zero when relative or unset.
    pub fn value(&self) -> u64 {
        match self {
            Size::Bytes(bytes) => bytes.value(),
            Size::Percentage(_) => 0,
        }
    }

    /// Percentage; zero when absolute.
    pub fn relative_value(&self) -> u64 {
        match self {
            Size::Bytes(_) => 0,
            Size::Percentage(p) => p.value(),
        }
    }

    pub fn is_relative(&self) -> bool {
        matches!(self, Size::Percentage(_))
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Size::Bytes(bytes) if bytes.is_negative())
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Size::Bytes(bytes) if bytes.is_unset())
    }
}

impl From<ByteSize> for Size {
    fn from(bytes: ByteSize) -> Self {
        Size::Bytes(bytes)
    }
}

impl From<PercentageSize> for Size {
    fn from(p: PercentageSize) -> Self {
        Size::Percentage(p)
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Bytes(bytes) => bytes.fmt(f),
            Size::Percentage(p) => p.fmt(f),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Bytes(bytes) => fmt::Display::fmt(bytes, f),
            Size::Percentage(p) => fmt::Display::fmt(p, f),
        }
    }
}

impl FromStr for Size {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Size::Bytes(bytes) => bytes.serialize(serializer),
            Size::Percentage(p) => p.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = Size;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte size or a percentage such as \"80%\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Size, E> {
                Ok(Size::Bytes(ByteSize::new(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Size, E> {
                if v < 0 {
                    Ok(Size::Bytes(ByteSize::new_negative(v.unsigned_abs())))
                } else {
                    Ok(Size::Bytes(ByteSize::new(v.unsigned_abs())))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Size, E> {
                Size::parse(v).map_err(E::custom)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Size, E> {
                Ok(Size::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Size, E> {
                Ok(Size::default())
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_iec_and_si_suffixes() {
        for (text, expected) in [
            ("1048576", 1_048_576),
            ("1GB", 1_000_000_000),
            ("2GB", 2_000_000_000),
            ("50GiB", 53_687_091_200),
            ("100 MiB", 104_857_600),
            ("1.5KiB", 1536),
            ("10kb", 10_000),
            ("3ti", 3 << 40),
            ("0", 0),
        ] {
            assert_eq!(ByteSize::parse(text).unwrap().value(), expected, "{text}");
        }
    }

    #[test]
    fn zero_is_distinct_from_unset() {
        let zero = ByteSize::parse("0").unwrap();
        let unset = ByteSize::parse("").unwrap();
        assert!(!zero.is_unset());
        assert!(unset.is_unset());
        assert_ne!(zero, unset);
        assert_eq!(zero.value(), unset.value());
    }

    #[test]
    fn negative_sizes_keep_magnitude() {
        let size = ByteSize::parse("-10GiB").unwrap();
        assert!(size.is_negative());
        assert_eq!(size.value(), 10 << 30);
        assert_eq!(size.to_string(), "-10GiB");
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(ByteSize::parse("GiB").is_err());
        assert!(ByteSize::parse("10 parsecs").is_err());
        assert!(ByteSize::parse("99999999999EiB").is_err());
        assert!(PercentageSize::parse("101%").is_err());
        assert!(PercentageSize::parse("-1%").is_err());
        assert!(PercentageSize::parse("50").is_err());
        assert!(Size::parse("150%").is_err());
    }

    #[test]
    fn size_union_accessors() {
        let relative = Size::parse("80%").unwrap();
        assert!(relative.is_relative());
        assert_eq!(relative.relative_value(), 80);
        assert_eq!(relative.value(), 0);

        let absolute = Size::parse("2GiB").unwrap();
        assert_eq!(absolute.value(), 2 << 30);
        assert_eq!(absolute.relative_value(), 0);
        assert!(Size::default().is_unset());

        assert_eq!(PercentageSize::parse("25%").unwrap().of(1000), 250);
    }

    #[test]
    fn deserializes_numbers_and_strings() {
        let from_int: ByteSize = serde_yaml::from_str("1073741824").unwrap();
        let from_text: ByteSize = serde_yaml::from_str("\"1GiB\"").unwrap();
        assert_eq!(from_int, from_text);

        let size: Size = serde_yaml::from_str("80%").unwrap();
        assert_eq!(size.relative_value(), 80);
        assert_eq!(serde_yaml::to_string(&size).unwrap().trim(), "80%");
    }

    fn unit() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec!["", "B", "KB", "KiB", "MB", "MiB", "GB", "GiB", "TiB", " MiB"])
    }

    proptest! {
        #[test]
        fn byte_size_round_trips(value in 0u64..1_000_000, unit in unit(), negative in any::<bool>()) {
            let text = format!("{}{value}{unit}", if negative { "-" } else { "" });
            let parsed = ByteSize::parse(&text).unwrap();
            prop_assert_eq!(ByteSize::parse(&parsed.to_string()).unwrap(), parsed.clone());

            let plain = if negative { ByteSize::new_negative(parsed.value()) } else { ByteSize::new(parsed.value()) };
            prop_assert_eq!(ByteSize::parse(&plain.to_string()).unwrap(), plain);
        }

        #[test]
        fn size_round_trips(percent in 0u8..=100, bytes in any::<u64>(), relative in any::<bool>()) {
            let size = if relative {
                Size::Percentage(PercentageSize::new(percent).unwrap())
            } else {
                Size::Bytes(ByteSize::new(bytes))
            };
            prop_assert_eq!(Size::parse(&size.to_string()).unwrap(), size);
        }
    }
}
