//! Partition size specifications
//!
//! Sizes are kept in MiB throughout the plan; `parted` is driven with MiB
//! offsets so partitions stay 1 MiB aligned.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const KIB_PER_MIB: f64 = 1024.0;
const MIB_PER_GIB: u64 = 1024;
const MIB_PER_TIB: u64 = 1024 * 1024;

/// Largest size accepted from text: 1 EiB
pub const MAX_SIZE_MIB: u64 = 1024 * MIB_PER_TIB;

/// Requested size of one partition, before offsets are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeSpec {
    /// Fixed size in MiB
    Mib(u64),
    /// Percentage of the whole disk
    Percent(u8),
    /// Everything left after the preceding partitions
    Remainder,
}

impl SizeSpec {
    /// Resolve to MiB given the disk size
    ///
    /// Returns `None` for [`SizeSpec::Remainder`], which has no fixed size.
    pub fn resolve(&self, disk_mib: u64) -> Option<u64> {
        match self {
            Self::Mib(mib) => Some(*mib),
            Self::Percent(pct) => {
                let pct = u64::from(*pct);
                Some(disk_mib / 100 * pct + disk_mib % 100 * pct / 100)
            }
            Self::Remainder => None,
        }
    }

    pub fn is_remainder(&self) -> bool {
        matches!(self, Self::Remainder)
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mib(mib) => f.write_str(&format_mib(*mib)),
            Self::Percent(pct) => write!(f, "{pct}%"),
            Self::Remainder => f.write_str("rest"),
        }
    }
}

impl FromStr for SizeSpec {
    type Err = String;

    /// Parse `512MiB`, `4GiB`, `1.5G`, `25%`, `rest`
    ///
    /// Bare numbers are MiB. Suffixes are case-insensitive and binary
    /// (`G`, `GB` and `GiB` all mean 1024 MiB).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty size string".to_string());
        }

        let lower = s.to_ascii_lowercase();
        if matches!(lower.as_str(), "rest" | "remainder" | "100%") {
            return Ok(Self::Remainder);
        }

        if let Some(pct) = lower.strip_suffix('%') {
            let pct: u8 = pct
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage: '{s}'"))?;
            if pct == 0 || pct > 100 {
                return Err(format!("percentage must be between 1 and 100: '{s}'"));
            }
            return Ok(Self::Percent(pct));
        }

        parse_mib(&lower).map(Self::Mib)
    }
}

impl Serialize for SizeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a human-readable size into whole MiB
///
/// Supports suffixes K/KiB, M/MiB, G/GiB, T/TiB (with or without `B`).
pub fn parse_mib(size_str: &str) -> Result<u64, String> {
    let lower = size_str.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return Err("empty size string".to_string());
    }

    let trimmed = lower
        .strip_suffix("ib")
        .or_else(|| lower.strip_suffix('b'))
        .unwrap_or(&lower);

    let (num_str, factor) = if let Some(num) = trimmed.strip_suffix('t') {
        (num, MIB_PER_TIB as f64)
    } else if let Some(num) = trimmed.strip_suffix('g') {
        (num, MIB_PER_GIB as f64)
    } else if let Some(num) = trimmed.strip_suffix('m') {
        (num, 1.0)
    } else if let Some(num) = trimmed.strip_suffix('k') {
        (num, 1.0 / KIB_PER_MIB)
    } else {
        (trimmed, 1.0)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number in size: '{}'", size_str.trim()))?;

    if num < 0.0 {
        return Err(format!("size cannot be negative: {}", size_str.trim()));
    }

    let mib = (num * factor).round();
    if !mib.is_finite() || mib > MAX_SIZE_MIB as f64 {
        return Err(format!(
            "size too large: '{}' (at most {})",
            size_str.trim(),
            format_mib(MAX_SIZE_MIB)
        ));
    }
    let mib = mib as u64;
    if mib == 0 {
        return Err(format!("size rounds to zero MiB: '{}'", size_str.trim()));
    }
    Ok(mib)
}

/// Format MiB for display, preferring whole GiB when exact
pub fn format_mib(mib: u64) -> String {
    if mib >= MIB_PER_TIB && mib % MIB_PER_TIB == 0 {
        format!("{}TiB", mib / MIB_PER_TIB)
    } else if mib >= MIB_PER_GIB && mib % MIB_PER_GIB == 0 {
        format!("{}GiB", mib / MIB_PER_GIB)
    } else {
        format!("{mib}MiB")
    }
}

/// Convert a byte count to whole MiB, rounding down
pub fn bytes_to_mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_sizes() {
        assert_eq!("512MiB".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(512));
        assert_eq!("512".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(512));
        assert_eq!("4GiB".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(4096));
        assert_eq!("4G".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(4096));
        assert_eq!("4gb".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(4096));
        assert_eq!("1.5GiB".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(1536));
        assert_eq!("1TiB".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(1024 * 1024));
        assert_eq!("2048KiB".parse::<SizeSpec>().unwrap(), SizeSpec::Mib(2));
    }

    #[test]
    fn test_parse_relative_sizes() {
        assert_eq!("25%".parse::<SizeSpec>().unwrap(), SizeSpec::Percent(25));
        assert_eq!("rest".parse::<SizeSpec>().unwrap(), SizeSpec::Remainder);
        assert_eq!("100%".parse::<SizeSpec>().unwrap(), SizeSpec::Remainder);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<SizeSpec>().is_err());
        assert!("abc".parse::<SizeSpec>().is_err());
        assert!("GiB".parse::<SizeSpec>().is_err());
        assert!("-1GiB".parse::<SizeSpec>().is_err());
        assert!("0%".parse::<SizeSpec>().is_err());
        assert!("150%".parse::<SizeSpec>().is_err());
        assert!("1KiB".parse::<SizeSpec>().is_err());
    }

    #[test]
    fn test_parse_rejects_huge_sizes() {
        assert!(parse_mib("1e30GiB").is_err());
        assert!(parse_mib("inf").is_err());
        assert!("2048TiB".parse::<SizeSpec>().is_err());
        assert_eq!(parse_mib("1024TiB"), Ok(MAX_SIZE_MIB));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(SizeSpec::Mib(512).resolve(8192), Some(512));
        assert_eq!(SizeSpec::Percent(25).resolve(8192), Some(2048));
        assert_eq!(SizeSpec::Remainder.resolve(8192), None);
    }

    #[test]
    fn test_format_mib() {
        assert_eq!(format_mib(512), "512MiB");
        assert_eq!(format_mib(4096), "4GiB");
        assert_eq!(format_mib(4609), "4609MiB");
        assert_eq!(format_mib(1024 * 1024), "1TiB");
    }

    #[test]
    fn test_serde_uses_strings() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            size: SizeSpec,
        }

        let parsed: Wrapper = toml::from_str("size = \"4GiB\"").unwrap();
        assert_eq!(parsed.size, SizeSpec::Mib(4096));
        let out = toml::to_string(&parsed).unwrap();
        assert!(out.contains("size = \"4GiB\""));
    }
}
