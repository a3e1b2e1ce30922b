//! Human-readable size parsing (e.g., "64MB", "1GB").

use thiserror::Error;

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '64MB', '1GB', or '4096KB'")]
pub struct SizeParseError {
    input: String,
}

const KB: usize = 1024;
const MB: usize = KB * 1024;
const GB: usize = MB * 1024;

/// Suffixes checked longest first so "MB" wins over "B".
const UNITS: [(&str, usize); 7] = [
    ("GB", GB),
    ("MB", MB),
    ("KB", KB),
    ("G", GB),
    ("M", MB),
    ("K", KB),
    ("B", 1),
];

/// Parse a human-readable size string into bytes.
///
/// Bare numbers are bytes; `K`/`KB`, `M`/`MB` and `G`/`GB` suffixes are
/// binary multiples. Case and surrounding whitespace are ignored.
///
/// # Examples
///
/// ```
/// use tileproxy::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("64 MB").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<usize, SizeParseError> {
    let err = || SizeParseError {
        input: s.to_string(),
    };
    let upper = s.trim().to_uppercase();

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((upper.as_str(), 1));

    let value: usize = number.trim().parse().map_err(|_| err())?;
    value.checked_mul(multiplier).ok_or_else(err)
}

/// Format a byte count with the largest unit that divides it exactly.
///
/// # Examples
///
/// ```
/// use tileproxy::config::format_size;
///
/// assert_eq!(format_size(64 * 1024 * 1024), "64MB");
/// assert_eq!(format_size(1500), "1500");
/// ```
pub fn format_size(bytes: usize) -> String {
    for (suffix, unit) in [("GB", GB), ("MB", MB), ("KB", KB)] {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("12B").unwrap(), 12);
        assert_eq!(parse_size("2k").unwrap(), 2048);
        assert_eq!(parse_size(" 3 MB ").unwrap(), 3 * MB);
        assert_eq!(parse_size("1GB").unwrap(), GB);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("1.5GB").is_err());
        assert!(parse_size("-1MB").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size(&format!("{}GB", usize::MAX)).is_err());
    }

    #[test]
    fn test_format_picks_largest_exact_unit() {
        assert_eq!(format_size(GB), "1GB");
        assert_eq!(format_size(3 * MB), "3MB");
        assert_eq!(format_size(KB + 1), "1025");
        assert_eq!(format_size(0), "0");
    }

    #[test]
    fn test_format_then_parse() {
        for bytes in [MB, 64 * MB, 5 * KB, 999] {
            assert_eq!(parse_size(&format_size(bytes)).unwrap(), bytes);
        }
    }
}
