//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

/// Litoshis per LTC.
pub const SATS_PER_LTC: u64 = 100_000_000;

/// Format a litoshi amount as human-readable LTC.
///
/// Integer arithmetic only, so no floating-point rounding.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_ltc(50_000_000), "0.50000000 LTC");
/// assert_eq!(format_ltc(123_456_789_012), "1,234.56789012 LTC");
/// ```
pub fn format_ltc(sats: u64) -> String {
    let whole = sats / SATS_PER_LTC;
    let frac = sats % SATS_PER_LTC;

    // Add commas
    let whole_str = whole.to_string();
    let mut grouped = String::with_capacity(whole_str.len() + whole_str.len() / 3);
    for (i, c) in whole_str.chars().enumerate() {
        if i > 0 && (whole_str.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}.{:08} LTC", grouped, frac)
}

/// Truncate a string to a maximum length, keeping both ends.
///
/// Useful for logging long addresses and txids.
pub fn truncate_middle(s: &str, max_len: usize) -> String {
    if s.len() <= max_len || max_len < 5 || !s.is_ascii() {
        s.to_string()
    } else {
        let half = (max_len - 3) / 2;
        format!("{}...{}", &s[..half], &s[s.len() - half..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ltc() {
        assert_eq!(format_ltc(0), "0.00000000 LTC");
        assert_eq!(format_ltc(1), "0.00000001 LTC");
        assert_eq!(format_ltc(50_000_000), "0.50000000 LTC");
        assert_eq!(format_ltc(100_000_000), "1.00000000 LTC");
        assert_eq!(format_ltc(123_456_789_012), "1,234.56789012 LTC");
        assert_eq!(format_ltc(100_000_000_000_000), "1,000,000.00000000 LTC");
    }

    #[test]
    fn test_truncate_middle() {
        assert_eq!(truncate_middle("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_middle("abcdefghijklmnop", 10), "abc...nop");
        assert_eq!(truncate_middle("abcdef", 3), "abcdef");
    }
}
