//! Unit conversion helpers
//!
//! The ledger reports every amount as a winston string (the smallest unit,
//! 10^-12 AR) so clients without arbitrary-precision arithmetic can still
//! interoperate. These helpers turn those strings into human units.

use thiserror::Error;

/// Number of winston in one AR
pub const WINSTON_PER_AR: u128 = 1_000_000_000_000;

/// Number of decimal places between winston and AR
const AR_DECIMALS: usize = 12;

/// Unit conversion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("Not a winston amount: {0:?}")]
    InvalidWinston(String),

    #[error("Not a valid AR amount: {0}")]
    InvalidAr(String),
}

/// Convert a winston string into an exact decimal AR string.
///
/// `"1000000000000"` becomes `"1.000000000000"` and `"1"` becomes
/// `"0.000000000001"`.
pub fn winston_to_ar_string(winston: &str) -> Result<String, UnitError> {
    let winston = winston.trim();
    if winston.is_empty() || !winston.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitError::InvalidWinston(winston.to_string()));
    }

    if winston.len() > AR_DECIMALS {
        let split = winston.len() - AR_DECIMALS;
        Ok(format!("{}.{}", &winston[..split], &winston[split..]))
    } else {
        Ok(format!("0.{:0>width$}", winston, width = AR_DECIMALS))
    }
}

/// Convert a winston string into AR.
pub fn winston_to_ar(winston: &str) -> Result<f64, UnitError> {
    let decimal = winston_to_ar_string(winston)?;
    decimal
        .parse::<f64>()
        .map_err(|_| UnitError::InvalidWinston(winston.to_string()))
}

/// Convert AR into winston, rounding to the nearest whole winston.
pub fn ar_to_winston(ar: f64) -> Result<u128, UnitError> {
    if !ar.is_finite() || ar < 0.0 {
        return Err(UnitError::InvalidAr(ar.to_string()));
    }
    Ok((ar * WINSTON_PER_AR as f64).round() as u128)
}

/// Parse a winston string into an integer amount.
pub fn parse_winston(winston: &str) -> Result<u128, UnitError> {
    winston
        .trim()
        .parse::<u128>()
        .map_err(|_| UnitError::InvalidWinston(winston.to_string()))
}

/// Format a byte count with decimal (SI) suffixes, e.g. `1.2 MB`.
pub fn natural_size(bytes: u64) -> String {
    const SUFFIXES: [&str; 8] = ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

    if bytes == 1 {
        return "1 Byte".to_string();
    }
    if bytes < 1000 {
        return format!("{} Bytes", bytes);
    }

    let mut value = bytes as f64 / 1000.0;
    let mut suffix = SUFFIXES[0];
    for next in &SUFFIXES[1..] {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        suffix = next;
    }
    format!("{:.1} {}", value, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_ar() {
        assert_eq!(winston_to_ar("1000000000000").unwrap(), 1.0);
        assert_eq!(winston_to_ar_string("1000000000000").unwrap(), "1.000000000000");
    }

    #[test]
    fn test_one_winston() {
        assert_eq!(winston_to_ar("1").unwrap(), 0.000000000001);
        assert_eq!(winston_to_ar_string("1").unwrap(), "0.000000000001");
    }

    #[test]
    fn test_zero() {
        assert_eq!(winston_to_ar("0").unwrap(), 0.0);
    }

    #[test]
    fn test_round_trip() {
        for winston in ["1", "999", "123456789", "1000000000000", "4503599627370"] {
            let ar = winston_to_ar(winston).unwrap();
            let back = ar_to_winston(ar).unwrap();
            let expected: u128 = winston.parse().unwrap();
            assert!(back.abs_diff(expected) <= 1, "{} -> {} -> {}", winston, ar, back);
        }
    }

    #[test]
    fn test_rejects_non_digits() {
        assert!(winston_to_ar("").is_err());
        assert!(winston_to_ar("12a").is_err());
        assert!(winston_to_ar("-5").is_err());
        assert!(ar_to_winston(-1.0).is_err());
        assert!(ar_to_winston(f64::NAN).is_err());
    }

    #[test]
    fn test_natural_size() {
        assert_eq!(natural_size(1), "1 Byte");
        assert_eq!(natural_size(999), "999 Bytes");
        assert_eq!(natural_size(1000), "1.0 kB");
        assert_eq!(natural_size(1_234_235), "1.2 MB");
        assert_eq!(natural_size(3_000_000_000), "3.0 GB");
    }
}
