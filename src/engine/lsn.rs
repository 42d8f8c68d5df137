//! Write-ahead log positions.
//!
//! The engine reports positions as two hex halves, `XXXXXXXX/YYYYYYYY`.
//! Lag is the byte distance between two positions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::EngineError;

/// A 64-bit WAL position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    /// Bytes `self` trails `ahead` by; zero if `self` is not behind.
    pub fn bytes_behind(self, ahead: Lsn) -> u64 {
        ahead.0.saturating_sub(self.0)
    }

    /// Advance by `bytes`.
    pub fn advance(self, bytes: u64) -> Lsn {
        Lsn(self.0.saturating_add(bytes))
    }
}

impl FromStr for Lsn {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| EngineError::protocol(format!("malformed LSN: {}", s)))?;
        let hi = u32::from_str_radix(hi, 16)
            .map_err(|_| EngineError::protocol(format!("malformed LSN: {}", s)))?;
        let lo = u32::from_str_radix(lo, 16)
            .map_err(|_| EngineError::protocol(format!("malformed LSN: {}", s)))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

impl From<Lsn> for String {
    fn from(lsn: Lsn) -> Self {
        lsn.to_string()
    }
}

impl TryFrom<String> for Lsn {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_engine_format() {
        let lsn: Lsn = "16/B374D848".parse().unwrap();
        assert_eq!(lsn.0, (0x16u64 << 32) | 0xB374_D848);
        assert_eq!(lsn.to_string(), "16/B374D848");
    }

    #[test]
    fn test_zero() {
        let lsn: Lsn = "0/0".parse().unwrap();
        assert_eq!(lsn, Lsn::ZERO);
    }

    #[test]
    fn test_lag_across_segment_boundary() {
        let replica: Lsn = "0/FFFFFF00".parse().unwrap();
        let primary: Lsn = "1/00000100".parse().unwrap();
        assert_eq!(replica.bytes_behind(primary), 0x200);
    }

    #[test]
    fn test_lag_saturates_when_ahead() {
        let replica = Lsn(500);
        let primary = Lsn(100);
        assert_eq!(replica.bytes_behind(primary), 0);
    }

    #[test]
    fn test_malformed() {
        assert!("garbage".parse::<Lsn>().is_err());
        assert!("1/ZZ".parse::<Lsn>().is_err());
    }

    #[test]
    fn test_serde_text_form() {
        let json = serde_json::to_string(&Lsn(0x1_0000_0010)).unwrap();
        assert_eq!(json, "\"1/10\"");
        let back: Lsn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Lsn(0x1_0000_0010));
    }
}
