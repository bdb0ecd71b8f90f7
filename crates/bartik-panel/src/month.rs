//! Calendar-month keys.
//!
//! `MonthId` is the only time key the engine accepts: a validated
//! (year, month) pair stored as a monotonic month count, so ordering and
//! horizon arithmetic are plain integer operations. Free-form date strings
//! never enter the panel layer.

use crate::error::{Result, SchemaError};
use chrono::{Datelike, NaiveDate};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};

/// A calendar month, stored as months since 0000-01.
///
/// Ordered and hashable, so it can serve directly as half of a panel key.
/// Horizon arithmetic is integer addition: `m + 3` is three months later.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MonthId(i32);

impl MonthId {
    /// Create a month key from a calendar (year, month) pair.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidMonth`] when `month` is outside 1..=12.
    pub const fn from_ym(year: i32, month: u32) -> Result<Self> {
        if month < 1 || month > 12 {
            return Err(SchemaError::InvalidMonth { year, month });
        }
        Ok(Self(year * 12 + month as i32 - 1))
    }

    /// The month containing a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() * 12 + date.month() as i32 - 1)
    }

    /// The raw month index (months since 0000-01).
    pub const fn index(self) -> i32 {
        self.0
    }

    /// Calendar year.
    pub const fn year(self) -> i32 {
        self.0.div_euclid(12)
    }

    /// Calendar month, 1..=12.
    pub const fn month(self) -> u32 {
        (self.0.rem_euclid(12) + 1) as u32
    }

    /// The first day of this month as a calendar date.
    pub fn first_day(self) -> NaiveDate {
        // year/month are in range by construction
        NaiveDate::from_ymd_opt(self.year(), self.month(), 1).unwrap_or_default()
    }

    /// Parse a `YYYY-MM` string.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidMonth`] when the string does not parse
    /// or the month component is out of range.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || SchemaError::InvalidMonth { year: 0, month: 0 };
        let (y, m) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        Self::from_ym(year, month)
    }
}

impl std::ops::Add<i32> for MonthId {
    type Output = Self;

    fn add(self, months: i32) -> Self {
        Self(self.0 + months)
    }
}

impl std::ops::Sub<i32> for MonthId {
    type Output = Self;

    fn sub(self, months: i32) -> Self {
        Self(self.0 - months)
    }
}

impl std::ops::Sub for MonthId {
    type Output = i32;

    /// Signed distance in months.
    fn sub(self, other: Self) -> i32 {
        self.0 - other.0
    }
}

impl std::fmt::Display for MonthId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ym_roundtrip() {
        let m = MonthId::from_ym(2020, 3).unwrap();
        assert_eq!(m.year(), 2020);
        assert_eq!(m.month(), 3);
        assert_eq!(m.to_string(), "2020-03");
    }

    #[test]
    fn test_invalid_month_rejected() {
        assert!(MonthId::from_ym(2020, 0).is_err());
        assert!(MonthId::from_ym(2020, 13).is_err());
    }

    #[test]
    fn test_arithmetic_crosses_year_boundary() {
        let m = MonthId::from_ym(2019, 11).unwrap();
        let later = m + 3;
        assert_eq!(later.year(), 2020);
        assert_eq!(later.month(), 2);
        assert_eq!(later - m, 3);
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = MonthId::from_ym(2019, 12).unwrap();
        let b = MonthId::from_ym(2020, 1).unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_parse() {
        let m = MonthId::parse("2021-07").unwrap();
        assert_eq!(m, MonthId::from_ym(2021, 7).unwrap());
        assert!(MonthId::parse("2021/07").is_err());
        assert!(MonthId::parse("2021-00").is_err());
    }

    #[test]
    fn test_from_date() {
        let d = NaiveDate::from_ymd_opt(2020, 6, 17).unwrap();
        assert_eq!(MonthId::from_date(d), MonthId::from_ym(2020, 6).unwrap());
    }
}
