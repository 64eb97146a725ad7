use anyhow::{bail, Context};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use serde::Serialize;

use std::{
    fmt::{Debug, Display},
    iter::Sum,
    ops::{Add, AddAssign},
    str::FromStr,
};

/// Represents an amount of money in Algerian dinars.
///
/// The amount is stored internally as an integer number of centimes, so sums
/// of many small amounts never drift. The [`Display`] implementation formats
/// it the way the dashboard shows money: thousands grouped with commas,
/// fraction digits only when there are some, and a `DZD` suffix.
///
/// ```
/// # use gymstats::Dzd;
/// assert_eq!(Dzd::from_dinars(1500).to_string(), "1,500 DZD");
/// assert_eq!(Dzd::from_centimes(150_050).to_string(), "1,500.5 DZD");
/// ```
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(into = "f64")]
pub struct Dzd(i64);

impl Dzd {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_centimes(centimes: i64) -> Self {
        Self(centimes)
    }

    #[must_use]
    pub const fn from_dinars(dinars: i64) -> Self {
        Self(dinars * 100)
    }

    /// Converts a floating point amount of dinars, as stored in `REAL`
    /// columns, rounding to the nearest centime.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(dinars: f64) -> Self {
        Self((dinars * 100.0).round() as i64)
    }

    #[must_use]
    pub const fn centimes(self) -> i64 {
        self.0
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Decodes an owned SQL value. `NULL` is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is text or a blob.
    pub fn from_value(value: &Value) -> FromSqlResult<Self> {
        Self::column_result(ValueRef::from(value))
    }
}

impl Debug for Dzd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Dzd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let centimes = self.0.unsigned_abs();
        let digits = (centimes / 100).to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        let fraction = match centimes % 100 {
            0 => String::new(),
            c if c % 10 == 0 => format!(".{}", c / 10),
            c => format!(".{c:02}"),
        };
        f.pad(&format!("{sign}{grouped}{fraction} DZD"))
    }
}

impl FromStr for Dzd {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let cleaned = s.trim().trim_end_matches("DZD").trim().replace(',', "");
        let (negative, unsigned) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };
        let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if fraction.len() > 2 {
            bail!("{s:?}: more than two fraction digits");
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            bail!("{s:?}: expected digits");
        }
        let dinars: i64 = whole
            .parse()
            .with_context(|| format!("{s:?}: bad amount"))?;
        let centimes: i64 = if fraction.is_empty() {
            0
        } else {
            format!("{fraction:0<2}")
                .parse()
                .with_context(|| format!("{s:?}: bad fraction"))?
        };
        let amount = dinars * 100 + centimes;
        Ok(Self(if negative { -amount } else { amount }))
    }
}

impl FromSql for Dzd {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Self::ZERO),
            ValueRef::Integer(dinars) => Ok(Self::from_dinars(dinars)),
            ValueRef::Real(dinars) => Ok(Self::from_f64(dinars)),
            ValueRef::Text(_) | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

impl From<Dzd> for f64 {
    fn from(value: Dzd) -> Self {
        value.as_f64()
    }
}

impl Add for Dzd {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Dzd {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Dzd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_groups_thousands_and_drops_zero_fraction() {
        assert_eq!(Dzd::from_dinars(0).to_string(), "0 DZD");
        assert_eq!(Dzd::from_dinars(999).to_string(), "999 DZD");
        assert_eq!(Dzd::from_dinars(1_234_567).to_string(), "1,234,567 DZD");
        assert_eq!(Dzd::from_centimes(-150_025).to_string(), "-1,500.25 DZD");
    }

    #[test]
    fn display_respects_width() {
        assert_eq!(format!("{:>10}", Dzd::from_dinars(5)), "     5 DZD");
    }

    #[test]
    fn from_str_fn_parses_grouped_amounts() {
        assert_eq!(Dzd::from_str("1,500").unwrap(), Dzd::from_dinars(1500));
        assert_eq!(
            Dzd::from_str("1,500.5 DZD").unwrap(),
            Dzd::from_centimes(150_050)
        );
        assert_eq!(Dzd::from_str("-3.07").unwrap(), Dzd::from_centimes(-307));
    }

    #[test]
    fn from_str_fn_rejects_bad_amounts() {
        assert!(Dzd::from_str("12.345").is_err());
        assert!(Dzd::from_str("twelve").is_err());
    }

    #[test]
    fn from_str_fn_rejects_signs_inside_amount() {
        assert!(Dzd::from_str("1.-5").is_err());
        assert!(Dzd::from_str("1.+5").is_err());
        assert!(Dzd::from_str("+1").is_err());
        assert!(Dzd::from_str("--1").is_err());
    }

    #[test]
    fn from_value_fn_treats_null_as_zero() {
        assert_eq!(Dzd::from_value(&Value::Null).unwrap(), Dzd::ZERO);
        assert_eq!(
            Dzd::from_value(&Value::Real(10.25)).unwrap(),
            Dzd::from_centimes(1025)
        );
        assert_eq!(
            Dzd::from_value(&Value::Integer(7)).unwrap(),
            Dzd::from_dinars(7)
        );
        assert!(Dzd::from_value(&Value::Text("7".into())).is_err());
    }

    #[test]
    fn sum_fn_adds_amounts() {
        let total: Dzd = [Dzd::from_dinars(1), Dzd::from_centimes(50)]
            .into_iter()
            .sum();
        assert_eq!(total, Dzd::from_centimes(150));
    }
}
