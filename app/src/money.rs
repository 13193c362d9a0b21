use std::convert::TryFrom;
use std::fmt;
use std::iter::Sum;
use std::num::ParseFloatError;
use std::ops::{Add, Mul};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Share of revenue booked as profit on the admin dashboards.
const PROFIT_PERCENT: i64 = 5;

/// A currency amount in minor units (cents).
///
/// Persisted as a decimal number (`129.99`) so stored documents keep their
/// numeric `price` and `total` fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub fn from_major(amount: f64) -> Self {
        if !amount.is_finite() {
            return Money::ZERO;
        }
        Money((amount * 100.0).round() as i64)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn to_major(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// The fixed 5% margin, rounded half-up to the cent.
    pub fn profit(self) -> Money {
        Money((self.0 * PROFIT_PERCENT + 50).div_euclid(100))
    }

    /// `R129.99`
    pub fn currency(self) -> String {
        format!("R{}", self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(fmt, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Parses a decimal amount, with or without a leading `R`.
impl FromStr for Money {
    type Err = ParseFloatError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('R').unwrap_or(s);
        s.trim().parse::<f64>().map(Money::from_major)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl Mul<u32> for Money {
    type Output = Money;
    fn mul(self, qty: u32) -> Money {
        Money(self.0 * i64::from(qty))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MoneyVisitor;
        impl<'vi> de::Visitor<'vi> for MoneyVisitor {
            type Value = Money;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a currency amount")
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Money, E> {
                let cents = (value * 100.0).round();
                if !cents.is_finite() || cents.abs() >= i64::MAX as f64 {
                    return Err(E::custom(format!("amount {} is out of range", value)));
                }
                Ok(Money(cents as i64))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Money, E> {
                value
                    .checked_mul(100)
                    .map(Money)
                    .ok_or_else(|| E::custom(format!("amount {} is out of range", value)))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Money, E> {
                i64::try_from(value)
                    .ok()
                    .and_then(|v| v.checked_mul(100))
                    .map(Money)
                    .ok_or_else(|| E::custom(format!("amount {} is out of range", value)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Money, E> {
                value
                    .trim()
                    .parse::<f64>()
                    .map(Money::from_major)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MoneyVisitor)
    }
}
