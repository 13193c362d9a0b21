use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, TimeZone, Utc};
use err_derive::Error;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A numeric identifier tagged with the kind of record it names.
///
/// Values are milliseconds since the epoch at generation time, bumped forward
/// when two identifiers are requested inside the same millisecond. Zero is
/// reserved to mean "not yet assigned".
pub struct Id<T> {
    val: u64,
    phantom: PhantomData<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    #[error(display = "Invalid prefix")]
    InvalidPrefix,
    #[error(display = "Unparseable Id")]
    Unparseable,
}

pub trait Entity {
    const PREFIX: &'static str;
}

const DIVIDER: &str = "-";

impl<T> Id<T> {
    pub const fn from_raw(val: u64) -> Self {
        Id {
            val,
            phantom: PhantomData,
        }
    }

    pub fn value(&self) -> u64 {
        self.val
    }

    pub fn is_unset(&self) -> bool {
        self.val == 0
    }

    /// The instant this identifier was minted, assuming it came from an
    /// [`IdGen`]. Bumped identifiers drift forward by a millisecond each.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.val as i64).single()
    }

    pub fn typed<U>(self) -> Id<U> {
        Id::from_raw(self.val)
    }
}

/// Hands out strictly increasing, time-derived identifiers.
#[derive(Debug, Default)]
pub struct IdGen {
    last: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        IdGen::default()
    }

    pub fn generate<T>(&self) -> Id<T> {
        self.generate_at(Utc::now())
    }

    pub fn generate_at<T>(&self, now: DateTime<Utc>) -> Id<T> {
        let stamp = now.timestamp_millis().max(1) as u64;
        let mut prev = self.last.load(AtomicOrdering::SeqCst);
        loop {
            let next = if stamp > prev { stamp } else { prev + 1 };
            match self.last.compare_exchange(
                prev,
                next,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => return Id::from_raw(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.val)
    }
}

impl<T: Entity> fmt::Debug for Id<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}{}", T::PREFIX, DIVIDER, self.val)
    }
}

/// Accepts either the bare number or the `prefix-number` form used in logs.
impl<T: Entity> std::str::FromStr for Id<T> {
    type Err = IdParseError;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let digits = match src.find(DIVIDER) {
            None => src,
            Some(pos) => {
                let (start, remainder) = src.split_at(pos);
                if start != T::PREFIX {
                    return Err(IdParseError::InvalidPrefix);
                }
                &remainder[DIVIDER.len()..]
            }
        };
        let val = digits
            .parse::<u64>()
            .map_err(|_| IdParseError::Unparseable)?;
        if val == 0 {
            return Err(IdParseError::Unparseable);
        }
        Ok(Id::from_raw(val))
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Id::from_raw(0)
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.val == other.val
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.val.hash(state)
    }
}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.val.cmp(&other.val)
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.val)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor<T>(PhantomData<T>);
        impl<'vi, T> de::Visitor<'vi> for IdVisitor<T> {
            type Value = Id<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a numeric Id")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Id<T>, E> {
                Ok(Id::from_raw(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Id<T>, E> {
                if value < 0 {
                    return Err(E::custom("negative Id"));
                }
                Ok(Id::from_raw(value as u64))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Id<T>, E> {
                if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
                    return Err(E::custom("non-integral Id"));
                }
                Ok(Id::from_raw(value as u64))
            }
        }

        deserializer.deserialize_u64(IdVisitor(PhantomData))
    }
}
