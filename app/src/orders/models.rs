use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use err_derive::Error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use infra::ids::{Entity, Id, IdGen};

use super::status::PinError;
use crate::menu::Category;
use crate::money::Money;

pub const UNKNOWN_EMAIL: &str = "unknown@email.com";
const CODE_PREFIX: &str = "MNT";
const PIN_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Id<Order>,
    pub order_id: OrderCode,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<OrderLine>,
    pub total: Money,
    pub user_email: String,
    pub pin: Pin,
    pub status: OrderStatus,
}

/// A cart line frozen into an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub name: String,
    pub price: Money,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub category: Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(display = "unknown status: {:?}", _0)]
pub struct UnknownStatus(pub String);

/// Human-facing order code, `MNT<YYYYMMDD>-<nnnn>`. Not unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderCode(String);

/// The six digit collection code shown to the customer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

fn one() -> u32 {
    1
}

impl Order {
    /// A fresh `pending` order for `items`. The id is left unset for the
    /// store to assign.
    pub fn place<R: Rng>(
        now: DateTime<Utc>,
        user_email: &str,
        items: Vec<OrderLine>,
        rng: &mut R,
    ) -> Self {
        let total = items.iter().map(OrderLine::subtotal).sum();
        Order {
            id: Id::default(),
            order_id: OrderCode::generate(now, rng),
            timestamp: now,
            items,
            total,
            user_email: user_email.to_string(),
            pin: Pin::generate(rng),
            status: OrderStatus::Pending,
        }
    }

    pub fn profit(&self) -> Money {
        self.total.profit()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|l| l.quantity).sum()
    }
}

impl Entity for Order {
    const PREFIX: &'static str = "order";
}

impl OrderLine {
    pub fn subtotal(&self) -> Money {
        self.price * self.quantity
    }
}

/// The fields [`normalize`] had to fill in, by their stored names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repairs(Vec<&'static str>);

impl Repairs {
    fn note(&mut self, field: &'static str) {
        self.0.push(field);
    }

    pub fn any(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.0
    }
}

/// Turns one raw stored record into an [`Order`], filling in whatever is
/// missing. Returns `None` for entries that are not objects at all.
pub fn normalize<R: Rng>(
    raw: &Value,
    now: DateTime<Utc>,
    idgen: &IdGen,
    rng: &mut R,
) -> Option<(Order, Repairs)> {
    let obj = raw.as_object()?;
    let mut repairs = Repairs::default();

    let id = match field::<Id<Order>>(obj, "id").filter(|id| !id.is_unset()) {
        Some(id) => id,
        None => {
            repairs.note("id");
            idgen.generate_at(now)
        }
    };
    let order_id = field::<OrderCode>(obj, "orderId")
        .filter(|c| !c.0.trim().is_empty())
        .unwrap_or_else(|| {
            repairs.note("orderId");
            OrderCode::fallback(id)
        });
    let timestamp = field(obj, "timestamp").unwrap_or_else(|| {
        repairs.note("timestamp");
        now
    });
    let items = field(obj, "items").unwrap_or_else(|| {
        repairs.note("items");
        Vec::new()
    });
    let total = field(obj, "total").unwrap_or_else(|| {
        repairs.note("total");
        Money::ZERO
    });
    let user_email = field::<String>(obj, "userEmail")
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| {
            repairs.note("userEmail");
            UNKNOWN_EMAIL.to_string()
        });
    let pin = match obj.get("pin") {
        Some(Value::String(s)) if !s.is_empty() => Pin(s.clone()),
        Some(Value::Number(n)) => Pin(n.to_string()),
        _ => {
            repairs.note("pin");
            Pin::generate(rng)
        }
    };
    let status = match obj.get("status").and_then(Value::as_str) {
        Some(s) => {
            let status = OrderStatus::lenient(s);
            if s != status.as_str() {
                repairs.note("status");
            }
            status
        }
        None => {
            repairs.note("status");
            OrderStatus::default()
        }
    };

    let order = Order {
        id,
        order_id,
        timestamp,
        items,
        total,
        user_email,
        pin,
        status,
    };
    Some((order, repairs))
}

fn field<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, name: &str) -> Option<T> {
    obj.get(name)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ];

    /// Position in the lifecycle; status never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Ready => 1,
            OrderStatus::Completed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
        }
    }

    /// Parses stored status text; anything unrecognised reads as `pending`.
    pub fn lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "ready" => Ok(OrderStatus::Ready),
            "completed" => Ok(OrderStatus::Completed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl OrderCode {
    pub fn generate<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let suffix: u32 = rng.gen_range(1000, 10000);
        OrderCode(format!("{}{}-{}", CODE_PREFIX, now.format("%Y%m%d"), suffix))
    }

    /// Stand-in for records stored without a code: the prefix and the last
    /// eight digits of the id.
    pub fn fallback(id: Id<Order>) -> Self {
        let digits = id.to_string();
        let tail = &digits[digits.len().saturating_sub(8)..];
        OrderCode(format!("{}{}", CODE_PREFIX, tail))
    }

    /// Whether this looks like a generated code rather than a fallback.
    pub fn is_well_formed(&self) -> bool {
        let rest = match self.0.strip_prefix(CODE_PREFIX) {
            Some(rest) => rest,
            None => return false,
        };
        let mut parts = rest.splitn(2, '-');
        let date = parts.next().unwrap_or_default();
        let seq = parts.next().unwrap_or_default();
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        date.len() == 8 && seq.len() == 4 && all_digits(date) && all_digits(seq)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl From<&str> for OrderCode {
    fn from(code: &str) -> Self {
        OrderCode(code.to_string())
    }
}

impl Pin {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let pin: u32 = rng.gen_range(100_000, 1_000_000);
        Pin(pin.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks an attempt typed in at the counter.
    pub fn verify(&self, attempt: &str) -> Result<(), PinError> {
        let attempt = attempt.trim();
        if attempt.chars().count() != PIN_LEN {
            return Err(PinError::WrongLength);
        }
        if attempt != self.0 {
            return Err(PinError::Incorrect);
        }
        Ok(())
    }
}

impl From<&str> for Pin {
    fn from(pin: &str) -> Self {
        Pin(pin.to_string())
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

// Keeps PINs out of logs.
impl fmt::Debug for Pin {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("Pin(******)")
    }
}
