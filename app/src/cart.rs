use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Timelike, Utc};
use err_derive::Error;
use log::*;
use serde::{Deserialize, Serialize};

use infra::clock::Clock;
use infra::persistence::{Storage, StorageExt};

use crate::accounts::Accounts;
use crate::keys;
use crate::menu::{Category, CustomerItem};
use crate::money::Money;
use crate::orders::{Order, OrderLine, OrderStore};

const CURRENCY: &str = "ZAR";

/// The signed-in customer's basket, one line per item name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error(display = "login to place an order")]
    NotSignedIn,
    #[error(display = "your cart is empty")]
    Empty,
    #[error(display = "cart total must be greater than zero")]
    ZeroTotal,
    #[error(display = "orders can only be placed during operating hours")]
    Closed,
    #[error(display = "payment cancelled")]
    Cancelled,
    #[error(display = "payment declined: {}", _0)]
    Declined(String),
}

impl Cart {
    pub fn load(docs: &dyn Storage) -> Self {
        docs.load_or_default(keys::CART)
    }

    pub fn save(&self, docs: &dyn Storage) -> bool {
        docs.save_or_warn(keys::CART, self)
    }

    pub fn clear(docs: &dyn Storage) {
        if let Err(e) = docs.remove(keys::CART) {
            warn!("Could not clear cart: {:#}", e);
        }
    }

    pub fn add(&mut self, item: &CustomerItem) {
        self.add_line(&item.name, item.price, item.category)
    }

    /// One more of `name`, or a new line if it is not in the cart yet.
    pub fn add_line(&mut self, name: &str, price: Money, category: Category) {
        match self.lines.iter_mut().find(|l| l.name == name) {
            Some(line) => line.quantity += 1,
            None => self.lines.push(OrderLine {
                name: name.to_string(),
                price,
                quantity: 1,
                category,
            }),
        }
    }

    /// Adjusts a line's quantity by `delta`; lines that reach zero go.
    pub fn change_quantity(&mut self, name: &str, delta: i64) {
        let pos = match self.lines.iter().position(|l| l.name == name) {
            Some(pos) => pos,
            None => return,
        };
        let quantity = i64::from(self.lines[pos].quantity) + delta;
        if quantity <= 0 {
            self.lines.remove(pos);
        } else {
            self.lines[pos].quantity = quantity as u32;
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.name != name);
        self.lines.len() != before
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }
}

/// Daily opening window in local hours, `open <= hour < close`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingHours {
    pub open: u32,
    pub close: u32,
    pub utc_offset_hours: i32,
}

impl Default for OperatingHours {
    fn default() -> Self {
        OperatingHours {
            open: 9,
            close: 20,
            utc_offset_hours: 2,
        }
    }
}

impl OperatingHours {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now + Duration::hours(i64::from(self.utc_offset_hours));
        let hour = local.hour();
        hour >= self.open && hour < self.close
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub email: String,
    pub amount: Money,
    pub currency: &'static str,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved,
    Cancelled,
    Declined(String),
}

/// Takes the customer's money. Card handling lives behind this.
pub trait PaymentGateway: fmt::Debug {
    fn charge(&self, request: &PaymentRequest) -> Result<PaymentOutcome>;
}

/// Approves every charge without contacting anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

impl PaymentGateway for OfflineGateway {
    fn charge(&self, request: &PaymentRequest) -> Result<PaymentOutcome> {
        info!(
            "Approving {} {} for {} offline ({})",
            request.currency, request.amount, request.email, request.reference
        );
        Ok(PaymentOutcome::Approved)
    }
}

/// Turns the stored cart into a placed order.
#[derive(Debug)]
pub struct Checkout {
    clock: Arc<dyn Clock>,
    hours: OperatingHours,
    gateway: Box<dyn PaymentGateway>,
}

impl Checkout {
    pub fn new(
        clock: Arc<dyn Clock>,
        hours: OperatingHours,
        gateway: Box<dyn PaymentGateway>,
    ) -> Self {
        Checkout {
            clock,
            hours,
            gateway,
        }
    }

    pub fn is_open(&self) -> bool {
        self.hours.is_open(self.clock.now())
    }

    /// Charges the signed-in customer for their cart and records the order.
    /// The cart is emptied only once the order is stored.
    pub fn place(
        &self,
        docs: &dyn Storage,
        accounts: &Accounts,
        orders: &mut OrderStore,
    ) -> Result<Order> {
        let user = accounts.current_user(docs).ok_or(CartError::NotSignedIn)?;
        let now = self.clock.now();
        if !self.hours.is_open(now) {
            return Err(CartError::Closed.into());
        }

        let cart = Cart::load(docs);
        if cart.is_empty() {
            return Err(CartError::Empty.into());
        }
        if !cart.total().is_positive() {
            return Err(CartError::ZeroTotal.into());
        }

        let order = Order::place(now, &user.email, cart.lines, &mut rand::thread_rng());
        let request = PaymentRequest {
            email: user.email.clone(),
            amount: order.total,
            currency: CURRENCY,
            reference: order.order_id.to_string(),
        };
        match self.gateway.charge(&request).context("charge payment")? {
            PaymentOutcome::Approved => {}
            PaymentOutcome::Cancelled => return Err(CartError::Cancelled.into()),
            PaymentOutcome::Declined(reason) => return Err(CartError::Declined(reason).into()),
        }

        let reference = request.reference;
        let order = match orders.insert(docs, order) {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    "Payment {} for {} was approved but the order was not stored: {:#}",
                    reference, request.email, e
                );
                return Err(e.context(format!(
                    "payment {} was approved but the order was not stored",
                    reference
                )));
            }
        };
        Cart::clear(docs);
        Ok(order)
    }
}
