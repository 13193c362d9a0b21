//! The order lifecycle: `pending` → `ready` → `completed`.
//!
//! Status only ever moves forward, a completed order is frozen, and moving
//! to `completed` needs the customer's PIN.

use err_derive::Error;

use infra::ids::Id;

use super::models::{Order, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error(display = "PIN must be 6 digits")]
    WrongLength,
    #[error(display = "incorrect PIN")]
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error(display = "cannot change status from {} to {}", from, to)]
    Regression { from: OrderStatus, to: OrderStatus },
    #[error(display = "completed orders cannot be modified")]
    Completed,
    #[error(display = "PIN required")]
    PinRequired,
    #[error(display = "{}", _0)]
    Pin(PinError),
    #[error(display = "order {} not found", _0)]
    NotFound(Id<Order>),
}

impl From<PinError> for StatusError {
    fn from(err: PinError) -> Self {
        StatusError::Pin(err)
    }
}

/// Whether `current` may move to `requested` at all.
pub fn validate(current: OrderStatus, requested: OrderStatus) -> Result<(), StatusError> {
    if requested.rank() < current.rank() {
        return Err(StatusError::Regression {
            from: current,
            to: requested,
        });
    }
    if current == OrderStatus::Completed {
        return Err(StatusError::Completed);
    }
    Ok(())
}

/// Full check for a change to `order`, including the PIN gate on completion.
pub fn authorize(
    order: &Order,
    requested: OrderStatus,
    pin: Option<&str>,
) -> Result<(), StatusError> {
    validate(order.status, requested)?;
    if requested == OrderStatus::Completed {
        let attempt = pin.ok_or(StatusError::PinRequired)?;
        order.pin.verify(attempt)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::orders::models::Pin;
    use chrono::{TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use OrderStatus::*;

    fn order_in(status: OrderStatus) -> Order {
        let mut rng = StdRng::seed_from_u64(11);
        let mut order = Order::place(
            Utc.ymd(2026, 10, 18).and_hms(9, 15, 0),
            "a@b.co",
            Vec::new(),
            &mut rng,
        );
        order.pin = Pin::from("246810");
        order.status = status;
        order
    }

    #[test]
    fn forward_moves_are_allowed() {
        assert_eq!(validate(Pending, Ready), Ok(()));
        assert_eq!(validate(Ready, Completed), Ok(()));
        assert_eq!(validate(Pending, Completed), Ok(()));
        assert_eq!(validate(Ready, Ready), Ok(()));
    }

    #[test]
    fn regressions_are_rejected() {
        for &(from, to) in &[(Ready, Pending), (Completed, Ready), (Completed, Pending)] {
            assert_eq!(
                validate(from, to),
                Err(StatusError::Regression { from, to }),
                "{} -> {}",
                from,
                to
            );
        }
        assert_eq!(
            StatusError::Regression {
                from: Ready,
                to: Pending
            }
            .to_string(),
            "cannot change status from ready to pending"
        );
    }

    #[test]
    fn completed_is_terminal() {
        assert_eq!(validate(Completed, Completed), Err(StatusError::Completed));
        assert_eq!(
            StatusError::Completed.to_string(),
            "completed orders cannot be modified"
        );
    }

    #[test]
    fn completion_needs_the_right_pin() {
        let order = order_in(Ready);
        assert_eq!(
            authorize(&order, Completed, None),
            Err(StatusError::PinRequired)
        );
        assert_eq!(
            authorize(&order, Completed, Some("1234")),
            Err(StatusError::Pin(PinError::WrongLength))
        );
        assert_eq!(
            authorize(&order, Completed, Some("135790")),
            Err(StatusError::Pin(PinError::Incorrect))
        );
        assert_eq!(authorize(&order, Completed, Some("246810")), Ok(()));
        assert_eq!(
            StatusError::Pin(PinError::Incorrect).to_string(),
            "incorrect PIN"
        );
    }

    #[test]
    fn non_completing_moves_ignore_the_pin() {
        let order = order_in(Pending);
        assert_eq!(authorize(&order, Ready, None), Ok(()));
        assert_eq!(authorize(&order, Ready, Some("nonsense")), Ok(()));
    }

    #[test]
    fn regression_is_reported_before_the_terminal_guard() {
        let order = order_in(Completed);
        assert_eq!(
            authorize(&order, Pending, Some("246810")),
            Err(StatusError::Regression {
                from: Completed,
                to: Pending
            })
        );
        assert_eq!(
            authorize(&order, Completed, Some("246810")),
            Err(StatusError::Completed)
        );
    }
}
