mod models;
pub mod status;
mod store;

pub use self::models::{
    normalize, Order, OrderCode, OrderLine, OrderStatus, Pin, Repairs, UnknownStatus,
    UNKNOWN_EMAIL,
};
pub use self::status::{PinError, StatusError};
pub use self::store::OrderStore;
