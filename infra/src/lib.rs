pub mod bus;
pub mod clock;
pub mod ids;
pub mod memo;
pub mod persistence;
