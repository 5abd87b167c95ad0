pub mod bus;
pub mod event;

pub use bus::*;
pub use event::*;
