pub mod events;
pub mod hooks;
pub mod sequence;
pub mod stage;
pub mod vision_chain;

pub use hooks::*;
pub use sequence::*;
pub use stage::*;
pub use vision_chain::*;
