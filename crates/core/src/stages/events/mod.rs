pub mod sequence_ended;
pub mod stage_completed;
pub mod stage_degraded;
pub mod stage_failed;

pub use sequence_ended::*;
pub use stage_completed::*;
pub use stage_degraded::*;
pub use stage_failed::*;
