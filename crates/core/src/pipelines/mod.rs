//! The sub-pipelines the dispatcher can run.

pub mod breakdown;
pub mod hook;
pub mod report;
pub mod search;

pub use breakdown::{breakdown_pipeline, validate_timeline};
pub use hook::hook_pipeline;
pub use report::report_pipeline;
pub use search::search_pipeline;
