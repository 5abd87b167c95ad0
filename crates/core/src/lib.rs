pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod format;
pub mod pipelines;
pub mod repair;
pub mod report;
pub mod scoring;
pub mod stages;
pub mod state;
pub mod types;

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use collaborators::Collaborators;
pub use config::{ModelChain, PipelineConfig};
pub use dispatcher::{Intent, Job, Request, Response, ResponseStatus, classify, plan};
pub use error::{DispatchError, HookError, StageError, TimelineError};
pub use format::{format_report_markdown, format_timestamp};
pub use repair::{RepairError, repair_hook_score};
pub use report::{Report, ReportInputs, assemble_report};
pub use scoring::{Dimension, HookAnalysis};
pub use state::{Fidelity, SessionState, StateKey};
