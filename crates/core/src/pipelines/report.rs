use async_trait::async_trait;

use crate::{
    format::format_report_markdown,
    report::{ReportInputs, assemble_report},
    stages::{FilteredSequence, HookedStage, Stage, StageContext, StageOutcome},
    state::{Fidelity, StateKey},
};

pub const PIPELINE: &str = "report";

pub fn report_pipeline() -> FilteredSequence {
    FilteredSequence::new(PIPELINE, vec![HookedStage::new(ReportStage)])
}

/// Thin stage over [`assemble_report`]; every input is optional.
pub struct ReportStage;

impl ReportStage {
    pub const ID: &'static str = "report.assemble";
}

#[async_trait]
impl Stage for ReportStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        Vec::new()
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::FinalReport]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let report = assemble_report(&ReportInputs::from_state(ctx.state));
        let markdown = format_report_markdown(&report);

        match ctx
            .state
            .set_serialized(StateKey::FinalReport, &report, Fidelity::Validated, Self::ID)
        {
            Ok(_) => StageOutcome::success(markdown),
            Err(e) => StageOutcome::failed(e),
        }
    }
}
