use async_trait::async_trait;

use crate::{
    format::format_search_markdown,
    stages::{FilteredSequence, HookedStage, Stage, StageContext, StageOutcome},
    state::{Fidelity, StateKey},
    types::SearchResults,
};

pub const PIPELINE: &str = "search";

pub fn search_pipeline(query: impl Into<String>) -> FilteredSequence {
    FilteredSequence::new(
        PIPELINE,
        vec![HookedStage::new(SearchStage {
            query: query.into(),
        })],
    )
}

pub struct SearchStage {
    query: String,
}

impl SearchStage {
    pub const ID: &'static str = "search.web";
}

#[async_trait]
impl Stage for SearchStage {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn requires(&self) -> Vec<StateKey> {
        Vec::new()
    }

    fn produces(&self) -> Vec<StateKey> {
        vec![StateKey::SearchResults]
    }

    async fn run(&self, ctx: &mut StageContext<'_>) -> StageOutcome {
        let Some(search) = ctx.collaborators.search.clone() else {
            return StageOutcome::degraded(
                "no search results",
                vec!["web search not configured".to_string()],
            );
        };

        let hits = match ctx.bounded("web_search", search.search(&self.query)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => return StageOutcome::failed(e),
            Err(e) => return StageOutcome::Failed(e),
        };
        let results = SearchResults {
            query: self.query.clone(),
            hits,
        };
        let output = format_search_markdown(&results);

        match ctx.state.set_serialized(
            StateKey::SearchResults,
            &results,
            Fidelity::Validated,
            Self::ID,
        ) {
            Ok(_) => StageOutcome::success(output),
            Err(e) => StageOutcome::failed(e),
        }
    }
}
