//! Stage Trait: the single contract every pipeline stage satisfies
use async_trait::async_trait;

use crate::context::CaseContext;
use crate::error::PipelineError;
use crate::state::PipelineState;

/// A named unit that reads some state fields, calls at most one external
/// service, and writes other fields.
///
/// A stage that returns an error must leave the fields it owns unset.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage id (ex: "extract.profile.v1")
    fn id(&self) -> &'static str;

    /// Whether the stage output is a pure function of the state (default: false,
    /// since most stages consult an external service).
    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError>;
}
