//! Contracts of the external collaborators the stages call.
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::data_model::GuidelinePassage;
use crate::error::{PipelineError, ServiceError};

/// A prompt and the JSON schema the answer must follow.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningRequest {
    /// Which stage is asking (ex: "extraction"); used for logs and routing.
    pub task: &'static str,
    pub system: String,
    pub prompt: String,
    pub schema: Value,
}

/// Converts a prompt/schema pair into a JSON object.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<Value, ServiceError>;
}

/// Returns the `k` most relevant reference passages for a query,
/// most relevant first.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<GuidelinePassage>, ServiceError>;
}

#[async_trait]
impl<S: ReasoningService + ?Sized> ReasoningService for Arc<S> {
    async fn complete(&self, request: &ReasoningRequest) -> Result<Value, ServiceError> {
        (**self).complete(request).await
    }
}

#[async_trait]
impl<S: RetrievalService + ?Sized> RetrievalService for Arc<S> {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<GuidelinePassage>, ServiceError> {
        (**self).search(query, k).await
    }
}

/// Call the reasoning service and parse its answer into `T`.
///
/// Structural mismatches surface as `PipelineError::Schema` for `stage`.
pub async fn complete_structured<T: DeserializeOwned>(
    service: &dyn ReasoningService,
    stage: &'static str,
    request: &ReasoningRequest,
) -> Result<T, PipelineError> {
    let value = service
        .complete(request)
        .await
        .map_err(|e| PipelineError::from_service(stage, e))?;

    serde_json::from_value(value).map_err(|e| PipelineError::Schema {
        stage,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedReasoning;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Answer {
        level: String,
    }

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            task: "safety_critic",
            system: "system".to_string(),
            prompt: "prompt".to_string(),
            schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_structured_answer_parses() {
        let service = ScriptedReasoning::new().respond("safety_critic", json!({"level": "info"}));
        let answer: Answer = complete_structured(&service, "safety_critic", &request()).await.unwrap();
        assert_eq!(answer.level, "info");
    }

    #[tokio::test]
    async fn test_structural_mismatch_is_schema_error() {
        let service = ScriptedReasoning::new().respond("safety_critic", json!({"severity": 3}));
        let err = complete_structured::<Answer>(&service, "safety_critic", &request())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema { stage: "safety_critic", .. }));
    }
}
