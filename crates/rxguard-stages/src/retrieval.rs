use std::sync::Arc;

use async_trait::async_trait;
use rxguard_core::{
    CaseContext, PatientProfile, PipelineError, PipelineState, ProposedMedication,
    RetrievalService, Stage,
};
use tracing::info;

pub const DEFAULT_TOP_K: usize = 5;
const DOMAIN_TERMS: &str = "renal impairment contraindications dosing";

/// Build the guideline search query for a case.
///
/// Pure function of its inputs; the same profile and medication always
/// yield the same string.
pub fn build_query(profile: &PatientProfile, medication: &ProposedMedication) -> String {
    let drug = medication.drug_name.as_deref().unwrap_or("");
    let conditions = profile.conditions.join(", ");
    format!("Prescribing guidance for {drug} in patients with {conditions} {DOMAIN_TERMS}")
}

/// Fetches the top-k guideline passages for the extracted profile and
/// medication, keeping the service's ranking.
pub struct RetrievalStage {
    retrieval: Arc<dyn RetrievalService>,
    top_k: usize,
}

impl RetrievalStage {
    pub fn new(retrieval: Arc<dyn RetrievalService>) -> Self {
        Self {
            retrieval,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn id(&self) -> &'static str {
        "retrieve.guidelines.v1"
    }

    async fn run(&self, state: &mut PipelineState, ctx: &CaseContext) -> Result<(), PipelineError> {
        let (Some(profile), Some(medication)) = (state.patient_profile(), state.proposed_medication())
        else {
            return Err(PipelineError::StateInvariant(
                "retrieval requires an extracted profile and medication".to_string(),
            ));
        };

        let query = build_query(profile, medication);
        let passages = self
            .retrieval
            .search(&query, self.top_k)
            .await
            .map_err(|e| PipelineError::from_service("retrieval", e))?;

        info!(
            case_id = %ctx.case_id,
            stage = self.id(),
            k = self.top_k,
            retrieved = passages.len(),
            query = %query,
            "guidelines retrieved"
        );

        state.record_guidelines(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxguard_core::test_utils::StaticRetrieval;
    use rxguard_core::{GuidelinePassage, ServiceError};

    fn extracted_state() -> PipelineState {
        let mut state = PipelineState::new("note");
        state
            .record_extraction(
                PatientProfile {
                    age: Some(65),
                    sex: None,
                    conditions: vec!["Chronic Kidney Disease Stage 3".into(), "Hypertension".into()],
                    risk_factors: vec![],
                },
                ProposedMedication {
                    drug_name: Some("Ibuprofen".into()),
                    ..Default::default()
                },
                0.9,
            )
            .unwrap();
        state
    }

    fn passage(page: u32) -> GuidelinePassage {
        GuidelinePassage {
            source: "renal.txt".into(),
            page,
            content: format!("passage {page}"),
        }
    }

    #[test]
    fn query_format() {
        let state = extracted_state();
        assert_eq!(
            build_query(state.patient_profile().unwrap(), state.proposed_medication().unwrap()),
            "Prescribing guidance for Ibuprofen in patients with Chronic Kidney Disease Stage 3, \
             Hypertension renal impairment contraindications dosing"
        );
    }

    #[test]
    fn query_tolerates_missing_fields() {
        let query = build_query(&PatientProfile::default(), &ProposedMedication::default());
        assert_eq!(
            query,
            "Prescribing guidance for  in patients with  renal impairment contraindications dosing"
        );
    }

    #[tokio::test]
    async fn keeps_service_order_and_k() {
        let retrieval = Arc::new(StaticRetrieval::new(vec![passage(7), passage(2), passage(9)]));
        let stage = RetrievalStage::new(retrieval.clone()).with_top_k(2);
        let mut state = extracted_state();
        stage.run(&mut state, &CaseContext::new()).await.unwrap();

        let pages: Vec<u32> = state.retrieved_guidelines().unwrap().iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![7, 2]);
        assert_eq!(retrieval.queries()[0].1, 2);
    }

    #[tokio::test]
    async fn missing_corpus_is_retrieval_unavailable() {
        let retrieval = Arc::new(StaticRetrieval::failing(ServiceError::CorpusUnavailable(
            "no guidelines".into(),
        )));
        let stage = RetrievalStage::new(retrieval);
        let mut state = extracted_state();
        let err = stage.run(&mut state, &CaseContext::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::RetrievalUnavailable(_)));
        assert!(state.retrieved_guidelines().is_none());
    }

    #[tokio::test]
    async fn requires_extraction() {
        let retrieval = Arc::new(StaticRetrieval::new(vec![]));
        let stage = RetrievalStage::new(retrieval.clone());
        let mut state = PipelineState::new("note");
        assert!(matches!(
            stage.run(&mut state, &CaseContext::new()).await,
            Err(PipelineError::StateInvariant(_))
        ));
        assert_eq!(retrieval.calls(), 0);
    }
}
