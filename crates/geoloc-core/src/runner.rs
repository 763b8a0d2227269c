//! Pipeline Runner: chains stages over the state and records a trace per stage
use crate::context::PipelineState;
use crate::data_model::StageTrace;
use crate::error::GeolocError;
use crate::stage::Stage;
use std::time::Instant;

pub struct PipelineRunner {
    stages: Vec<Box<dyn Stage>>,
    pipeline_id: String,
}

impl PipelineRunner {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        let pipeline_id = stages
            .iter()
            .map(|s| s.id().split('.').next().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join("→");

        Self { stages, pipeline_id }
    }

    /// Runs every stage in order. The first stage error aborts the run.
    pub async fn run(&self, state: PipelineState) -> Result<PipelineState, GeolocError> {
        let mut current = state;

        for stage in &self.stages {
            let start = Instant::now();
            let in_hash = hash_state(&current)?;

            let mut next = stage.run(current).await.map_err(|e| {
                tracing::warn!(stage = stage.id(), error = %e, "stage failed");
                GeolocError::from(e)
            })?;

            let out_hash = hash_state(&next)?;
            let latency_ms = start.elapsed().as_millis() as u64;
            tracing::debug!(stage = stage.id(), latency_ms, "stage complete");

            next.trace.push(StageTrace {
                id: stage.id().to_string(),
                in_hash,
                out_hash,
                deterministic: stage.deterministic(),
                latency_ms,
            });

            current = next;
        }

        Ok(current)
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn hash_state(state: &PipelineState) -> Result<String, GeolocError> {
    let bytes = serde_json::to_vec(state)?;
    Ok(format!("blake3:{}", blake3::hash(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageError;
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl Stage for Upper {
        fn id(&self) -> &'static str {
            "upper.text.v1"
        }

        async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
            state.user_text = state.user_text.to_uppercase();
            Ok(state)
        }
    }

    struct RequireImage;

    #[async_trait]
    impl Stage for RequireImage {
        fn id(&self) -> &'static str {
            "require.image.v1"
        }

        async fn run(&self, state: PipelineState) -> Result<PipelineState, StageError> {
            match state.image_ref {
                Some(_) => Ok(state),
                None => Err(StageError::MissingInput("image".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_runner_records_trace() {
        let runner = PipelineRunner::new(vec![Box::new(Upper), Box::new(Upper)]);
        assert_eq!(runner.pipeline_id(), "upper→upper");

        let out = runner.run(PipelineState::new("bund", None)).await.unwrap();
        assert_eq!(out.user_text, "BUND");
        assert_eq!(out.trace.len(), 2);
        assert_ne!(out.trace[0].in_hash, out.trace[0].out_hash);
        assert!(out.trace[1].in_hash.starts_with("blake3:"));
    }

    #[tokio::test]
    async fn test_missing_input_aborts() {
        let runner = PipelineRunner::new(vec![Box::new(RequireImage), Box::new(Upper)]);
        let err = runner.run(PipelineState::new("where?", None)).await.unwrap_err();
        assert!(matches!(err, GeolocError::MissingInput(_)));
        assert!(err.is_fatal());
    }
}
