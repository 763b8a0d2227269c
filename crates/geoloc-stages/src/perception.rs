//! Perception: runs the object detector on the request image.
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use geoloc_core::{DetectedObject, ObjectDetector, PipelineState, Stage, StageError};

/// Keeps the first object seen for each label.
pub fn first_per_label(objects: Vec<DetectedObject>) -> Vec<DetectedObject> {
    let mut seen = HashSet::new();
    objects
        .into_iter()
        .filter(|o| seen.insert(o.label.clone()))
        .collect()
}

pub struct PerceptionStage {
    detector: Arc<dyn ObjectDetector>,
}

impl PerceptionStage {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl Stage for PerceptionStage {
    fn id(&self) -> &'static str {
        "perceive.objects.v1"
    }

    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        let image_ref = state
            .image_ref
            .clone()
            .ok_or_else(|| StageError::MissingInput("image reference required".into()))?;

        match self.detector.detect(&image_ref).await {
            Ok(objects) => {
                let detected = objects.len();
                state.objects = first_per_label(objects);
                tracing::info!(
                    trace_id = %state.trace_id,
                    detected,
                    kept = state.objects.len(),
                    "objects detected"
                );
            }
            Err(err) => {
                tracing::warn!(trace_id = %state.trace_id, error = %err, "object detection failed");
                state.record_failure(self.id(), self.detector.name(), err.to_string());
                state.objects.clear();
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::GeolocError;

    struct Fixed(Result<Vec<DetectedObject>, &'static str>);

    #[async_trait]
    impl ObjectDetector for Fixed {
        async fn detect(&self, _image_ref: &str) -> Result<Vec<DetectedObject>, GeolocError> {
            self.0
                .clone()
                .map_err(|m| GeolocError::collaborator("fixed", m))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_keeps_first_object_per_label() {
        let stage = PerceptionStage::new(Arc::new(Fixed(Ok(vec![
            DetectedObject::new("塔", 0.6, [0.0; 4]),
            DetectedObject::new("桥", 0.8, [0.0; 4]),
            DetectedObject::new("塔", 0.95, [0.0; 4]),
        ]))));

        let state = stage
            .run(PipelineState::new("where?", Some("img.jpg".into())))
            .await
            .unwrap();

        assert_eq!(state.objects.len(), 2);
        assert_eq!(state.objects[0].label, "塔");
        assert_eq!(state.objects[0].confidence, 0.6);
    }

    #[tokio::test]
    async fn test_missing_image_is_an_error() {
        let stage = PerceptionStage::new(Arc::new(Fixed(Ok(Vec::new()))));
        let result = stage.run(PipelineState::new("where?", Some("  ".into()))).await;
        assert!(matches!(result, Err(StageError::MissingInput(_))));
    }

    #[tokio::test]
    async fn test_detector_failure_leaves_no_objects() {
        let stage = PerceptionStage::new(Arc::new(Fixed(Err("model not loaded"))));
        let state = stage
            .run(PipelineState::new("where?", Some("img.jpg".into())))
            .await
            .unwrap();

        assert!(state.objects.is_empty());
        assert_eq!(state.failures[0].collaborator, "fixed");
    }
}
