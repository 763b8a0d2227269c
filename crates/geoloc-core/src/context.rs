//! Pipeline State: the envelope threaded through every stage of one run
use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_model::{
    DetectedObject, ExecutionRecord, FailureRecord, Intent, LocationPair, QueryDescriptor,
    StageTrace,
};

/// Label of the directional reference marker (sunset, always due west).
pub const DEFAULT_REFERENCE_LABEL: &str = "夕阳";
/// Objects above this confidence count towards a location's match count.
pub const DEFAULT_MATCH_CONFIDENCE: f64 = 0.7;
/// Upper bound on ranked locations handed to the narrative.
pub const DEFAULT_MAX_LOCATIONS: usize = 3;

/// Run-time knobs shared by the reasoning stages.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub reference_label: String,
    pub match_confidence_threshold: f64,
    pub max_locations: usize,
    /// Per-dispatch bound on executor calls
    pub dispatch_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            reference_label: DEFAULT_REFERENCE_LABEL.to_string(),
            match_confidence_threshold: DEFAULT_MATCH_CONFIDENCE,
            max_locations: DEFAULT_MAX_LOCATIONS,
            dispatch_timeout: None,
        }
    }
}

impl PipelineOptions {
    pub fn is_reference(&self, object: &DetectedObject) -> bool {
        object.label == self.reference_label
    }

    /// Labels that may support a candidate location: confident and not the
    /// reference marker, in detection order.
    pub fn match_labels<'a>(&self, objects: &'a [DetectedObject]) -> Vec<&'a str> {
        objects
            .iter()
            .filter(|o| !o.label.is_empty() && !self.is_reference(o))
            .filter(|o| o.confidence > self.match_confidence_threshold)
            .map(|o| o.label.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    pub user_text: String,
    pub image_ref: Option<String>,
    pub intent: Option<Intent>,
    pub objects: Vec<DetectedObject>,
    pub descriptors: Vec<QueryDescriptor>,
    /// Run-scoped accumulator, append-only
    pub records: Vec<ExecutionRecord>,
    pub ranked: Vec<LocationPair>,
    pub narrative: Option<String>,
    pub chat_response: Option<String>,
    pub failures: Vec<FailureRecord>,
    pub trace: Vec<StageTrace>,
}

impl PipelineState {
    pub fn new(user_text: impl Into<String>, image_ref: Option<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            user_text: user_text.into(),
            image_ref: image_ref.filter(|r| !r.trim().is_empty()),
            intent: None,
            objects: Vec::new(),
            descriptors: Vec::new(),
            records: Vec::new(),
            ranked: Vec::new(),
            narrative: None,
            chat_response: None,
            failures: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Keys of every descriptor already dispatched in this run.
    pub fn executed_keys(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.key()).collect()
    }

    /// Descriptors not yet dispatched, in synthesis order.
    pub fn remaining_descriptors(&self) -> Vec<&QueryDescriptor> {
        let executed = self.executed_keys();
        self.descriptors
            .iter()
            .filter(|d| !executed.contains(d.key()))
            .collect()
    }

    pub fn record_failure(
        &mut self,
        stage: &str,
        collaborator: &str,
        message: impl Into<String>,
    ) {
        self.failures.push(FailureRecord {
            stage: stage.to_string(),
            collaborator: collaborator.to_string(),
            message: message.into(),
        });
    }

    /// Final artifact of the run: the narrative on the reasoning branch, the
    /// chat reply on the chat branch.
    pub fn answer(&self) -> Option<&str> {
        self.narrative
            .as_deref()
            .or(self.chat_response.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::Direction;

    fn descriptor(text: &str) -> QueryDescriptor {
        QueryDescriptor {
            object_a: DetectedObject::new("a", 0.9, [0.0; 4]),
            object_b: DetectedObject::new("b", 0.9, [0.0; 4]),
            direction: Direction::None,
            rendered: text.to_string(),
        }
    }

    #[test]
    fn test_blank_image_ref_is_absent() {
        let state = PipelineState::new("where?", Some("  ".to_string()));
        assert!(state.image_ref.is_none());
    }

    #[test]
    fn test_remaining_excludes_executed() {
        let mut state = PipelineState::new("where?", None);
        state.descriptors = vec![descriptor("q1"), descriptor("q2"), descriptor("q3")];
        state
            .records
            .push(ExecutionRecord::from_rows(descriptor("q2"), Vec::new()));

        let remaining: Vec<&str> = state.remaining_descriptors().into_iter().map(|d| d.key()).collect();
        assert_eq!(remaining, vec!["q1", "q3"]);
        assert!(state.executed_keys().contains("q2"));
    }

    #[test]
    fn test_match_labels_skip_reference_and_low_confidence() {
        let options = PipelineOptions::default();
        let objects = vec![
            DetectedObject::new("塔", 0.9, [0.0; 4]),
            DetectedObject::new("桥", 0.7, [0.0; 4]),
            DetectedObject::new("夕阳", 0.99, [0.0; 4]),
        ];
        assert_eq!(options.match_labels(&objects), vec!["塔"]);
    }
}
