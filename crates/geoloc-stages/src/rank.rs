//! Result ranking: turns executed query rows into a short, ordered list of
//! candidate location pairs.
use std::collections::HashSet;

use async_trait::async_trait;
use geoloc_core::context::DEFAULT_MAX_LOCATIONS;
use geoloc_core::{
    DetectedObject, ExecutionRecord, LocationPair, PipelineOptions, PipelineState, Stage,
    StageError,
};

pub struct ResultRanker {
    options: PipelineOptions,
}

impl ResultRanker {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            options: options.clone(),
        }
    }

    /// Records without rows are skipped. Pairs are deduplicated on names
    /// (first occurrence wins), ordered by match count descending then
    /// distance ascending, and capped at `max_locations` (never more than
    /// [`DEFAULT_MAX_LOCATIONS`]).
    pub fn rank(&self, records: &[ExecutionRecord], objects: &[DetectedObject]) -> Vec<LocationPair> {
        let labels = self.options.match_labels(objects);
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();

        for record in records.iter().filter(|r| r.has_rows()) {
            for row in &record.rows {
                let mut pair = LocationPair::from_row(row);
                if !seen.insert(pair.pair_key()) {
                    continue;
                }
                pair.match_count = labels.iter().filter(|l| pair.mentions(l)).count();
                pairs.push(pair);
            }
        }

        // stable: ties keep first-seen order
        pairs.sort_by(|a, b| {
            b.match_count
                .cmp(&a.match_count)
                .then_with(|| a.distance_meters.total_cmp(&b.distance_meters))
        });
        pairs.truncate(self.options.max_locations.min(DEFAULT_MAX_LOCATIONS));
        pairs
    }
}

pub struct RankStage {
    ranker: ResultRanker,
}

impl RankStage {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            ranker: ResultRanker::new(options),
        }
    }
}

#[async_trait]
impl Stage for RankStage {
    fn id(&self) -> &'static str {
        "rank.locations.v1"
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        state.ranked = self.ranker.rank(&state.records, &state.objects);
        tracing::info!(
            trace_id = %state.trace_id,
            candidates = state.ranked.len(),
            "ranked locations"
        );
        Ok(state)
    }
}
