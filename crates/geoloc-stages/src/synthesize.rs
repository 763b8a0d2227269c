//! Spatial query synthesis: every pair of distinct detected objects becomes a
//! geo-proximity query, constrained east/west when a reference marker is in
//! the frame.
use std::collections::HashSet;

use async_trait::async_trait;
use geoloc_core::{
    DetectedObject, Direction, PipelineOptions, PipelineState, QueryDescriptor, Stage, StageError,
};

/// Pairs closer than this are taken to be the same building.
pub const MIN_DISTANCE_M: u32 = 1;
/// Pairs further apart than this are unrelated coincidences.
pub const MAX_DISTANCE_M: u32 = 100;
/// Matches kept per pair, nearest first.
pub const MAX_MATCHES_PER_PAIR: u32 = 3;

pub struct SpatialQuerySynthesizer {
    reference_label: String,
}

impl SpatialQuerySynthesizer {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            reference_label: options.reference_label.clone(),
        }
    }

    /// One descriptor per unordered pair of non-reference objects with
    /// different labels, in detection order.
    pub fn synthesize(&self, objects: &[DetectedObject]) -> Vec<QueryDescriptor> {
        let reference = objects.iter().find(|o| o.label == self.reference_label);
        let candidates: Vec<&DetectedObject> = objects
            .iter()
            .filter(|o| o.label != self.reference_label)
            .collect();

        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();

        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                if a.label == b.label {
                    continue;
                }
                let direction = reference
                    .map(|r| Direction::infer(a, b, r))
                    .unwrap_or(Direction::None);
                let rendered = render_query(&a.label, &b.label, direction);
                if !seen.insert(rendered.clone()) {
                    continue;
                }
                descriptors.push(QueryDescriptor {
                    object_a: (*a).clone(),
                    object_b: (*b).clone(),
                    direction,
                    rendered,
                });
            }
        }

        descriptors
    }
}

/// Predicate placing object A on the `direction` side of object B.
pub fn direction_predicate(direction: Direction) -> Option<&'static str> {
    match direction {
        Direction::West => Some("ST_X(a.location) <= ST_X(b.location)"),
        Direction::East => Some("ST_X(b.location) <= ST_X(a.location)"),
        Direction::None => None,
    }
}

/// Renders the proximity query for two labels. Pure: the same inputs always
/// give the same text, which doubles as the descriptor key.
pub fn render_query(label_a: &str, label_b: &str, direction: Direction) -> String {
    let direction_condition = direction_predicate(direction)
        .map(|p| format!(" AND {} ", p))
        .unwrap_or_default();

    let sql = format!(
        r#"
        WITH geo_a AS (
            SELECT * FROM geo_table WHERE name LIKE '%{a}%'
        ), geo_b AS (
            SELECT * FROM geo_table WHERE name LIKE '%{b}%'
        )
        SELECT
            a.name AS a_name,
            a.address AS a_address,
            b.name AS b_name,
            b.address AS b_address,
            ROUND((st_distance(a.location, b.location) / 0.0111) * 1000) AS distance
        FROM geo_a AS a
        JOIN geo_b AS b ON 1=1
        WHERE 1=1 AND distance > {min} AND distance < {max}
        {direction_condition}
        ORDER BY distance
        LIMIT {limit};
        "#,
        a = quote_literal(label_a),
        b = quote_literal(label_b),
        min = MIN_DISTANCE_M,
        max = MAX_DISTANCE_M,
        limit = MAX_MATCHES_PER_PAIR,
    );

    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quote_literal(label: &str) -> String {
    label.replace('\'', "''")
}

pub struct SynthesizeStage {
    synthesizer: SpatialQuerySynthesizer,
}

impl SynthesizeStage {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            synthesizer: SpatialQuerySynthesizer::new(options),
        }
    }
}

#[async_trait]
impl Stage for SynthesizeStage {
    fn id(&self) -> &'static str {
        "synthesize.spatial.v1"
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        state.descriptors = self.synthesizer.synthesize(&state.objects);
        tracing::info!(
            objects = state.objects.len(),
            descriptors = state.descriptors.len(),
            "synthesized spatial queries"
        );
        for descriptor in &state.descriptors {
            tracing::debug!(
                a = %descriptor.object_a.label,
                b = %descriptor.object_b.label,
                direction = %descriptor.direction,
                query = %descriptor.rendered,
                "descriptor"
            );
        }
        Ok(state)
    }
}
