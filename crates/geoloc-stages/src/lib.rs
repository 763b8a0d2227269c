//! Geoloc Stages: the stages of a location-reasoning run and the pipeline
//! that routes a request through them.
//!
//! # Pipeline Flow
//!
//! ```text
//!            ┌─ chat ──────▶ ChatResponder ─────────────────────────────────────────┐
//! Intent ────┤                                                                      ├─▶ answer
//!            └─ reasoning ─▶ Perception → Synthesize → Execute ⟲ → Rank → Narrate ──┘
//! ```

pub mod execution;
pub mod intent;
pub mod narrative;
pub mod perception;
pub mod rank;
pub mod synthesize;

pub use execution::{route_condition, ExecuteStage, ExecutionRouter, RouteDecision, RouterState};
pub use intent::{parse_intent, ChatResponder, ClassifyIntentStage, IntentRouter};
pub use narrative::{NarrateStage, NarrativePrompt, NarrativeShaper, ParagraphPlan};
pub use perception::PerceptionStage;
pub use rank::{RankStage, ResultRanker};
pub use synthesize::{render_query, SpatialQuerySynthesizer, SynthesizeStage};

use std::sync::Arc;

use geoloc_core::{
    GeolocError, Intent, ObjectDetector, PipelineOptions, PipelineRunner, PipelineState,
    QueryExecutor, Stage, TextGenerator,
};
use geoloc_out::TemplateRenderer;

/// External services a pipeline is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub detector: Arc<dyn ObjectDetector>,
    pub executor: Arc<dyn QueryExecutor>,
}

/// Reasoning branch stages, in execution order.
pub fn reasoning_stages(
    collaborators: &Collaborators,
    options: &PipelineOptions,
    renderer: Arc<TemplateRenderer<'static>>,
) -> Vec<Box<dyn Stage>> {
    let shaper = NarrativeShaper::new(renderer, collaborators.generator.clone(), options);
    vec![
        Box::new(PerceptionStage::new(collaborators.detector.clone())),
        Box::new(SynthesizeStage::new(options)),
        Box::new(ExecuteStage::new(collaborators.executor.clone(), options)),
        Box::new(RankStage::new(options)),
        Box::new(NarrateStage::new(shaper)),
    ]
}

/// Branch taken after classification; unclassified states go to chat.
pub fn route_intent(state: &PipelineState) -> Intent {
    state.intent.unwrap_or(Intent::Chat)
}

/// Intent classification followed by the chat or the reasoning branch.
pub struct GeolocPipeline {
    classify: PipelineRunner,
    chat: PipelineRunner,
    reasoning: PipelineRunner,
}

impl GeolocPipeline {
    /// Pipeline over the shipped narrative templates.
    pub fn new(collaborators: Collaborators, options: PipelineOptions) -> Result<Self, GeolocError> {
        let renderer =
            geoloc_out::default_renderer().map_err(|e| GeolocError::Template(e.to_string()))?;
        Ok(Self::with_renderer(collaborators, options, renderer))
    }

    pub fn with_renderer(
        collaborators: Collaborators,
        options: PipelineOptions,
        renderer: TemplateRenderer<'static>,
    ) -> Self {
        let renderer = Arc::new(renderer);
        Self {
            classify: PipelineRunner::new(vec![Box::new(ClassifyIntentStage::new(
                collaborators.generator.clone(),
            ))]),
            chat: PipelineRunner::new(vec![Box::new(ChatResponder::new(
                collaborators.generator.clone(),
            ))]),
            reasoning: PipelineRunner::new(reasoning_stages(&collaborators, &options, renderer)),
        }
    }

    /// Answers one request. Only structural failures (a reasoning request
    /// without an image, a broken template) come back as `Err`.
    pub async fn run(
        &self,
        user_text: impl Into<String>,
        image_ref: Option<String>,
    ) -> Result<PipelineState, GeolocError> {
        let state = self.classify.run(PipelineState::new(user_text, image_ref)).await?;

        let branch = match route_intent(&state) {
            Intent::Chat => &self.chat,
            Intent::Reasoning => &self.reasoning,
        };
        tracing::info!(
            trace_id = %state.trace_id,
            pipeline = branch.pipeline_id(),
            "routing request"
        );
        branch.run(state).await
    }
}
