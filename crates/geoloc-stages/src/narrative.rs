//! Narrative shaping: picks a paragraph plan for the ranked locations, asks
//! the text generator for prose and cleans up what comes back.
//!
//! When the generator gives nothing usable the narrative is rendered locally
//! from the same plan, so a reasoning run always ends with an answer.
use std::sync::Arc;

use async_trait::async_trait;
use geoloc_core::collaborators::is_sentinel;
use geoloc_core::{
    ChatMessage, DetectedObject, LocationPair, MatchSupport, PipelineOptions, PipelineState,
    Stage, StageError, TextGenerator,
};
use geoloc_out::{names, normalize_narrative, RenderError, TemplateRenderer};
use serde::Serialize;
use serde_json::json;

const STAGE_ID: &str = "narrate.locations.v1";

/// How many paragraphs the narrative carries, from the ranked list length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParagraphPlan {
    NoResult,
    Single,
    Double,
    Triple,
}

impl ParagraphPlan {
    pub fn for_count(count: usize) -> Self {
        match count {
            0 => ParagraphPlan::NoResult,
            1 => ParagraphPlan::Single,
            2 => ParagraphPlan::Double,
            _ => ParagraphPlan::Triple,
        }
    }

    pub fn paragraph_count(&self) -> usize {
        match self {
            ParagraphPlan::NoResult => 0,
            ParagraphPlan::Single => 1,
            ParagraphPlan::Double => 2,
            ParagraphPlan::Triple => 3,
        }
    }
}

/// Framing of one paragraph, by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    MostLikely,
    Alternatively,
    AnotherPossibility,
}

impl Framing {
    pub fn for_slot(slot: usize) -> Self {
        match slot {
            0 => Framing::MostLikely,
            1 => Framing::Alternatively,
            _ => Framing::AnotherPossibility,
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            Framing::MostLikely => "most likely",
            Framing::Alternatively => "alternatively",
            Framing::AnotherPossibility => "another possibility",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Framing::MostLikely => "describe the most likely location",
            Framing::Alternatively => "describe the alternative location, opening with \"Alternatively\"",
            Framing::AnotherPossibility => {
                "describe the remaining possibility, opening with \"Another possibility\""
            }
        }
    }

    fn lead(&self) -> &'static str {
        match self {
            Framing::MostLikely => "The photo was most likely taken near",
            Framing::Alternatively => "Alternatively, it may have been taken near",
            Framing::AnotherPossibility => "Another possibility is the area around",
        }
    }
}

/// Template data for one paragraph.
#[derive(Debug, Clone, Serialize)]
struct ParagraphData<'a> {
    slot: usize,
    framing: &'static str,
    instruction: &'static str,
    lead: &'static str,
    support: MatchSupport,
    high_support: bool,
    match_count: usize,
    distance: f64,
    name_a: &'a str,
    address_a: &'a str,
    name_b: &'a str,
    address_b: &'a str,
}

impl<'a> ParagraphData<'a> {
    fn new(index: usize, pair: &'a LocationPair) -> Self {
        let framing = Framing::for_slot(index);
        let support = pair.support();
        Self {
            slot: index + 1,
            framing: framing.phrase(),
            instruction: framing.instruction(),
            lead: framing.lead(),
            support,
            high_support: support == MatchSupport::High,
            match_count: pair.match_count,
            distance: pair.distance_meters,
            name_a: &pair.name_a,
            address_a: &pair.address_a,
            name_b: &pair.name_b,
            address_b: &pair.address_b,
        }
    }
}

#[derive(Debug, Serialize)]
struct ObjectData<'a> {
    label: &'a str,
    confidence: f64,
}

/// What the shaper produced for a ranked list.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativePrompt {
    /// Nothing to narrate; the message is the final answer.
    NoResult { message: String },
    Generate {
        plan: ParagraphPlan,
        messages: Vec<ChatMessage>,
        fallback: String,
    },
}

pub struct NarrativeShaper {
    renderer: Arc<TemplateRenderer<'static>>,
    generator: Arc<dyn TextGenerator>,
    options: PipelineOptions,
}

impl NarrativeShaper {
    pub fn new(
        renderer: Arc<TemplateRenderer<'static>>,
        generator: Arc<dyn TextGenerator>,
        options: &PipelineOptions,
    ) -> Self {
        Self {
            renderer,
            generator,
            options: options.clone(),
        }
    }

    /// Builds the generator messages, or the fixed reply when nothing was
    /// ranked.
    pub fn shape(
        &self,
        ranked: &[LocationPair],
        objects: &[DetectedObject],
    ) -> Result<NarrativePrompt, RenderError> {
        let plan = ParagraphPlan::for_count(ranked.len());
        if plan == ParagraphPlan::NoResult {
            let message = self.render(names::NO_RESULT, &json!({}))?;
            return Ok(NarrativePrompt::NoResult { message });
        }

        let paragraphs: Vec<ParagraphData> = ranked
            .iter()
            .take(plan.paragraph_count())
            .enumerate()
            .map(|(i, pair)| ParagraphData::new(i, pair))
            .collect();

        let summary_objects: Vec<ObjectData> = objects
            .iter()
            .filter(|o| !self.options.is_reference(o))
            .filter(|o| o.confidence > self.options.match_confidence_threshold)
            .map(|o| ObjectData {
                label: &o.label,
                confidence: o.confidence,
            })
            .collect();
        let objects_summary =
            self.render(names::OBJECTS_SUMMARY, &json!({ "objects": summary_objects }))?;

        let data = json!({
            "paragraph_count": plan.paragraph_count(),
            "paragraphs": paragraphs,
            "objects_summary": objects_summary,
        });

        let system = self.render(names::SYSTEM_PROMPT, &data)?;
        let request = self.render(names::NARRATIVE_REQUEST, &data)?;
        let fallback = normalize_narrative(&self.render(names::FALLBACK_NARRATIVE, &data)?);

        Ok(NarrativePrompt::Generate {
            plan,
            messages: vec![ChatMessage::system(system), ChatMessage::user(request)],
            fallback,
        })
    }

    /// Final narrative for the run. Generator failures fall back to the
    /// locally rendered text and are recorded on the state.
    pub async fn narrate(&self, state: &mut PipelineState) -> Result<String, RenderError> {
        let (plan, messages, fallback) = match self.shape(&state.ranked, &state.objects)? {
            NarrativePrompt::NoResult { message } => return Ok(message),
            NarrativePrompt::Generate {
                plan,
                messages,
                fallback,
            } => (plan, messages, fallback),
        };

        tracing::debug!(
            trace_id = %state.trace_id,
            paragraphs = plan.paragraph_count(),
            "requesting narrative"
        );

        let failure = match self.generator.generate(&messages).await {
            Ok(reply) if is_sentinel(&reply) => reply,
            Ok(reply) => {
                let text = normalize_narrative(&reply);
                if !text.is_empty() {
                    return Ok(text);
                }
                "empty reply".to_string()
            }
            Err(err) => err.to_string(),
        };

        tracing::warn!(
            trace_id = %state.trace_id,
            generator = %self.generator.name(),
            error = %failure,
            "generator gave no usable narrative, using fallback"
        );
        state.record_failure(STAGE_ID, self.generator.name(), failure);
        Ok(fallback)
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, RenderError> {
        self.renderer.render(name, data).map_err(RenderError::Render)
    }
}

pub struct NarrateStage {
    shaper: NarrativeShaper,
}

impl NarrateStage {
    pub fn new(shaper: NarrativeShaper) -> Self {
        Self { shaper }
    }
}

#[async_trait]
impl Stage for NarrateStage {
    fn id(&self) -> &'static str {
        STAGE_ID
    }

    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        let narrative = self
            .shaper
            .narrate(&mut state)
            .await
            .map_err(|e| StageError::ExecutionFailed(e.to_string()))?;
        state.narrative = Some(narrative);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::collaborators::NO_VALID_RESPONSE;
    use geoloc_core::{ChatRole, GeolocError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: Result<String, String>,
        calls: AtomicUsize,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, GeolocError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .map_err(|m| GeolocError::collaborator("canned", m))
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn shaper(generator: Arc<Canned>) -> NarrativeShaper {
        let renderer = Arc::new(geoloc_out::default_renderer().unwrap());
        NarrativeShaper::new(renderer, generator, &PipelineOptions::default())
    }

    fn pair(name_a: &str, name_b: &str, distance: f64, match_count: usize) -> LocationPair {
        LocationPair {
            name_a: name_a.into(),
            address_a: format!("{} road", name_a),
            name_b: name_b.into(),
            address_b: format!("{} street", name_b),
            distance_meters: distance,
            match_count,
        }
    }

    #[test]
    fn test_plan_for_count() {
        assert_eq!(ParagraphPlan::for_count(0), ParagraphPlan::NoResult);
        assert_eq!(ParagraphPlan::for_count(1).paragraph_count(), 1);
        assert_eq!(ParagraphPlan::for_count(2).paragraph_count(), 2);
        assert_eq!(ParagraphPlan::for_count(3).paragraph_count(), 3);
        assert_eq!(ParagraphPlan::for_count(7), ParagraphPlan::Triple);
    }

    #[test]
    fn test_shape_two_paragraphs() {
        let shaper = shaper(Canned::ok("unused"));
        let ranked = vec![pair("Tower", "Bridge", 42.0, 2), pair("Mall", "Hotel", 12.0, 0)];
        let objects = vec![
            DetectedObject::new("Tower", 0.9, [0.0; 4]),
            DetectedObject::new("夕阳", 0.95, [0.0; 4]),
        ];

        let NarrativePrompt::Generate { plan, messages, fallback } =
            shaper.shape(&ranked, &objects).unwrap()
        else {
            panic!("expected a generation prompt");
        };

        assert_eq!(plan, ParagraphPlan::Double);
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("exactly 2 paragraph(s)"));
        assert!(messages[0].content.contains("Paragraph 2: describe the alternative location"));
        assert!(!messages[0].content.contains("Paragraph 3"));

        let request = &messages[1].content;
        assert!(request.contains("1. Tower (confidence: 90%)"));
        assert!(!request.contains("夕阳"));
        assert!(request.contains("Option 1 (most likely; object-match support: high, matches 2 detected objects; distance: 42m)"));
        assert!(request.contains("Option 2 (alternatively; object-match support: low, no direct object match; distance: 12m)"));
        assert!(request.contains("  - Bridge (Bridge street)"));

        assert_eq!(fallback.split("\n\n").count(), 2);
        assert!(fallback.starts_with("The photo was most likely taken near Tower (Tower road)"));
        assert!(fallback.contains("Alternatively, it may have been taken near Mall"));
    }

    #[tokio::test]
    async fn test_no_result_skips_generator() {
        let generator = Canned::ok("should not be used");
        let shaper = shaper(generator.clone());
        let mut state = PipelineState::new("where?", Some("img.jpg".into()));

        let text = shaper.narrate(&mut state).await.unwrap();

        assert_eq!(text, "No location information could be determined from the image.");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generated_text_is_normalized() {
        let shaper = shaper(Canned::ok("  Most likely near   the Tower.  Most likely near the Tower!\n\n\nAlternatively the Mall"));
        let mut state = PipelineState::new("where?", Some("img.jpg".into()));
        state.ranked = vec![pair("Tower", "Bridge", 42.0, 1), pair("Mall", "Hotel", 12.0, 0)];

        let text = shaper.narrate(&mut state).await.unwrap();

        assert_eq!(text, "Most likely near the Tower.\n\nAlternatively the Mall.");
        assert!(state.failures.is_empty());
    }

    #[tokio::test]
    async fn test_sentinel_falls_back() {
        let shaper = shaper(Canned::ok(NO_VALID_RESPONSE));
        let mut state = PipelineState::new("where?", Some("img.jpg".into()));
        state.ranked = vec![pair("Tower", "Bridge", 42.0, 1)];

        let text = shaper.narrate(&mut state).await.unwrap();

        assert!(text.starts_with("The photo was most likely taken near Tower"));
        assert!(text.contains("backed by 1 of the detected objects"));
        assert_eq!(state.failures.len(), 1);
        assert_eq!(state.failures[0].stage, STAGE_ID);
    }

    #[tokio::test]
    async fn test_generator_error_falls_back() {
        let shaper = shaper(Canned::err("503"));
        let mut state = PipelineState::new("where?", Some("img.jpg".into()));
        state.ranked = vec![pair("Tower", "Bridge", 42.0, 0)];

        let text = shaper.narrate(&mut state).await.unwrap();

        assert!(text.contains("treat it with caution"));
        assert!(state.failures[0].message.contains("503"));
    }
}
