//! Intent routing and the chat branch.
use std::sync::Arc;

use async_trait::async_trait;
use geoloc_core::collaborators::exception_sentinel;
use geoloc_core::{
    ChatMessage, GeolocError, Intent, PipelineState, Stage, StageError, TextGenerator,
};

/// Classifier instruction. The reply must be exactly one of the two labels.
pub const INTENT_INSTRUCTION: &str = "You are an intent classification assistant. You can only choose one of the following two labels:
1. chat: daily chatting, greetings, knowledge Q&A
2. reasoning: the user wants to know where a photo was taken, or asks to reason about a location from an image

Please strictly reply with only one label: chat or reasoning. Do not output anything else.";

/// User turn sent to the classifier.
pub fn classification_request(user_text: &str) -> String {
    format!(
        "User input is as follows:\n{}\nPlease determine the user's intent type:",
        user_text
    )
}

pub const CHAT_INSTRUCTION: &str = "You are a helpful assistant.";

/// Reads a classifier reply. Anything but an exact label (after trimming and
/// lowercasing) is ambiguous.
pub fn parse_intent(reply: &str) -> Result<Intent, GeolocError> {
    Intent::from_label(reply)
        .ok_or_else(|| GeolocError::ClassificationAmbiguous(reply.trim().to_string()))
}

pub struct IntentRouter {
    generator: Arc<dyn TextGenerator>,
}

impl IntentRouter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Classifier outcome, errors included.
    pub async fn try_classify(&self, user_text: &str) -> Result<Intent, GeolocError> {
        let messages = [
            ChatMessage::system(INTENT_INSTRUCTION),
            ChatMessage::user(classification_request(user_text)),
        ];
        let reply = self.generator.generate(&messages).await?;
        parse_intent(&reply)
    }

    /// Total: every failure resolves to [`Intent::Chat`].
    pub async fn classify(&self, user_text: &str) -> Intent {
        self.try_classify(user_text).await.unwrap_or(Intent::Chat)
    }
}

pub struct ClassifyIntentStage {
    router: IntentRouter,
}

impl ClassifyIntentStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            router: IntentRouter::new(generator),
        }
    }
}

#[async_trait]
impl Stage for ClassifyIntentStage {
    fn id(&self) -> &'static str {
        "classify.intent.v1"
    }

    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        let intent = match self.router.try_classify(&state.user_text).await {
            Ok(intent) => intent,
            Err(GeolocError::ClassificationAmbiguous(reply)) => {
                tracing::debug!(reply = %reply, "ambiguous intent, defaulting to chat");
                Intent::Chat
            }
            Err(err) => {
                tracing::warn!(trace_id = %state.trace_id, error = %err, "intent classification failed");
                state.record_failure(self.id(), self.router.generator.name(), err.to_string());
                Intent::Chat
            }
        };
        tracing::info!(trace_id = %state.trace_id, intent = %intent, "intent classified");
        state.intent = Some(intent);
        Ok(state)
    }
}

/// Conversational reply for non-location requests.
pub struct ChatResponder {
    generator: Arc<dyn TextGenerator>,
}

impl ChatResponder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for ChatResponder {
    fn id(&self) -> &'static str {
        "respond.chat.v1"
    }

    fn deterministic(&self) -> bool {
        false
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, StageError> {
        let messages = [
            ChatMessage::system(CHAT_INSTRUCTION),
            ChatMessage::user(state.user_text.clone()),
        ];
        let reply = match self.generator.generate(&messages).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(trace_id = %state.trace_id, error = %err, "chat reply failed");
                state.record_failure(self.id(), self.generator.name(), err.to_string());
                exception_sentinel(&err)
            }
        };
        state.chat_response = Some(reply);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoloc_core::ChatRole;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<&'static str, &'static str>,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Scripted {
        fn new(reply: Result<&'static str, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GeolocError> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            self.reply
                .map(str::to_string)
                .map_err(|m| GeolocError::collaborator("scripted", m))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_parse_intent() {
        assert_eq!(parse_intent("reasoning").unwrap(), Intent::Reasoning);
        assert_eq!(parse_intent("  Chat\n").unwrap(), Intent::Chat);
        assert!(matches!(
            parse_intent("maybe"),
            Err(GeolocError::ClassificationAmbiguous(_))
        ));
        assert!(parse_intent("reasoning.").is_err());
    }

    #[tokio::test]
    async fn test_classify_sends_instruction() {
        let generator = Scripted::new(Ok("REASONING"));
        let router = IntentRouter::new(generator.clone());

        assert_eq!(router.classify("Where was this taken?").await, Intent::Reasoning);

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0], ChatMessage::system(INTENT_INSTRUCTION));
        assert_eq!(seen[1].role, ChatRole::User);
        assert_eq!(
            seen[1].content,
            "User input is as follows:\nWhere was this taken?\nPlease determine the user's intent type:"
        );
    }

    #[tokio::test]
    async fn test_unknown_label_is_chat() {
        let router = IntentRouter::new(Scripted::new(Ok("maybe")));
        assert_eq!(router.classify("hello").await, Intent::Chat);
    }

    #[tokio::test]
    async fn test_generator_error_is_chat_and_recorded() {
        let stage = ClassifyIntentStage::new(Scripted::new(Err("unreachable")));
        let state = stage.run(PipelineState::new("hi", None)).await.unwrap();

        assert_eq!(state.intent, Some(Intent::Chat));
        assert_eq!(state.failures.len(), 1);
        assert_eq!(state.failures[0].collaborator, "scripted");
    }

    #[tokio::test]
    async fn test_chat_responder() {
        let generator = Scripted::new(Ok("Hello there!"));
        let stage = ChatResponder::new(generator.clone());
        let state = stage.run(PipelineState::new("hi", None)).await.unwrap();

        assert_eq!(state.chat_response.as_deref(), Some("Hello there!"));
        assert_eq!(generator.seen.lock().unwrap()[0].content, CHAT_INSTRUCTION);
    }

    #[tokio::test]
    async fn test_chat_responder_failure_returns_sentinel() {
        let stage = ChatResponder::new(Scripted::new(Err("timeout")));
        let state = stage.run(PipelineState::new("hi", None)).await.unwrap();

        let reply = state.chat_response.unwrap();
        assert!(geoloc_core::collaborators::is_sentinel(&reply));
        assert!(reply.contains("timeout"));
    }
}
