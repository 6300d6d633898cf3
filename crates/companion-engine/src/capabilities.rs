//! Boundary to the backend that does the actual generation work.
//!
//! Every trait here is implemented by something outside the orchestrator:
//! the local `dryrun` backend, the OpenAI-compatible text backend, or a test
//! double. Payloads are the normalized requests produced by the builder.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use companion_contracts::conversation::ConversationTurn;
use companion_contracts::prompts::CharacterProfile;
use companion_contracts::request::{AspectRatio, CustomModel, GenerationMode, ModelConfig};

use crate::error::IndexingError;
use crate::progress::ProgressHub;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub history: Vec<ConversationTurn>,
    pub user_name: String,
    pub persona: String,
    pub model_config: ModelConfig,
    pub temperature: f64,
    pub history_token_limit: u64,
    pub knowledge_token_limit: u64,
    pub output_reservation: u64,
    pub recent_turns_count: u64,
    pub context_canvas_files: IndexMap<String, String>,
    pub attached_file_content: Option<String>,
    pub modifiers: Vec<String>,
}

/// Asks the text model for the scene half of a selfie video prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePromptPayload {
    pub suggestion: String,
    pub user_name: String,
    pub persona: String,
    pub recent_history: Vec<ConversationTurn>,
    pub character: CharacterProfile,
    #[serde(default)]
    pub custom_attire: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfieImagePayload {
    pub suggestion: String,
    pub custom_attire: Option<String>,
    pub character: CharacterProfile,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfieVideoPayload {
    pub scene_prompt: String,
    pub custom_attire: Option<String>,
    pub is_selfie: bool,
    pub seed: i64,
    pub aspect_ratio: AspectRatio,
    pub model_id: String,
    /// Tags progress events published for this request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedImagePayload {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model_id: String,
    pub mode: GenerationMode,
    pub width: u32,
    pub height: u32,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
    pub i2i_image_url: Option<String>,
    pub custom_model: Option<CustomModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedVideoPayload {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model_id: String,
    pub mode: GenerationMode,
    pub aspect_ratio: AspectRatio,
    pub resolution: String,
    pub duration: u32,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub custom_payload: Option<Value>,
    pub i2v_image_url: Option<String>,
    pub custom_model: Option<CustomModel>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum TextRequest {
    Chat(ChatPayload),
    VideoScene(ScenePromptPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum ImageRequest {
    Selfie(SelfieImagePayload),
    Advanced(AdvancedImagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum VideoRequest {
    Selfie(SelfieVideoPayload),
    Advanced(AdvancedVideoPayload),
}

impl VideoRequest {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Selfie(payload) => &payload.request_id,
            Self::Advanced(payload) => &payload.request_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TextResponse {
    pub answer: Option<String>,
    pub thinking: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub suggestion: Option<String>,
}

impl TextResponse {
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageResponse {
    pub success: bool,
    pub file_paths: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoResponse {
    pub success: bool,
    pub file_path: Option<String>,
    pub error: Option<String>,
}

/// Record handed to the retrieval index after a completed exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: String,
    pub history: Vec<ConversationTurn>,
    pub persona: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: &TextRequest) -> anyhow::Result<TextResponse>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> anyhow::Result<ImageResponse>;
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn generate_video(&self, request: &VideoRequest) -> anyhow::Result<VideoResponse>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Resolves once the artifact at `path` is fully written.
    async fn await_ready(&self, path: &str) -> anyhow::Result<()>;
    /// Source usable by the display layer (`file://...`).
    async fn display_source(&self, path: &str) -> anyhow::Result<String>;
    /// Embeds a local file as `data:<mime>;base64,...`.
    async fn read_data_url(&self, path: &Path) -> anyhow::Result<String>;
}

#[async_trait]
pub trait TurnIndexer: Send + Sync {
    async fn save_turn(&self, record: &TurnRecord) -> Result<(), IndexingError>;
}

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u64;
}

/// The full set of collaborators an orchestrator drives.
#[derive(Clone)]
pub struct Capabilities {
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
    pub video: Arc<dyn VideoGenerator>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub indexer: Arc<dyn TurnIndexer>,
    pub tokens: Arc<dyn TokenCounter>,
    pub progress: ProgressHub,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn responses_tolerate_missing_fields() -> anyhow::Result<()> {
        let image: ImageResponse = serde_json::from_value(json!({"success": true}))?;
        assert!(image.file_paths.is_empty());
        let video: VideoResponse =
            serde_json::from_value(json!({"success": true, "filePath": "out.mp4"}))?;
        assert_eq!(video.file_path.as_deref(), Some("out.mp4"));
        let text: TextResponse = serde_json::from_value(json!({
            "error": "SCENE_PROMPT_FAILED",
            "message": "blocked",
            "suggestion": "rephrase"
        }))?;
        assert_eq!(text.error.as_deref(), Some("SCENE_PROMPT_FAILED"));
        assert!(text.answer.is_none());
        Ok(())
    }

    #[test]
    fn video_request_serializes_with_kind_tag() -> anyhow::Result<()> {
        let request = VideoRequest::Selfie(SelfieVideoPayload {
            scene_prompt: "waving on a pier".to_string(),
            custom_attire: None,
            is_selfie: true,
            seed: 0,
            aspect_ratio: AspectRatio::Landscape,
            model_id: "dryrun-video-1".to_string(),
            request_id: "selfie-video-1".to_string(),
        });
        let value = serde_json::to_value(&request)?;
        assert_eq!(value["kind"], json!("selfie"));
        assert_eq!(value["payload"]["aspectRatio"], json!("16:9"));
        assert_eq!(value["payload"]["isSelfie"], json!(true));
        assert_eq!(value["payload"]["requestId"], json!("selfie-video-1"));
        assert_eq!(request.request_id(), "selfie-video-1");
        Ok(())
    }
}
