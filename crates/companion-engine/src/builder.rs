//! Turns form state into validated backend payloads.
//!
//! Checks run in a fixed order and stop at the first failure, so the user
//! always sees the earliest problem with the form. Nothing here talks to a
//! generation backend; the only suspend point is reading an uploaded source
//! image.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use companion_contracts::models::{ModelRegistry, ModelSpec};
use companion_contracts::prompts::{build_prompt_text, PromptKind, PromptShape, SavedPrompt};
use companion_contracts::request::{
    AspectRatio, CustomModel, GenerationMode, MAX_VIDEO_DURATION, MIN_VIDEO_DURATION,
};

use crate::capabilities::{AdvancedImagePayload, AdvancedVideoPayload, ArtifactStore};
use crate::error::{Field, GenerationError, ValidationError};
use crate::util::push_unique_warning;

const MIN_IMAGE_SIDE: u32 = 256;
const MAX_IMAGE_SIDE: u32 = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedVideoForm {
    pub model: String,
    pub mode: GenerationMode,
    pub prompt: String,
    /// Structured prompt fields, used when `prompt` is blank.
    pub prompt_parts: Option<SavedPrompt>,
    pub negative_prompt: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub duration: i64,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub custom_payload: String,
    pub source_image: Option<PathBuf>,
}

impl Default for AdvancedVideoForm {
    fn default() -> Self {
        Self {
            model: String::new(),
            mode: GenerationMode::TextToVideo,
            prompt: String::new(),
            prompt_parts: None,
            negative_prompt: String::new(),
            aspect_ratio: AspectRatio::Landscape.as_str().to_string(),
            resolution: "720p".to_string(),
            duration: 5,
            steps: None,
            guidance_scale: None,
            custom_payload: String::new(),
            source_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedImageForm {
    pub model: String,
    pub mode: GenerationMode,
    pub prompt: String,
    pub prompt_parts: Option<SavedPrompt>,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
    pub source_image: Option<PathBuf>,
}

impl Default for AdvancedImageForm {
    fn default() -> Self {
        Self {
            model: String::new(),
            mode: GenerationMode::TextToImage,
            prompt: String::new(),
            prompt_parts: None,
            negative_prompt: String::new(),
            width: 1024,
            height: 1024,
            steps: None,
            guidance_scale: None,
            seed: None,
            source_image: None,
        }
    }
}

/// A validated payload with the model it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Built<P> {
    pub payload: P,
    pub model: ModelSpec,
    pub warnings: Vec<String>,
    pub source_name: Option<String>,
}

pub fn validate_duration(duration: i64) -> Result<u32, ValidationError> {
    if !(MIN_VIDEO_DURATION..=MAX_VIDEO_DURATION).contains(&duration) {
        return Err(ValidationError::new(
            Field::Duration,
            format!(
                "Duration must be between {MIN_VIDEO_DURATION} and {MAX_VIDEO_DURATION}."
            ),
        ));
    }
    Ok(duration as u32)
}

pub fn validate_aspect_ratio(raw: &str) -> Result<AspectRatio, ValidationError> {
    raw.parse()
        .map_err(|message: String| ValidationError::new(Field::AspectRatio, message))
}

/// Empty means "no custom payload"; anything else must be JSON.
pub fn validate_custom_payload(raw: &str) -> Result<Option<Value>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|_| ValidationError::new(Field::CustomPayload, "Custom payload must be valid JSON."))
}

pub fn validate_resolution(model: &ModelSpec, resolution: &str) -> Result<String, ValidationError> {
    let supported = model.video_resolutions();
    let resolution = resolution.trim();
    if supported.iter().any(|item| item == resolution) {
        return Ok(resolution.to_string());
    }
    Err(ValidationError::new(
        Field::Resolution,
        format!(
            "Selected model does not support {resolution} resolution. Supported: {}",
            supported.join(", ")
        ),
    ))
}

pub fn require_text(raw: &str, message: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(Field::Prompt, message));
    }
    Ok(trimmed.to_string())
}

/// The typed prompt, or the structured parts joined in field order for `kind`.
pub fn compose_prompt(raw: &str, parts: Option<&SavedPrompt>, kind: PromptKind) -> String {
    if !raw.trim().is_empty() {
        return raw.to_string();
    }
    parts
        .map(|parts| {
            build_prompt_text(&SavedPrompt {
                kind,
                prompt_type: Some(PromptShape::Structured),
                ..parts.clone()
            })
        })
        .unwrap_or_default()
}

fn optional_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn clamp_steps(model: &ModelSpec, requested: Option<u32>, warnings: &mut Vec<String>) -> Option<u32> {
    let Some(range) = model.steps else {
        return requested;
    };
    let value = requested.unwrap_or(range.default);
    let clamped = value.clamp(range.min, range.max);
    if clamped != value {
        push_unique_warning(
            warnings,
            format!(
                "steps {value} outside {}..={} for {}; using {clamped}",
                range.min, range.max, model.name
            ),
        );
    }
    Some(clamped)
}

fn clamp_guidance(
    model: &ModelSpec,
    requested: Option<f64>,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    let Some(range) = model.guidance else {
        return requested;
    };
    let value = requested.unwrap_or(range.default);
    let clamped = value.clamp(range.min, range.max);
    if clamped != value {
        push_unique_warning(
            warnings,
            format!(
                "guidance scale {value} outside {}..={} for {}; using {clamped}",
                range.min, range.max, model.name
            ),
        );
    }
    Some(clamped)
}

fn clamp_side(label: &str, value: u32, warnings: &mut Vec<String>) -> u32 {
    let clamped = value.clamp(MIN_IMAGE_SIDE, MAX_IMAGE_SIDE);
    if clamped != value {
        push_unique_warning(
            warnings,
            format!("{label} {value} outside {MIN_IMAGE_SIDE}..={MAX_IMAGE_SIDE}; using {clamped}"),
        );
    }
    clamped
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

pub struct RequestBuilder {
    registry: ModelRegistry,
    artifacts: Arc<dyn ArtifactStore>,
}

impl RequestBuilder {
    pub fn new(registry: ModelRegistry, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            registry,
            artifacts,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Looks up `name` and checks it declares `mode`. Never falls back.
    pub fn resolve_model(&self, name: &str, mode: GenerationMode) -> Result<ModelSpec, GenerationError> {
        let name = name.trim();
        let Some(model) = self.registry.get(name) else {
            return Err(ValidationError::new(Field::Model, format!("Unknown model '{name}'.")).into());
        };
        if !model.supports(mode.capability()) {
            return Err(GenerationError::CapabilityMismatch {
                model: model.name.clone(),
                mode,
            });
        }
        Ok(model.clone())
    }

    pub fn resolve_capability(&self, name: &str, capability: &str) -> Result<ModelSpec, GenerationError> {
        let name = name.trim();
        self.registry
            .ensure(name, capability)
            .ok_or_else(|| {
                ValidationError::new(
                    Field::Model,
                    format!("Model '{name}' is not available for {capability} requests."),
                )
                .into()
            })
    }

    async fn read_source(
        &self,
        mode: GenerationMode,
        source: Option<&PathBuf>,
        missing_message: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Option<(String, String)>, GenerationError> {
        if !mode.requires_source() {
            if source.is_some() {
                push_unique_warning(
                    warnings,
                    format!("source image ignored in {mode} mode"),
                );
            }
            return Ok(None);
        }
        let Some(path) = source else {
            return Err(ValidationError::new(Field::SourceImage, missing_message).into());
        };
        let data_url = self.artifacts.read_data_url(path).await.map_err(|err| {
            ValidationError::new(
                Field::SourceImage,
                format!("Could not read source image {}: {err}", path.display()),
            )
        })?;
        Ok(Some((data_url, file_name(path))))
    }

    pub async fn advanced_video(
        &self,
        form: &AdvancedVideoForm,
    ) -> Result<Built<AdvancedVideoPayload>, GenerationError> {
        let model = self.resolve_model(&form.model, form.mode)?;
        let resolution = validate_resolution(&model, &form.resolution)?;
        let duration = validate_duration(form.duration)?;
        let aspect_ratio = validate_aspect_ratio(&form.aspect_ratio)?;
        let custom_payload = validate_custom_payload(&form.custom_payload)?;
        let custom_model = CustomModel::from_spec(&model);
        let prompt = compose_prompt(&form.prompt, form.prompt_parts.as_ref(), PromptKind::Video);
        let prompt = require_text(&prompt, "Video prompt is required.")?;

        let mut warnings = Vec::new();
        let steps = clamp_steps(&model, form.steps, &mut warnings);
        let guidance_scale = clamp_guidance(&model, form.guidance_scale, &mut warnings);
        let source = self
            .read_source(
                form.mode,
                form.source_image.as_ref(),
                "Image-to-Video mode requires an uploaded image file.",
                &mut warnings,
            )
            .await?;
        let (i2v_image_url, source_name) = source.map_or((None, None), |(url, name)| (Some(url), Some(name)));

        Ok(Built {
            payload: AdvancedVideoPayload {
                prompt,
                negative_prompt: optional_text(&form.negative_prompt),
                model_id: model.name.clone(),
                mode: form.mode,
                aspect_ratio,
                resolution,
                duration,
                steps,
                guidance_scale,
                custom_payload,
                i2v_image_url,
                custom_model,
                request_id: String::new(),
            },
            model,
            warnings,
            source_name,
        })
    }

    pub async fn advanced_image(
        &self,
        form: &AdvancedImageForm,
    ) -> Result<Built<AdvancedImagePayload>, GenerationError> {
        let model = self.resolve_model(&form.model, form.mode)?;
        let mut warnings = Vec::new();
        if form.mode.requires_source() && form.source_image.is_none() {
            return Err(ValidationError::new(
                Field::SourceImage,
                "Please select an image for Image-to-Image mode.",
            )
            .into());
        }
        let prompt = compose_prompt(&form.prompt, form.prompt_parts.as_ref(), PromptKind::Image);
        let prompt = require_text(&prompt, "Please enter a prompt for the image.")?;
        let custom_model = CustomModel::from_spec(&model);
        let steps = clamp_steps(&model, form.steps, &mut warnings);
        let guidance_scale = clamp_guidance(&model, form.guidance_scale, &mut warnings);
        let width = clamp_side("width", form.width, &mut warnings);
        let height = clamp_side("height", form.height, &mut warnings);
        let source = self
            .read_source(
                form.mode,
                form.source_image.as_ref(),
                "Please select an image for Image-to-Image mode.",
                &mut warnings,
            )
            .await?;
        let (i2i_image_url, source_name) = source.map_or((None, None), |(url, name)| (Some(url), Some(name)));

        Ok(Built {
            payload: AdvancedImagePayload {
                prompt,
                negative_prompt: optional_text(&form.negative_prompt),
                model_id: model.name.clone(),
                mode: form.mode,
                width,
                height,
                steps,
                guidance_scale,
                seed: form.seed,
                i2i_image_url,
                custom_model,
            },
            model,
            warnings,
            source_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalArtifactStore;

    fn builder() -> RequestBuilder {
        RequestBuilder::new(ModelRegistry::new(None), Arc::new(LocalArtifactStore::new()))
    }

    fn video_form(model: &str) -> AdvancedVideoForm {
        AdvancedVideoForm {
            model: model.to_string(),
            prompt: "a fox running through snow".to_string(),
            ..AdvancedVideoForm::default()
        }
    }

    #[test]
    fn duration_boundaries() {
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(33).is_err());
        assert_eq!(validate_duration(1), Ok(1));
        assert_eq!(validate_duration(32), Ok(32));
        let err = validate_duration(-4).err().map(|err| err.message);
        assert_eq!(err.as_deref(), Some("Duration must be between 1 and 32."));
    }

    #[test]
    fn aspect_ratio_error_lists_supported_set() {
        let err = validate_aspect_ratio("5:4").err();
        let err = err.unwrap_or_else(|| ValidationError::new(Field::Prompt, ""));
        assert_eq!(err.field, Field::AspectRatio);
        assert!(err.message.contains("16:9, 9:16, 1:1, 4:3, 3:4, 21:9"));
    }

    #[test]
    fn custom_payload_must_parse() {
        assert_eq!(validate_custom_payload("   "), Ok(None));
        assert!(validate_custom_payload("{\"seed\": 3}").is_ok());
        let err = validate_custom_payload("{seed: 3").err().map(|err| err.message);
        assert_eq!(err.as_deref(), Some("Custom payload must be valid JSON."));
    }

    #[tokio::test]
    async fn unsupported_resolution_names_supported_options() {
        let mut form = video_form("openai/sora-2-t2v");
        form.resolution = "1080p".to_string();
        let err = builder().advanced_video(&form).await.err();
        match err {
            Some(GenerationError::Validation(err)) => {
                assert_eq!(err.field, Field::Resolution);
                assert_eq!(
                    err.message,
                    "Selected model does not support 1080p resolution. Supported: 720p"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_to_video_needs_capable_model_and_file() {
        let mut form = video_form("openai/sora-2-t2v");
        form.mode = GenerationMode::ImageToVideo;
        let err = builder().advanced_video(&form).await.err();
        assert!(matches!(
            err,
            Some(GenerationError::CapabilityMismatch { mode: GenerationMode::ImageToVideo, .. })
        ));

        form.model = "openai/sora-2-i2v".to_string();
        let err = builder().advanced_video(&form).await.err();
        assert_eq!(err.and_then(|err| err.field()), Some(Field::SourceImage));
    }

    #[tokio::test]
    async fn image_to_video_embeds_source_as_data_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("still.png");
        std::fs::write(&source, b"\x89PNG")?;

        let mut form = video_form("openai/sora-2-i2v");
        form.mode = GenerationMode::ImageToVideo;
        form.source_image = Some(source);
        form.steps = Some(500);
        let built = builder()
            .advanced_video(&form)
            .await
            .map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!(built.source_name.as_deref(), Some("still.png"));
        assert!(built
            .payload
            .i2v_image_url
            .as_deref()
            .unwrap_or_default()
            .starts_with("data:image/png;base64,"));
        assert_eq!(built.payload.steps, Some(50));
        assert_eq!(built.warnings.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let mut form = video_form("google/veo-3.0-fast");
        form.prompt = "   ".to_string();
        let err = builder().advanced_video(&form).await.err();
        assert_eq!(err.map(|err| err.to_string()).as_deref(), Some("Video prompt is required."));

        let image = AdvancedImageForm {
            model: "black-forest-labs/FLUX.1-dev".to_string(),
            ..AdvancedImageForm::default()
        };
        let err = builder().advanced_image(&image).await.err();
        assert_eq!(
            err.map(|err| err.to_string()).as_deref(),
            Some("Please enter a prompt for the image.")
        );
    }

    #[tokio::test]
    async fn structured_parts_become_the_payload_prompt() -> anyhow::Result<()> {
        let mut form = video_form("google/veo-3.0-fast");
        form.prompt = String::new();
        form.prompt_parts = Some(SavedPrompt {
            character: Some("Nova".to_string()),
            scene: Some("rooftop at dusk".to_string()),
            style: Some("ignored for video".to_string()),
            camera_movement: Some("slow pan".to_string()),
            duration: Some("5s".to_string()),
            ..SavedPrompt::default()
        });
        let built = builder().advanced_video(&form).await?;
        assert_eq!(
            built.payload.prompt,
            "Nova, rooftop at dusk, Camera: slow pan, Duration: 5s"
        );

        let image = AdvancedImageForm {
            model: "black-forest-labs/FLUX.1-dev".to_string(),
            prompt_parts: Some(SavedPrompt {
                scene: Some("neon alley".to_string()),
                style: Some("watercolor".to_string()),
                ..SavedPrompt::default()
            }),
            ..AdvancedImageForm::default()
        };
        let built = builder().advanced_image(&image).await?;
        assert_eq!(built.payload.prompt, "neon alley, watercolor");
        Ok(())
    }

    #[tokio::test]
    async fn typed_prompt_wins_and_blank_parts_still_fail() {
        let parts = SavedPrompt {
            scene: Some("beach".to_string()),
            ..SavedPrompt::default()
        };
        assert_eq!(compose_prompt("a fox", Some(&parts), PromptKind::Video), "a fox");

        let mut form = video_form("google/veo-3.0-fast");
        form.prompt = " ".to_string();
        form.prompt_parts = Some(SavedPrompt {
            scene: Some("   ".to_string()),
            ..SavedPrompt::default()
        });
        let err = builder().advanced_video(&form).await.err();
        assert_eq!(err.map(|err| err.to_string()).as_deref(), Some("Video prompt is required."));
    }

    #[tokio::test]
    async fn kontext_rejects_text_to_image() {
        let image = AdvancedImageForm {
            model: "black-forest-labs/FLUX.1-kontext-max".to_string(),
            prompt: "neon city".to_string(),
            ..AdvancedImageForm::default()
        };
        let err = builder().advanced_image(&image).await.err();
        assert!(matches!(err, Some(GenerationError::CapabilityMismatch { .. })));
    }

    #[tokio::test]
    async fn unknown_model_is_a_field_error() {
        let err = builder().advanced_video(&video_form("nope")).await.err();
        assert_eq!(err.and_then(|err| err.field()), Some(Field::Model));
    }
}
