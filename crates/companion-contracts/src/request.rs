use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ModelSpec, CAP_I2I, CAP_I2V, CAP_T2I, CAP_T2V};

pub const MIN_VIDEO_DURATION: i64 = 1;
pub const MAX_VIDEO_DURATION: i64 = 32;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    Chat,
    SelfieImage,
    SelfieVideo,
    AdvancedImage,
    AdvancedVideo,
}

impl Flow {
    pub fn label(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::SelfieImage => "selfie-image",
            Self::SelfieVideo => "selfie-video",
            Self::AdvancedImage => "advanced-image",
            Self::AdvancedVideo => "advanced-video",
        }
    }

    /// Heading that prefixes a failure message so the user knows which flow
    /// broke.
    pub fn failure_heading(self) -> &'static str {
        match self {
            Self::Chat => "Chat Failed",
            Self::SelfieImage => "Selfie Failed",
            Self::SelfieVideo => "Simple Selfie Video Failed",
            Self::AdvancedImage => "Advanced Image Failed",
            Self::AdvancedVideo => "Advanced Video Failed",
        }
    }

    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            Self::Chat => None,
            Self::SelfieImage | Self::AdvancedImage => Some(ArtifactKind::Image),
            Self::SelfieVideo | Self::AdvancedVideo => Some(ArtifactKind::Video),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationMode {
    #[serde(rename = "t2i")]
    TextToImage,
    #[serde(rename = "i2i")]
    ImageToImage,
    #[serde(rename = "t2v")]
    TextToVideo,
    #[serde(rename = "i2v")]
    ImageToVideo,
}

impl GenerationMode {
    pub fn capability(self) -> &'static str {
        match self {
            Self::TextToImage => CAP_T2I,
            Self::ImageToImage => CAP_I2I,
            Self::TextToVideo => CAP_T2V,
            Self::ImageToVideo => CAP_I2V,
        }
    }

    pub fn requires_source(self) -> bool {
        matches!(self, Self::ImageToImage | Self::ImageToVideo)
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::TextToVideo | Self::ImageToVideo)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TextToImage => "Text-to-Image",
            Self::ImageToImage => "Image-to-Image",
            Self::TextToVideo => "Text-to-Video",
            Self::ImageToVideo => "Image-to-Video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatio {
    Landscape,
    Portrait,
    Square,
    Classic,
    ClassicPortrait,
    Ultrawide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 6] = [
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Square,
        AspectRatio::Classic,
        AspectRatio::ClassicPortrait,
        AspectRatio::Ultrawide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Square => "1:1",
            Self::Classic => "4:3",
            Self::ClassicPortrait => "3:4",
            Self::Ultrawide => "21:9",
        }
    }

    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|ratio| ratio.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                format!(
                    "Invalid aspect ratio '{trimmed}'. Supported: {}",
                    Self::supported_list()
                )
            })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => IMAGE_EXTENSIONS,
            Self::Video => VIDEO_EXTENSIONS,
        }
    }

    /// Checks a returned artifact path, naming the offending extension.
    pub fn check_path(self, path: &str) -> Result<(), String> {
        let extension = artifact_extension(path);
        match extension.as_deref() {
            Some(ext) if self.allowed_extensions().contains(&ext) => Ok(()),
            Some(ext) => Err(format!(
                "Unexpected .{ext} artifact '{path}'. Expected one of: {}",
                self.allowed_extensions().join(", ")
            )),
            None => Err(format!(
                "Artifact '{path}' has no file extension. Expected one of: {}",
                self.allowed_extensions().join(", ")
            )),
        }
    }
}

pub fn artifact_extension(path: &str) -> Option<String> {
    Path::new(path.trim())
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Model metadata attached to chat payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub model_id: String,
    pub provider: String,
    pub context_window: Option<u64>,
    pub max_output_limit: Option<u64>,
    pub cost_input: Option<f64>,
    pub cost_output: Option<f64>,
}

impl From<&ModelSpec> for ModelConfig {
    fn from(spec: &ModelSpec) -> Self {
        Self {
            model_id: spec.name.clone(),
            provider: spec.provider.clone(),
            context_window: spec.context_window,
            max_output_limit: spec.max_output_tokens,
            cost_input: spec.cost_input,
            cost_output: spec.cost_output,
        }
    }
}

/// Descriptor sent with requests that target a user-defined endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomModel {
    pub id: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub custom_payload: Option<Value>,
}

impl CustomModel {
    pub fn from_spec(spec: &ModelSpec) -> Option<Self> {
        if !spec.is_custom() {
            return None;
        }
        let id = spec
            .name
            .strip_prefix("custom:")
            .unwrap_or(spec.name.as_str())
            .to_string();
        Some(Self {
            id,
            name: spec.label().to_string(),
            endpoint: spec.endpoint.clone(),
            custom_payload: spec.custom_payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelRegistry;

    #[test]
    fn all_six_aspect_ratios_parse_and_others_fail() {
        for raw in ["16:9", "9:16", "1:1", "4:3", "3:4", "21:9"] {
            let parsed: Result<AspectRatio, _> = raw.parse();
            assert_eq!(parsed.map(|ratio| ratio.as_str()), Ok(raw));
        }
        for raw in ["2:1", "", "16x9", "32:9"] {
            let err = raw.parse::<AspectRatio>().err().unwrap_or_default();
            assert!(err.contains("16:9, 9:16, 1:1, 4:3, 3:4, 21:9"), "{err}");
        }
    }

    #[test]
    fn artifact_extensions_are_checked_case_insensitively() {
        assert!(ArtifactKind::Video.check_path("/tmp/OUT.MP4").is_ok());
        assert!(ArtifactKind::Image.check_path("shot.jpeg").is_ok());
        let err = ArtifactKind::Video
            .check_path("out.txt")
            .err()
            .unwrap_or_default();
        assert!(err.contains(".txt"));
        assert!(ArtifactKind::Image.check_path("noext").is_err());
        assert!(ArtifactKind::Image.check_path("clip.mp4").is_err());
    }

    #[test]
    fn flows_map_to_artifact_kinds() {
        assert_eq!(Flow::Chat.artifact_kind(), None);
        assert_eq!(Flow::SelfieVideo.artifact_kind(), Some(ArtifactKind::Video));
        assert_eq!(Flow::AdvancedImage.failure_heading(), "Advanced Image Failed");
        assert_eq!(GenerationMode::ImageToVideo.capability(), "i2v");
        assert!(GenerationMode::ImageToImage.requires_source());
    }

    #[test]
    fn custom_model_descriptor_strips_prefix() {
        let mut registry = ModelRegistry::new(None);
        let mut spec = registry
            .get("google/veo-3.0-fast")
            .cloned()
            .unwrap_or_else(|| panic!("missing veo"));
        spec.name = "custom:studio".to_string();
        spec.provider = "custom".to_string();
        spec.endpoint = Some("https://studio.local".to_string());
        registry.merge(vec![spec.clone()]);

        let custom = CustomModel::from_spec(&spec).unwrap_or_else(|| panic!("not custom"));
        assert_eq!(custom.id, "studio");
        assert_eq!(custom.endpoint.as_deref(), Some("https://studio.local"));

        let stock = registry.get("gpt-4o-mini").cloned();
        assert!(stock.and_then(|spec| CustomModel::from_spec(&spec)).is_none());
    }
}
