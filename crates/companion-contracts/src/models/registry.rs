use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CAP_TEXT: &str = "text";
pub const CAP_T2I: &str = "t2i";
pub const CAP_I2I: &str = "i2i";
pub const CAP_T2V: &str = "t2v";
pub const CAP_I2V: &str = "i2v";

/// Resolution assumed for video models that do not declare a list.
pub const DEFAULT_VIDEO_RESOLUTION: &str = "720p";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRange {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuidanceRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub context_window: Option<u64>,
    #[serde(default)]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub cost_input: Option<f64>,
    #[serde(default)]
    pub cost_output: Option<f64>,
    #[serde(default)]
    pub cost_per_image: Option<f64>,
    #[serde(default)]
    pub cost_per_second: Option<f64>,
    #[serde(default)]
    pub steps: Option<StepRange>,
    #[serde(default)]
    pub guidance: Option<GuidanceRange>,
    #[serde(default)]
    pub supported_resolutions: Vec<String>,
    #[serde(default)]
    pub default_resolution: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub custom_payload: Option<Value>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.name.as_str())
    }

    pub fn is_video(&self) -> bool {
        self.supports(CAP_T2V) || self.supports(CAP_I2V)
    }

    pub fn is_custom(&self) -> bool {
        self.provider == "custom"
    }

    /// Resolutions accepted by a video model; undeclared lists mean 720p only.
    pub fn video_resolutions(&self) -> Vec<String> {
        if self.supported_resolutions.is_empty() {
            return vec![DEFAULT_VIDEO_RESOLUTION.to_string()];
        }
        self.supported_resolutions.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }

    /// Inserts or replaces catalog entries, keeping the original position of
    /// replaced models.
    pub fn merge(&mut self, overrides: Vec<ModelSpec>) {
        for spec in overrides {
            self.models.insert(spec.name.clone(), spec);
        }
    }
}

/// Reads a JSON array of model specs used to extend the built-in catalog.
pub fn load_model_overrides(path: &Path) -> anyhow::Result<Vec<ModelSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading model catalog {}", path.display()))?;
    let specs: Vec<ModelSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid model catalog {}", path.display()))?;
    Ok(specs)
}

fn base_spec(name: &str, display_name: &str, provider: &str, capabilities: &[&str]) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        display_name: Some(display_name.to_string()),
        provider: provider.to_string(),
        capabilities: capabilities
            .iter()
            .map(|item| (*item).to_string())
            .collect(),
        context_window: None,
        max_output_tokens: None,
        cost_input: None,
        cost_output: None,
        cost_per_image: None,
        cost_per_second: None,
        steps: None,
        guidance: None,
        supported_resolutions: Vec::new(),
        default_resolution: None,
        endpoint: None,
        custom_payload: None,
    }
}

fn text_model(
    name: &str,
    display_name: &str,
    provider: &str,
    context_window: u64,
    max_output_tokens: u64,
    cost: (f64, f64),
) -> ModelSpec {
    ModelSpec {
        context_window: Some(context_window),
        max_output_tokens: Some(max_output_tokens),
        cost_input: Some(cost.0),
        cost_output: Some(cost.1),
        ..base_spec(name, display_name, provider, &[CAP_TEXT])
    }
}

fn image_model(
    name: &str,
    display_name: &str,
    provider: &str,
    capabilities: &[&str],
    cost_per_image: f64,
    steps: (u32, u32, u32),
    guidance_default: f64,
) -> ModelSpec {
    ModelSpec {
        cost_per_image: Some(cost_per_image),
        steps: Some(StepRange {
            min: steps.0,
            max: steps.1,
            default: steps.2,
        }),
        guidance: Some(GuidanceRange {
            min: 1.0,
            max: 20.0,
            default: guidance_default,
        }),
        ..base_spec(name, display_name, provider, capabilities)
    }
}

fn video_model(
    name: &str,
    display_name: &str,
    provider: &str,
    capability: &str,
    cost_per_second: f64,
    resolutions: &[&str],
) -> ModelSpec {
    ModelSpec {
        cost_per_second: Some(cost_per_second),
        steps: Some(StepRange {
            min: 10,
            max: 50,
            default: 20,
        }),
        guidance: Some(GuidanceRange {
            min: 3.5,
            max: 15.0,
            default: 7.0,
        }),
        supported_resolutions: resolutions.iter().map(|item| (*item).to_string()).collect(),
        default_resolution: (!resolutions.is_empty()).then(|| DEFAULT_VIDEO_RESOLUTION.to_string()),
        ..base_spec(name, display_name, provider, &[capability])
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();
    let mut insert = |spec: ModelSpec| {
        map.insert(spec.name.clone(), spec);
    };

    insert(text_model(
        "dryrun-text-1",
        "Dryrun Text",
        "dryrun",
        8192,
        4096,
        (0.0, 0.0),
    ));
    insert(text_model(
        "gpt-4o-mini",
        "GPT-4o mini",
        "openai",
        128000,
        16384,
        (0.15, 0.6),
    ));
    insert(text_model(
        "gpt-4.1",
        "GPT-4.1",
        "openai",
        1047576,
        32768,
        (2.0, 8.0),
    ));
    insert(text_model(
        "deepseek-chat",
        "DeepSeek V3",
        "openai",
        64000,
        8192,
        (0.27, 1.1),
    ));

    insert(image_model(
        "dryrun-image-1",
        "Dryrun Image",
        "dryrun",
        &[CAP_T2I, CAP_I2I],
        0.0,
        (1, 50, 4),
        3.5,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-schnell-Free",
        "Together FLUX.1 Schnell (Free)",
        "togetherai",
        &[CAP_T2I],
        0.0,
        (1, 10, 4),
        3.5,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-schnell",
        "Together FLUX.1 Schnell (Turbo)",
        "togetherai",
        &[CAP_T2I],
        0.003,
        (1, 10, 5),
        3.5,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-dev",
        "Together FLUX.1 Dev (Standard)",
        "togetherai",
        &[CAP_T2I],
        0.025,
        (1, 28, 5),
        3.5,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-kontext-dev",
        "FLUX.1 Kontext [dev] (I2I Only)",
        "togetherai",
        &[CAP_I2I],
        0.025,
        (10, 28, 20),
        7.0,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-kontext-pro",
        "FLUX.1 Kontext [pro] (I2I Only)",
        "togetherai",
        &[CAP_I2I],
        0.040,
        (10, 50, 25),
        7.0,
    ));
    insert(image_model(
        "black-forest-labs/FLUX.1-kontext-max",
        "FLUX.1 Kontext [max] (I2I Only)",
        "togetherai",
        &[CAP_I2I],
        0.080,
        (10, 100, 30),
        7.0,
    ));

    insert(ModelSpec {
        capabilities: vec![CAP_T2V.to_string(), CAP_I2V.to_string()],
        ..video_model(
            "dryrun-video-1",
            "Dryrun Video",
            "dryrun",
            CAP_T2V,
            0.0,
            &["360p", "720p", "1080p"],
        )
    });
    insert(video_model(
        "aiml/pixverse/v5-full-t2v",
        "PixVerse V5 T2V (Text-to-Video)",
        "AIML:v2/generate/video/pixverse/generation",
        CAP_T2V,
        0.015,
        &["360p", "720p", "1080p"],
    ));
    insert(video_model(
        "aiml/pixverse/v5-full-i2v",
        "PixVerse V5 I2V (Image-to-Video)",
        "AIML:v2/generate/video/pixverse/generation",
        CAP_I2V,
        0.018,
        &["720p"],
    ));
    insert(video_model(
        "openai/sora-2-t2v",
        "Sora 2 T2V (Text)",
        "AIML:v2/video/generations",
        CAP_T2V,
        0.05,
        &[],
    ));
    insert(video_model(
        "openai/sora-2-i2v",
        "Sora 2 I2V (Image)",
        "AIML:v2/video/generations",
        CAP_I2V,
        0.05,
        &[],
    ));
    insert(video_model(
        "google/veo-3.0-fast",
        "Google Veo 3 Fast (T2V)",
        "AIML:v2/generate/video/google/generation",
        CAP_T2V,
        0.02,
        &[],
    ));
    insert(video_model(
        "google/veo-3.0-i2v-fast",
        "Google Veo 3 Fast (I2V)",
        "AIML:v2/generate/video/google/generation",
        CAP_I2V,
        0.02,
        &[],
    ));
    insert(video_model(
        "kling-video/v1.6/standard/text-to-video",
        "Kling V1.6 T2V",
        "AIML:v2/generate/video/kling/generation",
        CAP_T2V,
        0.01,
        &[],
    ));
    insert(video_model(
        "kling-video/v1.6/standard/image-to-video",
        "Kling V1.6 I2V",
        "AIML:v2/generate/video/kling/generation",
        CAP_I2V,
        0.01,
        &[],
    ));

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kontext_models_are_image_to_image_only() {
        let registry = ModelRegistry::new(None);
        let kontext = registry
            .get("black-forest-labs/FLUX.1-kontext-pro")
            .cloned()
            .unwrap_or_else(|| panic!("missing kontext model"));
        assert!(kontext.supports(CAP_I2I));
        assert!(!kontext.supports(CAP_T2I));
        assert_eq!(kontext.steps.map(|range| range.max), Some(50));
    }

    #[test]
    fn video_models_without_resolution_list_default_to_720p() {
        let registry = ModelRegistry::new(None);
        let sora = registry.get("openai/sora-2-t2v").cloned();
        assert_eq!(
            sora.map(|spec| spec.video_resolutions()),
            Some(vec!["720p".to_string()])
        );

        let pixverse = registry.get("aiml/pixverse/v5-full-t2v").cloned();
        assert_eq!(
            pixverse.map(|spec| spec.video_resolutions()),
            Some(vec![
                "360p".to_string(),
                "720p".to_string(),
                "1080p".to_string()
            ])
        );
    }

    #[test]
    fn overrides_replace_and_append_models() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("models.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "gpt-4o-mini", "provider": "openai", "capabilities": ["text"], "contextWindow": 4096},
                {"name": "custom:studio", "displayName": "Studio", "provider": "custom",
                 "capabilities": ["t2v"], "endpoint": "https://studio.local/v1", "supportedResolutions": ["1080p"]}
            ]"#,
        )?;

        let mut registry = ModelRegistry::new(None);
        let first_before = registry.list().next().map(|spec| spec.name.clone());
        registry.merge(load_model_overrides(&path)?);

        assert_eq!(
            registry.get("gpt-4o-mini").and_then(|spec| spec.context_window),
            Some(4096)
        );
        let studio = registry
            .get("custom:studio")
            .cloned()
            .unwrap_or_else(|| panic!("override not merged"));
        assert!(studio.is_custom());
        assert_eq!(studio.label(), "Studio");
        assert_eq!(studio.video_resolutions(), vec!["1080p".to_string()]);
        assert_eq!(
            registry.list().next().map(|spec| spec.name.clone()),
            first_before
        );
        Ok(())
    }

    #[test]
    fn malformed_override_file_reports_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{not json")?;
        let err = load_model_overrides(&path)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("broken.json"));
        Ok(())
    }
}
