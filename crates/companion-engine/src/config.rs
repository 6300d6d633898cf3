use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use companion_contracts::models::{load_model_overrides, ModelRegistry};

use crate::util::non_empty_env;

pub const DEFAULT_SESSION_DIR: &str = "companion-session";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Runtime settings resolved from `COMPANION_*` and `OPENAI_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub session_dir: PathBuf,
    pub output_dir: PathBuf,
    pub models_path: Option<PathBuf>,
    pub user_name: Option<String>,
    pub persona: Option<String>,
    pub temperature: f64,
    pub openai_api_base: String,
    pub openai_api_key: Option<String>,
    /// Model that writes selfie-video scenes on the OpenAI endpoint.
    pub openai_scene_model: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let session_dir = lookup("COMPANION_SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_DIR));
        let output_dir = lookup("COMPANION_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| session_dir.join("outputs"));
        let temperature = match lookup("COMPANION_TEMPERATURE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("COMPANION_TEMPERATURE is not a number: {raw}"))?
                .clamp(0.0, 2.0),
            None => DEFAULT_TEMPERATURE,
        };
        Ok(Self {
            output_dir,
            models_path: lookup("COMPANION_MODELS_PATH").map(PathBuf::from),
            user_name: lookup("COMPANION_USER_NAME"),
            persona: lookup("COMPANION_PERSONA"),
            temperature,
            openai_api_base: lookup("OPENAI_API_BASE")
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_scene_model: lookup("OPENAI_SCENE_MODEL"),
            session_dir,
        })
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if self.output_dir == self.session_dir.join("outputs") {
            self.output_dir = dir.join("outputs");
        }
        self.session_dir = dir;
        self
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_dir.join("session.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.session_dir.join("settings.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.session_dir.join("events.jsonl")
    }

    pub fn index_path(&self) -> PathBuf {
        self.session_dir.join("turn-index.jsonl")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.session_dir, &self.output_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Built-in catalog with the optional override file merged on top.
    pub fn load_registry(&self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::new(None);
        if let Some(path) = &self.models_path {
            registry.merge(load_overrides(path)?);
        }
        Ok(registry)
    }
}

fn load_overrides(path: &Path) -> Result<Vec<companion_contracts::models::ModelSpec>> {
    load_model_overrides(path)
        .with_context(|| format!("failed to load model overrides from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<EngineConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_hang_off_the_session_dir() -> Result<()> {
        let config = config(&[])?;
        assert_eq!(config.session_dir, PathBuf::from(DEFAULT_SESSION_DIR));
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_SESSION_DIR).join("outputs"));
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.openai_api_base, DEFAULT_OPENAI_API_BASE);
        assert_eq!(config.openai_scene_model, None);

        let moved = config.with_session_dir("/tmp/elsewhere");
        assert_eq!(moved.output_dir, PathBuf::from("/tmp/elsewhere/outputs"));
        assert_eq!(moved.settings_path(), PathBuf::from("/tmp/elsewhere/settings.json"));
        Ok(())
    }

    #[test]
    fn explicit_values_win() -> Result<()> {
        let config = config(&[
            ("COMPANION_SESSION_DIR", "/data/s"),
            ("COMPANION_OUTPUT_DIR", "/data/out"),
            ("COMPANION_TEMPERATURE", "1.25"),
            ("OPENAI_API_BASE", "http://localhost:8080/v1/"),
            ("OPENAI_SCENE_MODEL", "gpt-4.1"),
        ])?;
        assert_eq!(config.openai_scene_model.as_deref(), Some("gpt-4.1"));
        assert_eq!(config.output_dir, PathBuf::from("/data/out"));
        assert_eq!(config.temperature, 1.25);
        assert_eq!(config.openai_api_base, "http://localhost:8080/v1");
        let moved = config.with_session_dir("/data/t");
        assert_eq!(moved.output_dir, PathBuf::from("/data/out"));
        Ok(())
    }

    #[test]
    fn bad_temperature_is_an_error() {
        assert!(config(&[("COMPANION_TEMPERATURE", "warm")]).is_err());
    }

    #[test]
    fn override_file_extends_catalog() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("models.json");
        std::fs::write(
            &path,
            r#"[{"name": "custom:my-video", "provider": "custom", "capabilities": ["t2v"], "endpoint": "http://localhost:9000/gen"}]"#,
        )?;
        let config = config(&[])?;
        let config = EngineConfig {
            models_path: Some(path),
            ..config
        };
        let registry = config.load_registry()?;
        let model = registry.get("custom:my-video");
        assert!(model.map(|model| model.is_custom()).unwrap_or(false));
        assert!(registry.get("dryrun-video-1").is_some());
        Ok(())
    }
}
