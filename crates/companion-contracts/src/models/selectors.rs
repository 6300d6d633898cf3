use anyhow::bail;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

/// Resolves a requested model name for a capability, falling back to the
/// first catalog entry that can serve it.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
    preferred_provider: Option<String>,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
            preferred_provider: None,
        }
    }

    /// Fallbacks pick this provider's models first when any qualify.
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> anyhow::Result<ModelSelection> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let candidates = self.registry.by_capability(capability);
        let preferred = self.preferred_provider.as_deref().and_then(|provider| {
            candidates
                .iter()
                .find(|model| model.provider == provider)
                .cloned()
        });
        let Some(model) = preferred.or_else(|| candidates.first().cloned()) else {
            bail!("No models available for capability '{capability}'.");
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CAP_I2V, CAP_T2I, CAP_TEXT};

    #[test]
    fn exact_match_has_no_fallback_reason() -> anyhow::Result<()> {
        let selector = ModelSelector::new(None);
        let selection = selector.select(Some("gpt-4o-mini"), CAP_TEXT)?;
        assert_eq!(selection.model.name, "gpt-4o-mini");
        assert!(selection.fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn wrong_capability_falls_back_with_reason() -> anyhow::Result<()> {
        let selector = ModelSelector::new(None);
        let selection = selector.select(Some("gpt-4o-mini"), CAP_T2I)?;
        assert!(selection.model.supports(CAP_T2I));
        assert_eq!(selection.requested.as_deref(), Some("gpt-4o-mini"));
        assert!(selection
            .fallback_reason
            .unwrap_or_default()
            .contains("unavailable for capability 't2i'"));
        Ok(())
    }

    #[test]
    fn preferred_provider_wins_fallback() -> anyhow::Result<()> {
        let selector = ModelSelector::new(None).with_preferred_provider("AIML:v2/video/generations");
        let selection = selector.select(None, CAP_I2V)?;
        assert_eq!(selection.model.name, "openai/sora-2-i2v");
        Ok(())
    }

    #[test]
    fn unknown_capability_is_an_error() {
        let selector = ModelSelector::new(None);
        assert!(selector.select(None, "audio").is_err());
    }
}
