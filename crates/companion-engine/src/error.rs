use std::fmt;

use companion_contracts::request::GenerationMode;

use crate::util::error_chain_text;

/// Form field a validation failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Prompt,
    Duration,
    AspectRatio,
    CustomPayload,
    Resolution,
    SourceImage,
    Model,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Duration => "duration",
            Self::AspectRatio => "aspect_ratio",
            Self::CustomPayload => "custom_payload",
            Self::Resolution => "resolution",
            Self::SourceImage => "source_image",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: Field,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    CapabilityMismatch,
    Transport,
    Artifact,
    Indexing,
}

/// Everything that can end a generation request early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Selected model '{model}' does not support {mode} generation")]
    CapabilityMismatch { model: String, mode: GenerationMode },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Artifact(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::CapabilityMismatch { .. } => ErrorKind::CapabilityMismatch,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Artifact(_) => ErrorKind::Artifact,
        }
    }

    /// Rejections that happen before anything is sent to a backend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::CapabilityMismatch { .. }
        )
    }

    pub fn transport(err: &anyhow::Error) -> Self {
        Self::Transport(error_chain_text(err, 512))
    }

    pub fn field(&self) -> Option<Field> {
        match self {
            Self::Validation(err) => Some(err.field),
            Self::CapabilityMismatch { .. } => Some(Field::Model),
            _ => None,
        }
    }
}

/// Best-effort retrieval indexing failed. Logged, never shown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("turn indexing failed: {0}")]
pub struct IndexingError(pub String);

impl IndexingError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Indexing
    }
}

impl From<anyhow::Error> for IndexingError {
    fn from(err: anyhow::Error) -> Self {
        Self(error_chain_text(&err, 512))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_mismatch_names_model_and_mode() {
        let err = GenerationError::CapabilityMismatch {
            model: "openai/sora-2-t2v".to_string(),
            mode: GenerationMode::ImageToVideo,
        };
        assert_eq!(
            err.to_string(),
            "Selected model 'openai/sora-2-t2v' does not support Image-to-Video generation"
        );
        assert!(err.is_rejection());
        assert_eq!(err.field(), Some(Field::Model));
    }

    #[test]
    fn transport_flattens_cause_chain() {
        let err = anyhow::anyhow!("timeout").context("video backend failed");
        let flattened = GenerationError::transport(&err);
        assert_eq!(flattened.kind(), ErrorKind::Transport);
        assert_eq!(
            flattened.to_string(),
            "video backend failed | caused by: timeout"
        );
        assert!(!flattened.is_rejection());
    }

    #[test]
    fn validation_keeps_field() {
        let err: GenerationError =
            ValidationError::new(Field::Duration, "Duration must be between 1 and 32.").into();
        assert_eq!(err.field(), Some(Field::Duration));
        assert_eq!(err.to_string(), "Duration must be between 1 and 32.");
    }
}
