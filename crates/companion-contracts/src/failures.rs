use serde::{Deserialize, Serialize};

/// User-facing bucket for a raw failure message. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TokenLimit,
    InvalidResponse,
    RateLimited,
    Unauthorized,
    ModelUnavailable,
    Network,
    Quota,
    Unexpected,
}

impl ErrorCategory {
    pub fn user_message(self) -> &'static str {
        match self {
            Self::TokenLimit => {
                "The request exceeded the model's token limits. Reduce the input or increase the limits."
            }
            Self::InvalidResponse => {
                "The AI service returned an invalid response. Try again in a few moments or switch to a different model."
            }
            Self::RateLimited => "Rate limit exceeded. Please wait a moment before trying again.",
            Self::Unauthorized => "Authentication failed. Please check your API key settings.",
            Self::ModelUnavailable => {
                "The selected model is currently unavailable. Try switching to a different model."
            }
            Self::Network => {
                "Network connection issue. Please check your internet connection and try again."
            }
            Self::Quota => "API quota exceeded. Please check your account billing/limits.",
            Self::Unexpected => "An unexpected error occurred.",
        }
    }
}

/// First matching rule wins; matching is case-insensitive on substrings.
pub fn classify_error_message(raw: &str) -> ErrorCategory {
    let message = raw.to_lowercase();
    let has = |needle: &str| message.contains(needle);

    if has("token") && (has("limit") || has("exceed")) {
        ErrorCategory::TokenLimit
    } else if has("json") && has("parse") {
        ErrorCategory::InvalidResponse
    } else if has("rate limit") || has("429") {
        ErrorCategory::RateLimited
    } else if has("unauthorized") || has("401") || has("api key") {
        ErrorCategory::Unauthorized
    } else if has("model") && (has("not found") || has("unavailable")) {
        ErrorCategory::ModelUnavailable
    } else if has("network") || has("timeout") || has("connection") {
        ErrorCategory::Network
    } else if has("quota") || has("billing") {
        ErrorCategory::Quota
    } else {
        ErrorCategory::Unexpected
    }
}
