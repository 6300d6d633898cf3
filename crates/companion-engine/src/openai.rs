//! Text capability over an OpenAI-compatible `/chat/completions` endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use companion_contracts::conversation::{ConversationTurn, Role};

use crate::capabilities::{ChatPayload, ScenePromptPayload, TextGenerator, TextRequest, TextResponse};
use crate::util::truncate_text;

const SCENE_INSTRUCTIONS: &str = "Write one vivid sentence describing a short selfie video scene. \
Describe the setting, the motion and the lighting. Reply with the scene only.";

pub struct OpenAiTextBackend {
    api_base: String,
    api_key: String,
    scene_model: String,
    http: HttpClient,
}

impl OpenAiTextBackend {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            scene_model: "gpt-4o-mini".to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn with_scene_model(mut self, model: impl Into<String>) -> Self {
        self.scene_model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    async fn complete(&self, body: Value) -> Result<Value> {
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        response_json_or_error("OpenAI", response).await
    }
}

async fn response_json_or_error(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

fn message(role: &str, content: impl Into<String>) -> Value {
    json!({"role": role, "content": content.into()})
}

fn chat_messages(payload: &ChatPayload) -> Vec<Value> {
    let mut system = payload
        .history
        .iter()
        .find(|turn| turn.role == Role::System)
        .map(|turn| turn.content.clone())
        .unwrap_or_default();
    for modifier in payload.modifiers.iter().filter(|text| !text.trim().is_empty()) {
        system.push_str("\n\n");
        system.push_str(modifier);
    }
    if !payload.context_canvas_files.is_empty() {
        system.push_str("\n\n<contextCanvas>");
        for (name, content) in &payload.context_canvas_files {
            system.push_str(&format!("\n--- {name} ---\n{content}"));
        }
        system.push_str("\n</contextCanvas>");
    }

    let mut messages = Vec::new();
    if !system.trim().is_empty() {
        messages.push(message("system", system));
    }
    messages.extend(
        payload
            .history
            .iter()
            .filter(|turn| turn.role != Role::System)
            .map(|turn| message(turn.role.as_str(), turn.content.clone())),
    );
    messages
}

fn scene_messages(payload: &ScenePromptPayload) -> Vec<Value> {
    let recent: Vec<String> = payload
        .recent_history
        .iter()
        .map(|turn: &ConversationTurn| format!("{}: {}", turn.role.as_str(), truncate_text(&turn.content, 400)))
        .collect();
    let mut user = format!(
        "Character: {} ({})\nViewer: {}\nScene idea: {}",
        payload.persona,
        payload.character.media_description(),
        payload.user_name,
        payload.suggestion
    );
    if let Some(attire) = payload.custom_attire.as_deref() {
        user.push_str(&format!("\nAttire: {attire}"));
    }
    if !recent.is_empty() {
        user.push_str("\nRecent conversation:\n");
        user.push_str(&recent.join("\n"));
    }
    vec![message("system", SCENE_INSTRUCTIONS), message("user", user)]
}

/// Splits a leading `<think>...</think>` block off the answer.
pub fn split_thinking(content: &str) -> (Option<String>, String) {
    let trimmed = content.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<think>") {
        if let Some((thinking, answer)) = rest.split_once("</think>") {
            let thinking = thinking.trim();
            return (
                (!thinking.is_empty()).then(|| thinking.to_string()),
                answer.trim().to_string(),
            );
        }
    }
    (None, content.trim().to_string())
}

fn first_choice_text(payload: &Value) -> Result<String> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("OpenAI response has no message content")
}

#[async_trait]
impl TextGenerator for OpenAiTextBackend {
    async fn generate_text(&self, request: &TextRequest) -> Result<TextResponse> {
        match request {
            TextRequest::Chat(payload) => {
                let mut body = json!({
                    "model": payload.model_config.model_id,
                    "messages": chat_messages(payload),
                    "temperature": payload.temperature,
                });
                if payload.output_reservation > 0 {
                    body["max_tokens"] = json!(payload.output_reservation);
                }
                debug!(model = %payload.model_config.model_id, "openai chat request");
                let response = self.complete(body).await?;
                let (thinking, answer) = split_thinking(&first_choice_text(&response)?);
                Ok(TextResponse {
                    answer: Some(answer),
                    thinking,
                    ..TextResponse::default()
                })
            }
            TextRequest::VideoScene(payload) => {
                let body = json!({
                    "model": self.scene_model,
                    "messages": scene_messages(payload),
                    "temperature": 0.8,
                });
                let response = self.complete(body).await?;
                let (_, answer) = split_thinking(&first_choice_text(&response)?);
                Ok(TextResponse::answer(answer))
            }
        }
    }
}
