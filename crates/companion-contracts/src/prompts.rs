use serde::{Deserialize, Serialize};

/// One field of a structured prompt and the label it is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub prefix: Option<&'static str>,
}

const fn plain(key: &'static str) -> FieldSpec {
    FieldSpec { key, prefix: None }
}

const fn labelled(key: &'static str, prefix: &'static str) -> FieldSpec {
    FieldSpec {
        key,
        prefix: Some(prefix),
    }
}

/// Ordered field descriptor shared by every structured prompt kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSet {
    pub fields: &'static [FieldSpec],
    pub separator: &'static str,
}

pub const IMAGE_FIELDS: FieldSet = FieldSet {
    fields: &[
        plain("character"),
        plain("scene"),
        plain("action"),
        plain("attire"),
        plain("effects"),
        plain("style"),
    ],
    separator: ", ",
};

pub const VIDEO_FIELDS: FieldSet = FieldSet {
    fields: &[
        plain("character"),
        plain("scene"),
        plain("action"),
        plain("attire"),
        plain("effects"),
        labelled("cameraMovement", "Camera: "),
        labelled("duration", "Duration: "),
    ],
    separator: ", ",
};

pub const CHAT_TEMPLATE_FIELDS: FieldSet = FieldSet {
    fields: &[
        labelled("role", "Role: "),
        labelled("instruction", "Instruction: "),
        labelled("data", "Data: "),
        labelled("output", "Output Format: "),
    ],
    separator: "\n\n",
};

impl FieldSet {
    /// Renders non-blank fields in descriptor order.
    pub fn render(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        self.fields
            .iter()
            .filter_map(|field| {
                let value = lookup(field.key)?;
                let value = value.trim();
                if value.is_empty() {
                    return None;
                }
                Some(match field.prefix {
                    Some(prefix) => format!("{prefix}{value}"),
                    None => value.to_string(),
                })
            })
            .collect::<Vec<_>>()
            .join(self.separator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptKind {
    #[default]
    Chat,
    Image,
    Video,
    Modifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptShape {
    Free,
    Template,
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PromptContent {
    #[serde(default)]
    pub text: Option<String>,
}

/// A prompt from the user's library, in the shape the prompt editor saves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SavedPrompt {
    #[serde(default, rename = "type")]
    pub kind: PromptKind,
    #[serde(default)]
    pub prompt_type: Option<PromptShape>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<PromptContent>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub attire: Option<String>,
    #[serde(default)]
    pub effects: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub camera_movement: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl SavedPrompt {
    fn field(&self, key: &str) -> Option<String> {
        let value = match key {
            "role" => &self.role,
            "instruction" => &self.instruction,
            "data" => &self.data,
            "output" => &self.output,
            "character" => &self.character,
            "scene" => &self.scene,
            "action" => &self.action,
            "attire" => &self.attire,
            "effects" => &self.effects,
            "style" => &self.style,
            "cameraMovement" => &self.camera_movement,
            "duration" => &self.duration,
            _ => return None,
        };
        value.clone()
    }

    fn field_set(&self) -> Option<FieldSet> {
        match (self.kind, self.prompt_type) {
            (PromptKind::Chat, Some(PromptShape::Template)) => Some(CHAT_TEMPLATE_FIELDS),
            (PromptKind::Image, Some(PromptShape::Structured)) => Some(IMAGE_FIELDS),
            (PromptKind::Video, Some(PromptShape::Structured)) => Some(VIDEO_FIELDS),
            _ => None,
        }
    }
}

pub fn build_prompt_text(prompt: &SavedPrompt) -> String {
    let non_blank = |value: &Option<String>| {
        value
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
    };
    if let Some(text) = non_blank(&prompt.text) {
        return text;
    }
    if let Some(text) = prompt.content.as_ref().and_then(|c| non_blank(&c.text)) {
        return text;
    }
    match prompt.field_set() {
        Some(set) => set.render(|key| prompt.field(key)),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub description_safe: Option<String>,
    pub attire: String,
}

impl Default for CharacterProfile {
    fn default() -> Self {
        Self {
            name: "AI".to_string(),
            description: "An AI character".to_string(),
            description_safe: None,
            attire: "futuristic outfit".to_string(),
        }
    }
}

impl CharacterProfile {
    /// Description sent to media models; prefers the content-safe variant.
    pub fn media_description(&self) -> &str {
        self.description_safe
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(self.description.as_str())
    }
}

pub fn default_image_prompt(profile: &CharacterProfile) -> String {
    format!(
        "{}, {}, professional portrait, soft lighting, high quality, detailed, photorealistic",
        profile.description, profile.attire
    )
}

/// Selfie-video prompt for `profile`, rendered through [`VIDEO_FIELDS`].
/// `attire` replaces the persona's outfit when given.
pub fn default_video_prompt(profile: &CharacterProfile, scene: &str, attire: Option<&str>) -> String {
    let attire = attire
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(profile.attire.as_str());
    build_prompt_text(&SavedPrompt {
        kind: PromptKind::Video,
        prompt_type: Some(PromptShape::Structured),
        character: Some(profile.media_description().to_string()),
        scene: Some(scene.to_string()),
        action: Some("turning to face camera and waving, smiling".to_string()),
        attire: Some(attire.to_string()),
        effects: Some("cinematic lighting, high quality video".to_string()),
        camera_movement: Some("smooth handheld selfie framing".to_string()),
        ..SavedPrompt::default()
    })
}

/// System prompt installed at the head of the conversation.
pub fn build_chat_system_prompt(
    user_name: &str,
    persona: &str,
    personality: Option<&str>,
    output_token_limit: Option<u64>,
) -> String {
    let mut out = String::from("<systemPrompt>\n<basePrompt>");
    out.push_str(&format!(
        "You are a helper embedded inside a desktop app. Your user's name is {user_name}. \
         Respond to each request in the most appropriate manner and keep the persona given \
         in the \"yourPersona\" envelope throughout the conversation."
    ));
    out.push_str("</basePrompt>\n<yourPersona>\n");
    out.push_str(persona);
    out.push_str("\n</yourPersona>\n");
    if let Some(personality) = personality.filter(|text| !text.trim().is_empty()) {
        out.push_str("\n**Additional Personality instructions from the user below**\n");
        out.push_str(personality);
        out.push('\n');
    }
    if let Some(limit) = output_token_limit {
        out.push_str(&format!(
            "\nTOKEN BUDGET: you have at most {limit} tokens for your entire response, \
             reasoning included. Summarize or split long answers into parts.\n"
        ));
    }
    out.push_str("</systemPrompt>");
    out
}
