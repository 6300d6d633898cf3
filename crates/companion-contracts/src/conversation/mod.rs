use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::now_utc_iso;
use crate::runs::storage::SessionStorage;

pub const HISTORY_KEY: &str = "conversationHistory";
pub const DISPLAY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
            is_image: false,
            is_video: false,
            media_path: None,
            attached_filename: None,
            timestamp: Some(now_utc_iso()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_thinking(mut self, thinking: Option<String>) -> Self {
        self.thinking = thinking.filter(|text| !text.trim().is_empty());
        self
    }

    pub fn with_image(mut self, path: impl Into<String>) -> Self {
        self.is_image = true;
        self.media_path = Some(path.into());
        self
    }

    pub fn with_video(mut self, path: impl Into<String>) -> Self {
        self.is_video = true;
        self.media_path = Some(path.into());
        self
    }

    pub fn with_attachment(mut self, filename: impl Into<String>) -> Self {
        self.attached_filename = Some(filename.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub filename: String,
    pub content: String,
}

impl AttachedFile {
    /// Block prepended to the chat user turn so the model sees the file.
    pub fn as_prompt_prefix(&self) -> String {
        format!(
            "--- ATTACHED FILE: {} ---\n{}\n--- END ATTACHED FILE ---\n\n",
            self.filename, self.content
        )
    }
}

/// Ordered conversation history plus the file context riding along with the
/// next chat request. Every history mutation is written through to session
/// storage.
#[derive(Debug)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
    storage: SessionStorage,
    attached_file: Option<AttachedFile>,
    canvas_files: IndexMap<String, String>,
}

impl ConversationStore {
    /// Restores history from storage. System turns are dropped; the caller
    /// installs a fresh one. Unreadable history is discarded.
    pub fn load(mut storage: SessionStorage) -> anyhow::Result<Self> {
        let turns = match storage.get(HISTORY_KEY) {
            None => Vec::new(),
            Some(raw) => match parse_history(raw) {
                Some(turns) => turns
                    .into_iter()
                    .filter(|turn| turn.role != Role::System)
                    .collect(),
                None => {
                    storage
                        .remove(HISTORY_KEY)
                        .context("failed discarding malformed conversation history")?;
                    Vec::new()
                }
            },
        };
        Ok(Self {
            turns,
            storage,
            attached_file: None,
            canvas_files: IndexMap::new(),
        })
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: ConversationTurn) -> anyhow::Result<()> {
        self.turns.push(turn);
        self.persist()
    }

    pub fn persist(&mut self) -> anyhow::Result<()> {
        let snapshot =
            serde_json::to_value(&self.turns).context("failed serializing conversation history")?;
        self.storage
            .set(HISTORY_KEY, snapshot)
            .context("failed persisting conversation history")
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|turn| turn.role == Role::System)
            .map(|turn| turn.content.as_str())
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) -> anyhow::Result<()> {
        self.turns.retain(|turn| turn.role != Role::System);
        self.turns.insert(0, ConversationTurn::system(prompt));
        self.persist()
    }

    /// Truncates the user-visible history to empty.
    ///
    /// The installed system turn is kept on purpose: it is derived from the
    /// persona and token budget, not from anything the user said, and chat
    /// payloads sent after a clear still need it at the head.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.turns.retain(|turn| turn.role == Role::System);
        self.persist()
    }

    /// The most recent user/assistant turns shown in the transcript.
    pub fn display_window(&self) -> Vec<&ConversationTurn> {
        let visible: Vec<&ConversationTurn> = self
            .turns
            .iter()
            .filter(|turn| turn.role != Role::System)
            .collect();
        let skip = visible.len().saturating_sub(DISPLAY_CAP);
        visible.into_iter().skip(skip).collect()
    }

    pub fn attached_file(&self) -> Option<&AttachedFile> {
        self.attached_file.as_ref()
    }

    pub fn attach_file(&mut self, filename: impl Into<String>, content: impl Into<String>) {
        let file = AttachedFile {
            filename: filename.into(),
            content: content.into(),
        };
        self.canvas_files
            .insert(file.filename.clone(), file.content.clone());
        self.attached_file = Some(file);
    }

    pub fn clear_attachment(&mut self) -> Option<AttachedFile> {
        self.attached_file.take()
    }

    pub fn canvas_files(&self) -> &IndexMap<String, String> {
        &self.canvas_files
    }

    pub fn add_canvas_file(&mut self, filename: impl Into<String>, content: impl Into<String>) {
        self.canvas_files.insert(filename.into(), content.into());
    }

    pub fn remove_canvas_file(&mut self, filename: &str) -> Option<String> {
        self.canvas_files.shift_remove(filename)
    }

    pub fn clear_canvas(&mut self) {
        self.canvas_files.clear();
    }
}

fn parse_history(raw: Value) -> Option<Vec<ConversationTurn>> {
    serde_json::from_value(raw).ok()
}
