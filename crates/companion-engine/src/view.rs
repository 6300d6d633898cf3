//! Typed view-model the orchestrator drives instead of looking up UI
//! elements by id.

use std::sync::{Mutex, PoisonError};

use companion_contracts::conversation::DISPLAY_CAP;
use companion_contracts::request::Flow;

use crate::render::DisplayFragment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Success,
    Error,
}

/// Everything the orchestrator needs from the window it runs in.
pub trait ChatView: Send + Sync {
    fn append_message(&self, speaker: Speaker, fragment: DisplayFragment) -> MessageId;
    fn append_placeholder(&self, text: &str) -> MessageId;
    fn set_placeholder_text(&self, id: MessageId, text: &str, tone: Tone);
    fn replace_message(&self, id: MessageId, fragment: DisplayFragment);
    fn remove_message(&self, id: MessageId);
    fn set_control_enabled(&self, flow: Flow, enabled: bool);
    fn set_status(&self, text: &str, tone: Tone);
    fn reveal_output_folder(&self, flow: Flow, folder: &str);
    fn clear_form(&self, flow: Flow);
    fn window_title(&self) -> String;
    fn set_window_title(&self, title: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Message {
        id: MessageId,
        speaker: Speaker,
        fragment: DisplayFragment,
    },
    Placeholder {
        id: MessageId,
        text: String,
        tone: Tone,
    },
}

impl Entry {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Message { id, .. } | Self::Placeholder { id, .. } => *id,
        }
    }
}

#[derive(Debug, Default)]
struct TranscriptState {
    next_id: u64,
    entries: Vec<Entry>,
    disabled: Vec<Flow>,
    revealed: Vec<(Flow, String)>,
    cleared: Vec<Flow>,
    statuses: Vec<(String, Tone)>,
    title: String,
}

/// In-memory transcript; backs the CLI and the tests.
#[derive(Debug, Default)]
pub struct TranscriptView {
    state: Mutex<TranscriptState>,
}

impl TranscriptView {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(TranscriptState {
                title: title.into(),
                ..TranscriptState::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TranscriptState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.with_state(|state| state.entries.clone())
    }

    pub fn is_enabled(&self, flow: Flow) -> bool {
        self.with_state(|state| !state.disabled.contains(&flow))
    }

    pub fn revealed_folders(&self) -> Vec<(Flow, String)> {
        self.with_state(|state| state.revealed.clone())
    }

    pub fn cleared_forms(&self) -> Vec<Flow> {
        self.with_state(|state| state.cleared.clone())
    }

    pub fn statuses(&self) -> Vec<(String, Tone)> {
        self.with_state(|state| state.statuses.clone())
    }

    pub fn placeholder_text(&self, id: MessageId) -> Option<(String, Tone)> {
        self.with_state(|state| {
            state.entries.iter().find_map(|entry| match entry {
                Entry::Placeholder {
                    id: entry_id,
                    text,
                    tone,
                } if *entry_id == id => Some((text.clone(), *tone)),
                _ => None,
            })
        })
    }

    fn push(&self, build: impl FnOnce(MessageId) -> Entry) -> MessageId {
        self.with_state(|state| {
            state.next_id += 1;
            let id = MessageId(state.next_id);
            state.entries.push(build(id));
            let overflow = state.entries.len().saturating_sub(DISPLAY_CAP);
            if overflow > 0 {
                state.entries.drain(..overflow);
            }
            id
        })
    }
}

impl ChatView for TranscriptView {
    fn append_message(&self, speaker: Speaker, fragment: DisplayFragment) -> MessageId {
        self.push(|id| Entry::Message {
            id,
            speaker,
            fragment,
        })
    }

    fn append_placeholder(&self, text: &str) -> MessageId {
        self.push(|id| Entry::Placeholder {
            id,
            text: text.to_string(),
            tone: Tone::Neutral,
        })
    }

    fn set_placeholder_text(&self, id: MessageId, new_text: &str, new_tone: Tone) {
        self.with_state(|state| {
            for entry in state.entries.iter_mut() {
                if let Entry::Placeholder {
                    id: entry_id,
                    text,
                    tone,
                } = entry
                {
                    if *entry_id == id {
                        *text = new_text.to_string();
                        *tone = new_tone;
                    }
                }
            }
        });
    }

    fn replace_message(&self, id: MessageId, fragment: DisplayFragment) {
        self.with_state(|state| {
            if let Some(entry) = state.entries.iter_mut().find(|entry| entry.id() == id) {
                *entry = Entry::Message {
                    id,
                    speaker: Speaker::Assistant,
                    fragment,
                };
            }
        });
    }

    fn remove_message(&self, id: MessageId) {
        self.with_state(|state| state.entries.retain(|entry| entry.id() != id));
    }

    fn set_control_enabled(&self, flow: Flow, enabled: bool) {
        self.with_state(|state| {
            state.disabled.retain(|item| *item != flow);
            if !enabled {
                state.disabled.push(flow);
            }
        });
    }

    fn set_status(&self, text: &str, tone: Tone) {
        self.with_state(|state| state.statuses.push((text.to_string(), tone)));
    }

    fn reveal_output_folder(&self, flow: Flow, folder: &str) {
        self.with_state(|state| state.revealed.push((flow, folder.to_string())));
    }

    fn clear_form(&self, flow: Flow) {
        self.with_state(|state| state.cleared.push(flow));
    }

    fn window_title(&self) -> String {
        self.with_state(|state| state.title.clone())
    }

    fn set_window_title(&self, title: &str) {
        self.with_state(|state| state.title = title.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_replaced_in_place() {
        let view = TranscriptView::new("Companion");
        let first = view.append_message(Speaker::User, DisplayFragment::text("hello"));
        let pending = view.append_placeholder("Thinking...");
        view.set_placeholder_text(pending, "processing", Tone::Neutral);
        assert_eq!(
            view.placeholder_text(pending),
            Some(("processing".to_string(), Tone::Neutral))
        );

        view.replace_message(pending, DisplayFragment::text("hi"));
        let entries = view.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id(), first);
        assert!(matches!(
            &entries[1],
            Entry::Message { speaker: Speaker::Assistant, .. }
        ));
        assert!(view.placeholder_text(pending).is_none());
    }

    #[test]
    fn transcript_keeps_most_recent_entries() {
        let view = TranscriptView::new("Companion");
        for index in 0..(DISPLAY_CAP + 5) {
            view.append_message(Speaker::User, DisplayFragment::text(&format!("m{index}")));
        }
        let entries = view.entries();
        assert_eq!(entries.len(), DISPLAY_CAP);
        assert_eq!(entries[0].id(), MessageId(6));
    }

    #[test]
    fn controls_toggle_per_flow() {
        let view = TranscriptView::new("Companion");
        view.set_control_enabled(Flow::Chat, false);
        assert!(!view.is_enabled(Flow::Chat));
        assert!(view.is_enabled(Flow::SelfieImage));
        view.set_control_enabled(Flow::Chat, true);
        assert!(view.is_enabled(Flow::Chat));
    }
}
