//! Per-window state shared by every flow: conversation, token budget, model
//! choices, persona and the single-flight flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use companion_contracts::conversation::ConversationStore;
use companion_contracts::events::EventWriter;
use companion_contracts::prompts::{build_chat_system_prompt, CharacterProfile};
use companion_contracts::request::Flow;
use companion_contracts::runs::storage::SessionStorage;
use companion_contracts::tokens::{ModelWindow, TokenBudget};

use crate::capabilities::{ChatPayload, TokenCounter};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelChoice {
    pub text: String,
    pub image: String,
    pub video: String,
    pub selfie_image: String,
    pub selfie_video: String,
}

impl Default for ModelChoice {
    fn default() -> Self {
        Self {
            text: "dryrun-text-1".to_string(),
            image: "dryrun-image-1".to_string(),
            video: "dryrun-video-1".to_string(),
            selfie_image: "dryrun-image-1".to_string(),
            selfie_video: "dryrun-video-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_name: String,
    pub character: CharacterProfile,
    /// Persona text placed in the system prompt.
    pub persona: String,
    pub personality: Option<String>,
    pub modifiers: Vec<String>,
    pub temperature: f64,
}

impl Default for Profile {
    fn default() -> Self {
        let character = CharacterProfile::default();
        Self {
            user_name: "User".to_string(),
            persona: character.description.clone(),
            character,
            personality: None,
            modifiers: Vec::new(),
            temperature: 0.7,
        }
    }
}

fn flow_slot(flow: Flow) -> usize {
    match flow {
        Flow::Chat => 0,
        Flow::SelfieImage => 1,
        Flow::SelfieVideo => 2,
        Flow::AdvancedImage => 3,
        Flow::AdvancedVideo => 4,
    }
}

/// Held while a flow has a request outstanding; releases the flag on drop.
pub struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct Session {
    conversation: Mutex<ConversationStore>,
    settings: Mutex<SessionStorage>,
    budget: Mutex<TokenBudget>,
    models: Mutex<ModelChoice>,
    profile: Mutex<Profile>,
    last_chat: Mutex<Option<ChatPayload>>,
    busy: [AtomicBool; 5],
    events: Option<EventWriter>,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(
        conversation: ConversationStore,
        mut settings: SessionStorage,
        profile: Profile,
        models: ModelChoice,
        events: Option<EventWriter>,
    ) -> anyhow::Result<Self> {
        let budget = TokenBudget::load(&mut settings)?;
        Ok(Self {
            conversation: Mutex::new(conversation),
            settings: Mutex::new(settings),
            budget: Mutex::new(budget),
            models: Mutex::new(models),
            profile: Mutex::new(profile),
            last_chat: Mutex::new(None),
            busy: Default::default(),
            events,
        })
    }

    /// Throwaway session with nothing on disk.
    pub fn in_memory(profile: Profile, models: ModelChoice) -> anyhow::Result<Self> {
        let conversation = ConversationStore::load(SessionStorage::in_memory())?;
        Self::new(conversation, SessionStorage::in_memory(), profile, models, None)
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn try_begin(&self, flow: Flow) -> Option<InFlight<'_>> {
        let flag = &self.busy[flow_slot(flow)];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { flag })
    }

    pub fn is_busy(&self, flow: Flow) -> bool {
        self.busy[flow_slot(flow)].load(Ordering::Acquire)
    }

    pub fn with_conversation<R>(&self, f: impl FnOnce(&mut ConversationStore) -> R) -> R {
        f(&mut locked(&self.conversation))
    }

    pub fn with_budget<R>(&self, f: impl FnOnce(&mut TokenBudget) -> R) -> R {
        f(&mut locked(&self.budget))
    }

    pub fn save_budget(&self) -> anyhow::Result<()> {
        let budget = locked(&self.budget).clone();
        budget.save(&mut locked(&self.settings))
    }

    pub fn models(&self) -> ModelChoice {
        locked(&self.models).clone()
    }

    pub fn update_models(&self, f: impl FnOnce(&mut ModelChoice)) {
        f(&mut locked(&self.models));
    }

    pub fn profile(&self) -> Profile {
        locked(&self.profile).clone()
    }

    pub fn update_profile(&self, f: impl FnOnce(&mut Profile)) {
        f(&mut locked(&self.profile));
    }

    pub fn last_chat(&self) -> Option<ChatPayload> {
        locked(&self.last_chat).clone()
    }

    pub fn remember_chat(&self, payload: ChatPayload) {
        *locked(&self.last_chat) = Some(payload);
    }

    pub fn forget_chat(&self) {
        locked(&self.last_chat).take();
    }

    /// Rebuilds the system turn for the current persona and resizes the
    /// budget around it.
    pub fn install_system_prompt(
        &self,
        window: Option<ModelWindow>,
        counter: &dyn TokenCounter,
    ) -> anyhow::Result<()> {
        let profile = self.profile();
        let output_limit = self.with_budget(|budget| {
            if let Some(window) = window {
                budget.set_model(window, 0);
            }
            budget.window().map(|_| budget.settings().output)
        });
        let prompt = build_chat_system_prompt(
            &profile.user_name,
            &profile.persona,
            profile.personality.as_deref(),
            output_limit,
        );
        let prompt_tokens = counter.count_tokens(&prompt);
        self.with_budget(|budget| budget.reserve_for_system_prompt(prompt_tokens));
        self.with_conversation(|store| store.set_system_prompt(prompt))?;
        self.save_budget()
    }
}
