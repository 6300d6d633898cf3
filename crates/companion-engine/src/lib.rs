use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use companion_contracts::conversation::ConversationStore;
use companion_contracts::events::{EventWriter, SessionEvent};
use companion_contracts::prompts::CharacterProfile;
use companion_contracts::runs::storage::SessionStorage;

pub mod builder;
pub mod capabilities;
pub mod config;
pub mod dryrun;
pub mod error;
pub mod local;
pub mod openai;
pub mod orchestrator;
pub mod phase;
pub mod progress;
pub mod render;
pub mod session;
pub mod view;

mod util;

pub use builder::{AdvancedImageForm, AdvancedVideoForm, RequestBuilder};
pub use capabilities::{Capabilities, TextGenerator, TextRequest, TextResponse};
pub use config::EngineConfig;
pub use error::{ErrorKind, Field, GenerationError, IndexingError, ValidationError};
pub use orchestrator::{Completion, Orchestrator, Outcome};
pub use progress::{ProgressEvent, ProgressHub, ProgressStatus};
pub use render::{source_path, DisplayFragment, VideoElement};
pub use session::{ModelChoice, Profile, Session};
pub use view::{ChatView, MessageId, Speaker, Tone, TranscriptView};

use dryrun::DryrunBackend;
use local::{HeuristicTokenCounter, JsonlTurnIndexer, LocalArtifactStore};
use openai::OpenAiTextBackend;

/// Sends `dryrun` models to the local backend and everything else to the
/// OpenAI-compatible endpoint.
struct TextRouter {
    dryrun: Arc<DryrunBackend>,
    openai: Option<OpenAiTextBackend>,
}

#[async_trait]
impl TextGenerator for TextRouter {
    async fn generate_text(&self, request: &TextRequest) -> Result<TextResponse> {
        match (request, &self.openai) {
            (TextRequest::Chat(payload), _) if payload.model_config.provider == "dryrun" => {
                self.dryrun.generate_text(request).await
            }
            (_, Some(openai)) => openai.generate_text(request).await,
            (TextRequest::VideoScene(_), None) => self.dryrun.generate_text(request).await,
            (TextRequest::Chat(payload), None) => bail!(
                "OPENAI_API_KEY is not set; model {} is unavailable",
                payload.model_config.model_id
            ),
        }
    }
}

fn profile_from_config(config: &EngineConfig) -> Profile {
    let mut profile = Profile {
        temperature: config.temperature,
        ..Profile::default()
    };
    if let Some(user_name) = &config.user_name {
        profile.user_name = user_name.clone();
    }
    if let Some(persona) = &config.persona {
        profile.character = CharacterProfile {
            description: persona.clone(),
            ..CharacterProfile::default()
        };
        profile.persona = persona.clone();
    }
    profile
}

/// Wires the local collaborators around a session rooted at
/// `config.session_dir`.
pub fn open_orchestrator(
    config: &EngineConfig,
    models: ModelChoice,
    view: Arc<dyn ChatView>,
) -> Result<Orchestrator> {
    config.ensure_dirs()?;
    let registry = config.load_registry()?;

    let session_id = format!("session-{}", uuid::Uuid::new_v4());
    let events = EventWriter::new(config.events_path(), session_id.clone());
    let conversation = ConversationStore::load(SessionStorage::open(config.session_path()))
        .context("failed to load conversation history")?;
    let settings = SessionStorage::open(config.settings_path());
    let session = Session::new(
        conversation,
        settings,
        profile_from_config(config),
        models.clone(),
        Some(events.clone()),
    )?;

    let progress = ProgressHub::new();
    let dryrun = Arc::new(DryrunBackend::new(&config.output_dir, progress.clone()));
    let openai = config.openai_api_key.as_ref().map(|key| {
        let backend = OpenAiTextBackend::new(&config.openai_api_base, key);
        match &config.openai_scene_model {
            Some(model) => backend.with_scene_model(model),
            None => backend,
        }
    });
    let caps = Capabilities {
        text: Arc::new(TextRouter {
            dryrun: Arc::clone(&dryrun),
            openai,
        }),
        image: dryrun.clone(),
        video: dryrun,
        artifacts: Arc::new(LocalArtifactStore::new()),
        indexer: Arc::new(JsonlTurnIndexer::new(config.index_path())),
        tokens: Arc::new(HeuristicTokenCounter),
        progress,
    };

    let orchestrator = Orchestrator::new(caps, registry, session, view);
    orchestrator.refresh_system_prompt()?;
    events.record(SessionEvent::SessionStarted {
        session_dir: config.session_dir.to_string_lossy().to_string(),
        text_model: models.text,
        image_model: models.image,
        video_model: models.video,
    })?;
    info!(session_id = %session_id, dir = %config.session_dir.display(), "session started");
    Ok(orchestrator)
}
