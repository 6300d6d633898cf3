//! Drives one generation request from form state to transcript.
//!
//! Every `submit_*` call is single-flight per flow: a second call while the
//! first is outstanding returns [`Outcome::Busy`] without touching anything.
//! Different flows run independently. Nothing escapes as an error; failures
//! end up in the transcript or the status line, and the triggering control
//! is re-enabled on the way out whatever happened.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use companion_contracts::chat::ModelSlot;
use companion_contracts::conversation::{ConversationTurn, Role};
use companion_contracts::events::{now_utc_iso, EventWriter, SessionEvent};
use companion_contracts::failures::{classify_error_message, ErrorCategory};
use companion_contracts::models::{ModelRegistry, ModelSpec, CAP_I2I, CAP_I2V, CAP_T2I, CAP_T2V, CAP_TEXT};
use companion_contracts::request::{ArtifactKind, AspectRatio, Flow, GenerationMode, ModelConfig};
use companion_contracts::runs::receipts::{build_receipt, receipt_path_for, write_receipt, ReceiptInput};
use companion_contracts::tokens::ModelWindow;

use crate::builder::{require_text, AdvancedImageForm, AdvancedVideoForm, RequestBuilder};
use crate::capabilities::{
    AdvancedVideoPayload, Capabilities, ChatPayload, ImageRequest, ScenePromptPayload,
    SelfieImagePayload, SelfieVideoPayload, TextRequest, TurnRecord, VideoRequest,
};
use crate::error::{Field, GenerationError, ValidationError};
use crate::phase::{RequestPhase, RequestTracker};
use crate::progress::ProgressSubscription;
use crate::render::{render_media, DisplayFragment, RenderedMedia};
use crate::session::{InFlight, Session};
use crate::util::{error_chain_text, map_object};
use crate::view::{ChatView, MessageId, Speaker, Tone};

const TITLE_SUFFIX: &str = " - Generating...";
const MIN_SCENE_CHARS: usize = 10;
const SCENE_HISTORY_TURNS: usize = 6;
const SCENE_PROMPT_FAILED: &str = "SCENE_PROMPT_FAILED";

/// What a successful request produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub flow: Flow,
    pub request_id: String,
    pub model: String,
    pub answer: Option<String>,
    pub thinking: Option<String>,
    pub artifacts: Vec<String>,
    pub sources: Vec<String>,
    pub warnings: Vec<String>,
    pub receipt: Option<PathBuf>,
}

impl Completion {
    fn new(flow: Flow, request_id: String, model: &ModelSpec) -> Self {
        Self {
            flow,
            request_id,
            model: model.name.clone(),
            answer: None,
            thinking: None,
            artifacts: Vec::new(),
            sources: Vec::new(),
            warnings: Vec::new(),
            receipt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The flow already had a request in flight; nothing happened.
    Busy,
    /// Stopped before dispatch; no backend call was made.
    Rejected(GenerationError),
    Succeeded(Completion),
    Failed(GenerationError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Self::Succeeded(completion) => Some(completion),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&GenerationError> {
        match self {
            Self::Rejected(err) | Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Tracker shared with the progress callback.
#[derive(Clone)]
struct Lifecycle(Arc<Mutex<RequestTracker>>);

impl Lifecycle {
    fn new(flow: Flow, events: Option<EventWriter>) -> Self {
        let request_id = format!("{}-{}", flow.label(), uuid::Uuid::new_v4());
        Self(Arc::new(Mutex::new(RequestTracker::new(flow, request_id, events))))
    }

    fn with<R>(&self, f: impl FnOnce(&mut RequestTracker) -> R) -> R {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn advance(&self, next: RequestPhase) {
        self.with(|tracker| tracker.advance(next));
    }

    fn finish(&self, terminal: RequestPhase) {
        self.with(|tracker| {
            tracker.advance(terminal);
            tracker.settle();
        });
    }

    fn request_id(&self) -> String {
        self.with(|tracker| tracker.request_id().to_string())
    }
}

/// Disables the flow's control while alive. On drop the control comes
/// back, the form is cleared and a marked window title is restored
/// verbatim.
struct FlowScope<'a> {
    flow: Flow,
    view: &'a dyn ChatView,
    restore_title: Option<String>,
    _flight: InFlight<'a>,
}

impl<'a> FlowScope<'a> {
    fn open(flow: Flow, view: &'a dyn ChatView, flight: InFlight<'a>, mark_title: bool) -> Self {
        view.set_control_enabled(flow, false);
        let restore_title = mark_title.then(|| {
            let title = view.window_title();
            view.set_window_title(&format!("{title}{TITLE_SUFFIX}"));
            title
        });
        Self {
            flow,
            view,
            restore_title,
            _flight: flight,
        }
    }
}

impl Drop for FlowScope<'_> {
    fn drop(&mut self) {
        self.view.set_control_enabled(self.flow, true);
        self.view.clear_form(self.flow);
        if let Some(title) = self.restore_title.take() {
            self.view.set_window_title(&title);
        }
    }
}

fn attire_suffix(attire: Option<&str>) -> String {
    attire.map(|attire| format!(" | Attire: {attire}")).unwrap_or_default()
}

fn clean_attire(attire: Option<&str>) -> Option<String> {
    attire
        .map(str::trim)
        .filter(|attire| !attire.is_empty())
        .map(str::to_string)
}

fn failure_text(heading: &str, err: &GenerationError) -> String {
    let mut text = format!("**{heading}:** {err}");
    if let GenerationError::Transport(message) = err {
        let category = classify_error_message(message);
        if category != ErrorCategory::Unexpected {
            text.push_str("\n\n");
            text.push_str(category.user_message());
        }
    }
    text
}

pub struct Orchestrator {
    caps: Capabilities,
    builder: RequestBuilder,
    session: Session,
    view: Arc<dyn ChatView>,
}

impl Orchestrator {
    pub fn new(
        caps: Capabilities,
        registry: ModelRegistry,
        session: Session,
        view: Arc<dyn ChatView>,
    ) -> Self {
        let builder = RequestBuilder::new(registry, Arc::clone(&caps.artifacts));
        Self {
            caps,
            builder,
            session,
            view,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.builder.registry()
    }

    pub fn view(&self) -> &Arc<dyn ChatView> {
        &self.view
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = self.session.events() {
            let kind = event.kind();
            if let Err(err) = events.record(event) {
                warn!(event = kind, error = %err, "failed writing event");
            }
        }
    }

    fn lifecycle(&self, flow: Flow) -> Lifecycle {
        let lifecycle = Lifecycle::new(flow, self.session.events().cloned());
        lifecycle.advance(RequestPhase::Validating);
        lifecycle
    }

    /// Reinstalls the system prompt sized for the current text model.
    pub fn refresh_system_prompt(&self) -> anyhow::Result<()> {
        let models = self.session.models();
        let window = self.registry().get(&models.text).and_then(|model| {
            Some(ModelWindow {
                context_window: model.context_window?,
                max_output: model.max_output_tokens?,
            })
        });
        self.session
            .install_system_prompt(window, self.caps.tokens.as_ref())
    }

    /// Points a model slot at `name` after checking it can serve the slot.
    pub fn select_model(&self, slot: ModelSlot, name: &str) -> Result<ModelSpec, GenerationError> {
        let name = name.trim();
        let Some(model) = self.registry().get(name).cloned() else {
            return Err(ValidationError::new(Field::Model, format!("Unknown model '{name}'.")).into());
        };
        let fits = match slot {
            ModelSlot::Text => model.supports(CAP_TEXT),
            ModelSlot::Image => model.supports(CAP_T2I) || model.supports(CAP_I2I),
            ModelSlot::Video => model.supports(CAP_T2V) || model.supports(CAP_I2V),
        };
        if !fits {
            return Err(ValidationError::new(
                Field::Model,
                format!("Model '{name}' cannot be used for {slot:?} requests."),
            )
            .into());
        }
        self.session.update_models(|models| match slot {
            ModelSlot::Text => models.text = model.name.clone(),
            ModelSlot::Image => {
                models.image = model.name.clone();
                if model.supports(CAP_T2I) {
                    models.selfie_image = model.name.clone();
                }
            }
            ModelSlot::Video => {
                models.video = model.name.clone();
                if model.supports(CAP_T2V) {
                    models.selfie_video = model.name.clone();
                }
            }
        });
        if slot == ModelSlot::Text {
            if let Err(err) = self.refresh_system_prompt() {
                warn!(error = %err, "failed refreshing system prompt");
            }
        }
        info!(slot = ?slot, model = %model.name, "model selected");
        Ok(model)
    }

    pub fn clear_history(&self) {
        if let Err(err) = self.session.with_conversation(|store| store.clear()) {
            warn!(error = %err, "failed persisting cleared history");
        }
        self.session.forget_chat();
        self.emit(SessionEvent::HistoryCleared);
        self.view
            .set_status("Conversation history cleared.", Tone::Success);
    }

    /// Reads a text file and attaches it to the next chat message.
    pub async fn attach_file(&self, path: &Path) -> anyhow::Result<String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        self.session
            .with_conversation(|store| store.attach_file(filename.clone(), content));
        Ok(filename)
    }

    pub async fn add_canvas_file(&self, path: &Path) -> anyhow::Result<String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path.to_string_lossy().to_string();
        self.session
            .with_conversation(|store| store.add_canvas_file(filename.clone(), content));
        Ok(filename)
    }

    fn record(&self, turn: ConversationTurn) {
        if let Err(err) = self.session.with_conversation(|store| store.push(turn)) {
            warn!(error = %err, "failed persisting conversation history");
        }
    }

    fn reject(&self, flow: Flow, lifecycle: &Lifecycle, err: GenerationError) -> Outcome {
        lifecycle.finish(RequestPhase::Rejected);
        info!(
            flow = %flow,
            field = err.field().map(Field::as_str).unwrap_or("-"),
            error = %err,
            "request rejected"
        );
        self.view.set_status(&err.to_string(), Tone::Error);
        Outcome::Rejected(err)
    }

    fn fail(
        &self,
        flow: Flow,
        lifecycle: &Lifecycle,
        placeholder: Option<MessageId>,
        heading: &str,
        err: GenerationError,
    ) -> Outcome {
        lifecycle.finish(RequestPhase::Failed);
        warn!(flow = %flow, kind = ?err.kind(), error = %err, "request failed");
        if let Some(id) = placeholder {
            self.view.remove_message(id);
        }
        self.view
            .append_message(Speaker::Assistant, DisplayFragment::text(&failure_text(heading, &err)));
        Outcome::Failed(err)
    }

    /// Repaints `placeholder` with the progress events tagged for this
    /// request; events of any other request are ignored.
    fn watch_progress(&self, flow: Flow, lifecycle: &Lifecycle, placeholder: MessageId) -> ProgressSubscription {
        let view = Arc::clone(&self.view);
        let lifecycle = lifecycle.clone();
        let request_id = lifecycle.request_id();
        let events = self.session.events().cloned();
        self.caps.progress.subscribe(move |event| {
            if !event.concerns(&request_id) {
                return;
            }
            lifecycle.advance(RequestPhase::Streaming);
            let text = if event.message.trim().is_empty() {
                event.status.as_str().to_string()
            } else {
                event.message.clone()
            };
            view.set_placeholder_text(placeholder, &text, event.status.tone().unwrap_or(Tone::Neutral));
            if let Some(events) = &events {
                let logged = events.record(SessionEvent::Progress {
                    flow,
                    request_id: request_id.clone(),
                    status: event.status.as_str().to_string(),
                    message: event.message.clone(),
                });
                if let Err(err) = logged {
                    warn!(error = %err, "failed writing progress event");
                }
            }
        })
    }

    /// Checks every returned path and waits for it before converting it
    /// into a display source. Returns the paths alongside their sources.
    async fn collect_artifacts(
        &self,
        kind: ArtifactKind,
        paths: Vec<String>,
    ) -> Result<(Vec<String>, Vec<String>), GenerationError> {
        let paths: Vec<String> = paths
            .into_iter()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect();
        if paths.is_empty() {
            let noun = match kind {
                ArtifactKind::Image => "image",
                ArtifactKind::Video => "video",
            };
            return Err(GenerationError::Artifact(format!(
                "Generation reported success but returned no {noun} file."
            )));
        }
        for path in &paths {
            kind.check_path(path).map_err(GenerationError::Artifact)?;
        }
        let mut sources = Vec::with_capacity(paths.len());
        for path in &paths {
            self.caps.artifacts.await_ready(path).await.map_err(|err| {
                GenerationError::Artifact(format!(
                    "Generated file {path} is not available: {}",
                    error_chain_text(&err, 512)
                ))
            })?;
            let source = self.caps.artifacts.display_source(path).await.map_err(|err| {
                GenerationError::Artifact(format!(
                    "Could not display {path}: {}",
                    error_chain_text(&err, 512)
                ))
            })?;
            sources.push(source);
        }
        Ok((paths, sources))
    }

    fn present(&self, flow: Flow, placeholder: MessageId, media: &RenderedMedia) {
        self.view.replace_message(placeholder, media.fragment.clone());
        if let Some(folder) = &media.output_folder {
            self.view.reveal_output_folder(flow, folder);
        }
    }

    fn write_receipt<Q: Serialize, R: Serialize>(
        &self,
        completion: &Completion,
        request: &Q,
        response: &R,
    ) -> Option<PathBuf> {
        let first = completion.artifacts.first()?;
        let receipt_path = receipt_path_for(Path::new(first));
        let input = ReceiptInput {
            flow: completion.flow.label().to_string(),
            model: Some(completion.model.clone()),
            request: serde_json::to_value(request).unwrap_or(Value::Null),
            response: serde_json::to_value(response).unwrap_or(Value::Null),
            warnings: completion.warnings.clone(),
            artifacts: completion.artifacts.clone(),
            error: None,
            metadata: map_object(json!({
                "request_id": completion.request_id,
                "display_sources": completion.sources,
            })),
        };
        let receipt = build_receipt(&input, &receipt_path);
        match write_receipt(&receipt_path, &receipt) {
            Ok(()) => {
                self.emit(SessionEvent::ReceiptWritten {
                    flow: completion.flow,
                    request_id: completion.request_id.clone(),
                    receipt_path: receipt_path.to_string_lossy().to_string(),
                });
                Some(receipt_path)
            }
            Err(err) => {
                warn!(path = %receipt_path.display(), error = %err, "failed writing receipt");
                None
            }
        }
    }

    /// Best-effort; failures are logged and otherwise ignored.
    async fn index_exchange(&self, prefix: &str, turns: Vec<ConversationTurn>) {
        let record = TurnRecord {
            id: format!("{prefix}-{}", chrono::Utc::now().timestamp_millis()),
            timestamp: now_utc_iso(),
            history: turns,
            persona: self.session.profile().character.name,
        };
        match self.caps.indexer.save_turn(&record).await {
            Ok(()) => {
                debug!(id = %record.id, "turn indexed");
                self.emit(SessionEvent::TurnIndexed { id: record.id });
            }
            Err(err) => {
                warn!(id = %record.id, error = %err, "turn indexing failed");
                self.emit(SessionEvent::TurnIndexFailed {
                    id: record.id,
                    error: err.to_string(),
                });
            }
        }
    }

    fn chat_payload(&self, model: &ModelSpec) -> ChatPayload {
        let profile = self.session.profile();
        let settings = self.session.with_budget(|budget| budget.settings().clone());
        let (history, canvas, attachment) = self.session.with_conversation(|store| {
            (
                store.turns().to_vec(),
                store.canvas_files().clone(),
                store.attached_file().map(|file| file.content.clone()),
            )
        });
        ChatPayload {
            history,
            user_name: profile.user_name,
            persona: profile.persona,
            model_config: ModelConfig::from(model),
            temperature: profile.temperature,
            history_token_limit: settings.history,
            knowledge_token_limit: settings.knowledge,
            output_reservation: settings.output,
            recent_turns_count: settings.recent_turns,
            context_canvas_files: canvas,
            attached_file_content: attachment,
            modifiers: profile.modifiers,
        }
    }

    pub async fn submit_chat(&self, message: &str) -> Outcome {
        let flow = Flow::Chat;
        let Some(flight) = self.session.try_begin(flow) else {
            debug!(flow = %flow, "submission ignored while busy");
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let attachment = self
            .session
            .with_conversation(|store| store.attached_file().cloned());
        let text = message.trim();
        if text.is_empty() && attachment.is_none() {
            let err = ValidationError::new(Field::Prompt, "Please enter a message.");
            return self.reject(flow, &lifecycle, err.into());
        }
        let model = match self
            .builder
            .resolve_capability(&self.session.models().text, CAP_TEXT)
        {
            Ok(model) => model,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, false);
        let (user_turn, shown) = match &attachment {
            Some(file) => (
                ConversationTurn::user(format!("{}{text}", file.as_prompt_prefix()))
                    .with_attachment(file.filename.clone()),
                format!("*Attached: {}*\n\n{text}", file.filename),
            ),
            None => (ConversationTurn::user(text), text.to_string()),
        };
        self.view
            .append_message(Speaker::User, DisplayFragment::text(&shown));
        self.record(user_turn.clone());

        let payload = self.chat_payload(&model);
        self.session.remember_chat(payload.clone());
        let outcome = self
            .complete_chat(flow, &lifecycle, &model, payload, user_turn)
            .await;
        self.session
            .with_conversation(|store| store.clear_attachment());
        outcome
    }

    /// Replays the last chat payload against the currently selected text
    /// model.
    pub async fn resend_last(&self) -> Outcome {
        let flow = Flow::Chat;
        let Some(flight) = self.session.try_begin(flow) else {
            self.view
                .set_status("Please wait for the current request to finish.", Tone::Neutral);
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let Some(mut payload) = self.session.last_chat() else {
            let err = ValidationError::new(Field::Prompt, "There is no previous message to resend.");
            return self.reject(flow, &lifecycle, err.into());
        };
        let model = match self
            .builder
            .resolve_capability(&self.session.models().text, CAP_TEXT)
        {
            Ok(model) => model,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };
        payload.model_config = ModelConfig::from(&model);

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, false);
        self.view.append_message(
            Speaker::User,
            DisplayFragment::text(&format!(
                "*Resending last prompt with model: {}*",
                model.label()
            )),
        );
        let user_turn = payload
            .history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .cloned()
            .unwrap_or_else(|| ConversationTurn::user(""));
        self.session.remember_chat(payload.clone());
        self.complete_chat(flow, &lifecycle, &model, payload, user_turn)
            .await
    }

    async fn complete_chat(
        &self,
        flow: Flow,
        lifecycle: &Lifecycle,
        model: &ModelSpec,
        payload: ChatPayload,
        user_turn: ConversationTurn,
    ) -> Outcome {
        let heading = flow.failure_heading();
        let placeholder = self.view.append_placeholder("Thinking...");
        lifecycle.advance(RequestPhase::Dispatched);
        let response = match self.caps.text.generate_text(&TextRequest::Chat(payload)).await {
            Ok(response) => response,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, lifecycle, Some(placeholder), heading, err);
            }
        };
        if let Some(error) = response.error.as_deref() {
            let message = response.message.clone().unwrap_or_else(|| error.to_string());
            return self.fail(flow, lifecycle, Some(placeholder), heading, GenerationError::Transport(message));
        }
        let Some(answer) = response
            .answer
            .filter(|answer| !answer.trim().is_empty())
        else {
            let err = GenerationError::Transport("The model returned an empty response.".to_string());
            return self.fail(flow, lifecycle, Some(placeholder), heading, err);
        };

        self.view
            .replace_message(placeholder, DisplayFragment::text(&answer));
        let assistant =
            ConversationTurn::assistant(answer.clone()).with_thinking(response.thinking.clone());
        self.record(assistant.clone());
        self.index_exchange("turn", vec![user_turn, assistant]).await;

        let mut completion = Completion::new(flow, lifecycle.request_id(), model);
        completion.answer = Some(answer);
        completion.thinking = response.thinking;
        lifecycle.finish(RequestPhase::Succeeded);
        Outcome::Succeeded(completion)
    }

    pub async fn submit_selfie(&self, suggestion: &str, attire: Option<&str>) -> Outcome {
        let flow = Flow::SelfieImage;
        let Some(flight) = self.session.try_begin(flow) else {
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let suggestion = match require_text(suggestion, "Please describe the selfie you would like.") {
            Ok(suggestion) => suggestion,
            Err(err) => return self.reject(flow, &lifecycle, err.into()),
        };
        let attire = clean_attire(attire);
        let model = match self
            .builder
            .resolve_capability(&self.session.models().selfie_image, CAP_T2I)
        {
            Ok(model) => model,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };
        let profile = self.session.profile();
        let heading = flow.failure_heading();

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, false);
        let request_text = format!(
            "Selfie request: {suggestion}{}",
            attire_suffix(attire.as_deref())
        );
        self.view
            .append_message(Speaker::User, DisplayFragment::text(&request_text));
        let user_turn = ConversationTurn::user(request_text);
        self.record(user_turn.clone());
        let placeholder = self.view.append_placeholder(&format!(
            "{} is preparing a selfie for you...",
            profile.character.name
        ));
        lifecycle.advance(RequestPhase::Dispatched);

        let request = ImageRequest::Selfie(SelfieImagePayload {
            suggestion,
            custom_attire: attire,
            character: profile.character,
            model_id: model.name.clone(),
        });
        let response = match self.caps.image.generate_image(&request).await {
            Ok(response) => response,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
            }
        };
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Image generation failed.".to_string());
            return self.fail(flow, &lifecycle, Some(placeholder), heading, GenerationError::Transport(message));
        }
        let (paths, sources) = match self
            .collect_artifacts(ArtifactKind::Image, response.file_paths.clone())
            .await
        {
            Ok(found) => found,
            Err(err) => return self.fail(flow, &lifecycle, Some(placeholder), heading, err),
        };

        let media = render_media(ArtifactKind::Image, &paths, &sources);
        self.present(flow, placeholder, &media);
        let assistant =
            ConversationTurn::assistant(media.fragment.to_html()).with_image(paths[0].clone());
        self.record(assistant.clone());
        self.index_exchange("selfie", vec![user_turn, assistant]).await;

        let mut completion = Completion::new(flow, lifecycle.request_id(), &model);
        completion.artifacts = paths;
        completion.sources = sources;
        completion.receipt = self.write_receipt(&completion, &request, &response);
        lifecycle.finish(RequestPhase::Succeeded);
        Outcome::Succeeded(completion)
    }

    /// Two steps: the text model writes a scene, then the video model films
    /// it.
    pub async fn submit_selfie_video(&self, suggestion: &str, attire: Option<&str>) -> Outcome {
        let flow = Flow::SelfieVideo;
        let Some(flight) = self.session.try_begin(flow) else {
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let suggestion = match require_text(suggestion, "Please describe the video you would like.") {
            Ok(suggestion) => suggestion,
            Err(err) => return self.reject(flow, &lifecycle, err.into()),
        };
        let attire = clean_attire(attire);
        let models = self.session.models();
        let resolved = self
            .builder
            .resolve_capability(&models.text, CAP_TEXT)
            .and_then(|text| {
                self.builder
                    .resolve_capability(&models.selfie_video, CAP_T2V)
                    .map(|video| (text, video))
            });
        let (_, model) = match resolved {
            Ok(models) => models,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };
        let profile = self.session.profile();
        let heading = flow.failure_heading();

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, false);
        let request_text = format!(
            "Selfie video request: {suggestion}{}",
            attire_suffix(attire.as_deref())
        );
        self.view
            .append_message(Speaker::User, DisplayFragment::text(&request_text));
        let user_turn = ConversationTurn::user(request_text);
        self.record(user_turn.clone());
        let placeholder = self.view.append_placeholder(&format!(
            "{} is imagining the scene...",
            profile.character.name
        ));
        let progress = self.watch_progress(flow, &lifecycle, placeholder);
        lifecycle.advance(RequestPhase::Dispatched);

        let recent_history = self.session.with_conversation(|store| {
            let visible: Vec<ConversationTurn> = store
                .turns()
                .iter()
                .filter(|turn| turn.role != Role::System)
                .cloned()
                .collect();
            let skip = visible.len().saturating_sub(SCENE_HISTORY_TURNS);
            visible[skip..].to_vec()
        });
        let scene_request = TextRequest::VideoScene(ScenePromptPayload {
            suggestion,
            user_name: profile.user_name.clone(),
            persona: profile.character.name.clone(),
            recent_history,
            character: profile.character.clone(),
            custom_attire: attire.clone(),
        });
        let scene = match self.caps.text.generate_text(&scene_request).await {
            Ok(scene) => scene,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
            }
        };
        if scene.error.as_deref() == Some(SCENE_PROMPT_FAILED) {
            let mut message = scene
                .message
                .clone()
                .unwrap_or_else(|| "The scene could not be generated.".to_string());
            if let Some(hint) = scene.suggestion.as_deref().filter(|hint| !hint.trim().is_empty()) {
                message.push_str(&format!("\n\n*Suggestion: {hint}*"));
            }
            return self.fail(
                flow,
                &lifecycle,
                Some(placeholder),
                "Video Scene Generation Failed",
                GenerationError::Transport(message),
            );
        }
        let scene_failed = scene.error.is_some();
        let Some(scene_prompt) = scene
            .answer
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !scene_failed && answer.chars().count() >= MIN_SCENE_CHARS)
        else {
            let err = GenerationError::Transport("AI failed to generate a descriptive scene.".to_string());
            return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
        };
        debug!(flow = %flow, scene = %scene_prompt, "scene prompt ready");

        self.view.set_placeholder_text(
            placeholder,
            &format!("{} is recording a selfie video...", profile.character.name),
            Tone::Neutral,
        );
        let request = VideoRequest::Selfie(SelfieVideoPayload {
            scene_prompt: scene_prompt.clone(),
            custom_attire: attire,
            is_selfie: true,
            seed: 0,
            aspect_ratio: AspectRatio::Landscape,
            model_id: model.name.clone(),
            request_id: lifecycle.request_id(),
        });
        let result = self.caps.video.generate_video(&request).await;
        drop(progress);
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
            }
        };
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Video generation failed.".to_string());
            return self.fail(flow, &lifecycle, Some(placeholder), heading, GenerationError::Transport(message));
        }
        let (paths, sources) = match self
            .collect_artifacts(ArtifactKind::Video, response.file_path.clone().into_iter().collect())
            .await
        {
            Ok(found) => found,
            Err(err) => return self.fail(flow, &lifecycle, Some(placeholder), heading, err),
        };

        let mut media = render_media(ArtifactKind::Video, &paths, &sources);
        media.fragment = DisplayFragment::Sequence(vec![
            DisplayFragment::Hidden {
                text: scene_prompt.clone(),
            },
            media.fragment,
        ]);
        self.present(flow, placeholder, &media);
        let assistant =
            ConversationTurn::assistant(media.fragment.to_html()).with_video(paths[0].clone());
        self.record(assistant.clone());
        self.index_exchange("selfie-video", vec![user_turn, assistant]).await;

        let mut completion = Completion::new(flow, lifecycle.request_id(), &model);
        completion.answer = Some(scene_prompt);
        completion.artifacts = paths;
        completion.sources = sources;
        completion.receipt = self.write_receipt(&completion, &request, &response);
        lifecycle.finish(RequestPhase::Succeeded);
        Outcome::Succeeded(completion)
    }

    /// Renders into the transcript only; nothing is added to history.
    pub async fn submit_advanced_image(&self, form: &AdvancedImageForm) -> Outcome {
        let flow = Flow::AdvancedImage;
        let Some(flight) = self.session.try_begin(flow) else {
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let built = match self.builder.advanced_image(form).await {
            Ok(built) => built,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };
        let heading = flow.failure_heading();

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, true);
        if !built.warnings.is_empty() {
            self.view.set_status(&built.warnings.join("; "), Tone::Neutral);
        }
        let placeholder = self.view.append_placeholder(&format!(
            "Generating {} image with {}...",
            built.payload.mode,
            built.model.label()
        ));
        lifecycle.advance(RequestPhase::Dispatched);

        let request = ImageRequest::Advanced(built.payload.clone());
        let response = match self.caps.image.generate_image(&request).await {
            Ok(response) => response,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
            }
        };
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Image generation failed.".to_string());
            return self.fail(flow, &lifecycle, Some(placeholder), heading, GenerationError::Transport(message));
        }
        let (paths, sources) = match self
            .collect_artifacts(ArtifactKind::Image, response.file_paths.clone())
            .await
        {
            Ok(found) => found,
            Err(err) => return self.fail(flow, &lifecycle, Some(placeholder), heading, err),
        };

        let media = render_media(ArtifactKind::Image, &paths, &sources);
        self.present(flow, placeholder, &media);

        let mut completion = Completion::new(flow, lifecycle.request_id(), &built.model);
        completion.artifacts = paths;
        completion.sources = sources;
        completion.warnings = built.warnings;
        completion.receipt = self.write_receipt(&completion, &request, &response);
        lifecycle.finish(RequestPhase::Succeeded);
        Outcome::Succeeded(completion)
    }

    /// Records the assistant turn only; advanced videos are not indexed.
    pub async fn submit_advanced_video(&self, form: &AdvancedVideoForm) -> Outcome {
        let flow = Flow::AdvancedVideo;
        let Some(flight) = self.session.try_begin(flow) else {
            return Outcome::Busy;
        };
        let lifecycle = self.lifecycle(flow);
        let built = match self.builder.advanced_video(form).await {
            Ok(built) => built,
            Err(err) => return self.reject(flow, &lifecycle, err),
        };
        let heading = flow.failure_heading();

        let _scope = FlowScope::open(flow, self.view.as_ref(), flight, true);
        if !built.warnings.is_empty() {
            self.view.set_status(&built.warnings.join("; "), Tone::Neutral);
        }
        let tag = match built.payload.mode {
            GenerationMode::ImageToVideo => "I2V",
            _ => "T2V",
        };
        let using = built
            .source_name
            .as_deref()
            .map(|name| format!(" using image: {name}"))
            .unwrap_or_default();
        self.view.append_message(
            Speaker::User,
            DisplayFragment::text(&format!(
                "*Requesting Advanced Video ({tag}) via {}{using}.*",
                built.model.label()
            )),
        );
        let placeholder = self.view.append_placeholder("Generating video...");
        let progress = self.watch_progress(flow, &lifecycle, placeholder);
        lifecycle.advance(RequestPhase::Dispatched);

        let request = VideoRequest::Advanced(AdvancedVideoPayload {
            request_id: lifecycle.request_id(),
            ..built.payload.clone()
        });
        let result = self.caps.video.generate_video(&request).await;
        drop(progress);
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let err = GenerationError::transport(&err);
                return self.fail(flow, &lifecycle, Some(placeholder), heading, err);
            }
        };
        if !response.success {
            let message = response
                .error
                .clone()
                .unwrap_or_else(|| "Video generation failed.".to_string());
            return self.fail(flow, &lifecycle, Some(placeholder), heading, GenerationError::Transport(message));
        }
        let (paths, sources) = match self
            .collect_artifacts(ArtifactKind::Video, response.file_path.clone().into_iter().collect())
            .await
        {
            Ok(found) => found,
            Err(err) => return self.fail(flow, &lifecycle, Some(placeholder), heading, err),
        };

        let media = render_media(ArtifactKind::Video, &paths, &sources);
        self.present(flow, placeholder, &media);
        self.record(ConversationTurn::assistant(media.fragment.to_html()).with_video(paths[0].clone()));

        let mut completion = Completion::new(flow, lifecycle.request_id(), &built.model);
        completion.artifacts = paths;
        completion.sources = sources;
        completion.warnings = built.warnings;
        completion.receipt = self.write_receipt(&completion, &request, &response);
        lifecycle.finish(RequestPhase::Succeeded);
        Outcome::Succeeded(completion)
    }
}
