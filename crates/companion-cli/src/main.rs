use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use companion_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use companion_contracts::conversation::Role;
use companion_contracts::models::{
    ModelRegistry, ModelSelector, ModelSpec, CAP_I2I, CAP_I2V, CAP_T2I, CAP_T2V, CAP_TEXT,
};
use companion_contracts::prompts::SavedPrompt;
use companion_contracts::request::{Flow, GenerationMode};
use companion_contracts::tokens::{estimate_send_cost, estimate_tokens};
use companion_engine::{
    open_orchestrator, source_path, AdvancedImageForm, AdvancedVideoForm, ChatView,
    DisplayFragment, EngineConfig, MessageId, ModelChoice, Orchestrator, Outcome, Speaker, Tone,
};

#[derive(Debug, Parser)]
#[command(name = "companion", version, about = "AI companion generation CLI")]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat with slash commands.
    Chat,
    /// One advanced image request.
    Image(ImageArgs),
    /// One advanced video request.
    Video(VideoArgs),
    /// Print the visible conversation window.
    History,
    /// List registered models.
    Models(ModelsArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long, global = true)]
    session_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    text_model: Option<String>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    video_model: Option<String>,
    #[arg(long, global = true)]
    user_name: Option<String>,
    #[arg(long, global = true)]
    persona: Option<String>,
}

#[derive(Debug, Args)]
struct ImageArgs {
    /// Full prompt; overrides the structured fields below.
    #[arg(long, default_value = "")]
    prompt: String,
    #[command(flatten)]
    parts: PromptPartsArgs,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "")]
    negative_prompt: String,
    /// Source image; switches to image-to-image.
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long, default_value_t = 1024)]
    width: u32,
    #[arg(long, default_value_t = 1024)]
    height: u32,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    guidance: Option<f64>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct VideoArgs {
    /// Full prompt; overrides the structured fields below.
    #[arg(long, default_value = "")]
    prompt: String,
    #[command(flatten)]
    parts: PromptPartsArgs,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "")]
    negative_prompt: String,
    /// Source image; switches to image-to-video.
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
    #[arg(long, default_value = "720p")]
    resolution: String,
    #[arg(long, default_value_t = 5)]
    duration: i64,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    guidance: Option<f64>,
    /// Raw JSON for custom video endpoints.
    #[arg(long, default_value = "")]
    custom_payload: String,
    #[arg(long)]
    json: bool,
}

/// Structured prompt fields, joined in a fixed order when no prompt is given.
#[derive(Debug, Default, Args)]
struct PromptPartsArgs {
    #[arg(long)]
    character: Option<String>,
    #[arg(long)]
    scene: Option<String>,
    #[arg(long)]
    action: Option<String>,
    #[arg(long)]
    attire: Option<String>,
    #[arg(long)]
    effects: Option<String>,
    /// Image only.
    #[arg(long)]
    style: Option<String>,
    /// Video only.
    #[arg(long)]
    camera_movement: Option<String>,
}

impl PromptPartsArgs {
    fn to_saved(&self) -> Option<SavedPrompt> {
        let parts = SavedPrompt {
            character: self.character.clone(),
            scene: self.scene.clone(),
            action: self.action.clone(),
            attire: self.attire.clone(),
            effects: self.effects.clone(),
            style: self.style.clone(),
            camera_movement: self.camera_movement.clone(),
            ..SavedPrompt::default()
        };
        (parts != SavedPrompt::default()).then_some(parts)
    }
}

#[derive(Debug, Args)]
struct ModelsArgs {
    /// Only models with this capability (chat, t2i, i2i, t2v, i2v).
    #[arg(long)]
    capability: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("companion error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(dispatch(cli))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = engine_config(&cli.session)?;
    match cli.command {
        Command::Models(args) => {
            print_models(&config, args.capability.as_deref())?;
            Ok(0)
        }
        Command::History => {
            let orchestrator = open(&config, &cli.session, TerminalView::new(true))?;
            print_history(&orchestrator);
            Ok(0)
        }
        Command::Chat => {
            let orchestrator = open(&config, &cli.session, TerminalView::new(false))?;
            run_chat(&orchestrator).await?;
            Ok(0)
        }
        Command::Image(args) => {
            let orchestrator = open(&config, &cli.session, TerminalView::new(true))?;
            let form = image_form(&orchestrator, &args);
            let outcome = orchestrator.submit_advanced_image(&form).await;
            Ok(finish_one_shot(&outcome, args.json))
        }
        Command::Video(args) => {
            let orchestrator = open(&config, &cli.session, TerminalView::new(true))?;
            let form = video_form(&orchestrator, &args);
            let outcome = orchestrator.submit_advanced_video(&form).await;
            Ok(finish_one_shot(&outcome, args.json))
        }
    }
}

fn engine_config(args: &SessionArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = &args.session_dir {
        config = config.with_session_dir(dir);
    }
    if args.user_name.is_some() {
        config.user_name = args.user_name.clone();
    }
    if args.persona.is_some() {
        config.persona = args.persona.clone();
    }
    Ok(config)
}

/// Resolves each slot through the registry. An unusable `--*-model` falls
/// back to a model that can serve the slot, preferring the default's provider.
fn model_choice(args: &SessionArgs, registry: &ModelRegistry) -> Result<ModelChoice> {
    let defaults = ModelChoice::default();
    let pick = |requested: Option<&String>, default: &str, capability: &str| -> Result<String> {
        let mut selector = ModelSelector::new(Some(registry.clone()));
        if let Some(spec) = registry.get(default) {
            selector = selector.with_preferred_provider(spec.provider.clone());
        }
        let name = requested.map_or(default, String::as_str);
        let selection = selector.select(Some(name), capability)?;
        if let Some(reason) = &selection.fallback_reason {
            warn!(model = %selection.model.name, "{reason}");
        }
        Ok(selection.model.name)
    };
    // Edit-only image models and animate-only video models still fill the
    // advanced slots; selfies always need the text-driven capability.
    let slot_capability = |requested: Option<&String>, text_driven: &'static str, source_driven: &'static str| {
        let source_only = requested
            .and_then(|name| registry.get(name))
            .is_some_and(|spec| spec.supports(source_driven) && !spec.supports(text_driven));
        if source_only {
            source_driven
        } else {
            text_driven
        }
    };
    let image = args.image_model.as_ref();
    let video = args.video_model.as_ref();
    Ok(ModelChoice {
        text: pick(args.text_model.as_ref(), &defaults.text, CAP_TEXT)?,
        image: pick(image, &defaults.image, slot_capability(image, CAP_T2I, CAP_I2I))?,
        video: pick(video, &defaults.video, slot_capability(video, CAP_T2V, CAP_I2V))?,
        selfie_image: pick(image, &defaults.selfie_image, CAP_T2I)?,
        selfie_video: pick(video, &defaults.selfie_video, CAP_T2V)?,
    })
}

fn open(config: &EngineConfig, args: &SessionArgs, view: TerminalView) -> Result<Orchestrator> {
    let registry = config.load_registry()?;
    open_orchestrator(config, model_choice(args, &registry)?, Arc::new(view))
}

fn image_form(orchestrator: &Orchestrator, args: &ImageArgs) -> AdvancedImageForm {
    let mode = if args.source.is_some() {
        GenerationMode::ImageToImage
    } else {
        GenerationMode::TextToImage
    };
    AdvancedImageForm {
        model: args
            .model
            .clone()
            .unwrap_or_else(|| orchestrator.session().models().image),
        mode,
        prompt: args.prompt.clone(),
        prompt_parts: args.parts.to_saved(),
        negative_prompt: args.negative_prompt.clone(),
        width: args.width,
        height: args.height,
        steps: args.steps,
        guidance_scale: args.guidance,
        seed: args.seed,
        source_image: args.source.clone(),
    }
}

fn video_form(orchestrator: &Orchestrator, args: &VideoArgs) -> AdvancedVideoForm {
    let mode = if args.source.is_some() {
        GenerationMode::ImageToVideo
    } else {
        GenerationMode::TextToVideo
    };
    AdvancedVideoForm {
        model: args
            .model
            .clone()
            .unwrap_or_else(|| orchestrator.session().models().video),
        mode,
        prompt: args.prompt.clone(),
        prompt_parts: args.parts.to_saved(),
        negative_prompt: args.negative_prompt.clone(),
        aspect_ratio: args.aspect_ratio.clone(),
        resolution: args.resolution.clone(),
        duration: args.duration,
        steps: args.steps,
        guidance_scale: args.guidance,
        custom_payload: args.custom_payload.clone(),
        source_image: args.source.clone(),
    }
}

/// 0 on success, 1 when the backend failed, 2 when the request never left.
fn exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Succeeded(_) => 0,
        Outcome::Failed(_) => 1,
        Outcome::Busy | Outcome::Rejected(_) => 2,
    }
}

fn finish_one_shot(outcome: &Outcome, as_json: bool) -> i32 {
    if as_json {
        println!("{}", outcome_json(outcome));
    }
    exit_code(outcome)
}

fn outcome_json(outcome: &Outcome) -> serde_json::Value {
    match outcome {
        Outcome::Succeeded(done) => json!({
            "status": "succeeded",
            "flow": done.flow.label(),
            "request_id": done.request_id,
            "model": done.model,
            "artifacts": done.artifacts,
            "warnings": done.warnings,
            "receipt": done.receipt.as_ref().map(|path| path.to_string_lossy().to_string()),
        }),
        Outcome::Failed(err) => json!({ "status": "failed", "error": err.to_string() }),
        Outcome::Rejected(err) => json!({ "status": "rejected", "error": err.to_string() }),
        Outcome::Busy => json!({ "status": "busy" }),
    }
}

fn print_models(config: &EngineConfig, capability: Option<&str>) -> Result<()> {
    let registry = config.load_registry()?;
    let specs: Vec<ModelSpec> = match capability {
        Some(capability) => registry.by_capability(capability),
        None => registry.list().cloned().collect(),
    };
    for spec in &specs {
        println!(
            "{:<28} {:<12} {}",
            spec.name,
            spec.provider,
            spec.capabilities.join(",")
        );
    }
    Ok(())
}

fn print_history(orchestrator: &Orchestrator) {
    orchestrator.session().with_conversation(|store| {
        for turn in store.display_window() {
            let who = match turn.role {
                Role::User => "you",
                Role::Assistant => "assistant",
                Role::System => continue,
            };
            match (&turn.media_path, turn.is_video, turn.is_image) {
                (Some(path), true, _) => println!("{who}: [video] {path}"),
                (Some(path), _, true) => println!("{who}: [image] {path}"),
                _ => println!("{who}: {}", turn.content),
            }
        }
    });
}

fn print_tokens(orchestrator: &Orchestrator, pending: &str) {
    let models = orchestrator.session().models();
    let spec = orchestrator.registry().get(&models.text).cloned();
    let (settings, window, user_budget) = orchestrator.session().with_budget(|budget| {
        (budget.settings().clone(), budget.window(), budget.user_budget())
    });
    let (attachment_tokens, canvas_tokens) = orchestrator.session().with_conversation(|store| {
        let attachment = store
            .attached_file()
            .map(|file| estimate_tokens(&file.content))
            .unwrap_or(0);
        let canvas = store
            .canvas_files()
            .values()
            .map(|content| estimate_tokens(content))
            .sum::<u64>();
        (attachment, canvas)
    });
    if let Some(window) = window {
        println!(
            "context {} / max output {} | room for your message {}",
            window.context_window, window.max_output, user_budget
        );
    }
    println!(
        "output {} | history {} | knowledge {} | system {} | recent turns {}",
        settings.output,
        settings.history,
        settings.knowledge,
        settings.system_reserve,
        settings.recent_turns
    );
    let cost = estimate_send_cost(
        estimate_tokens(pending),
        attachment_tokens,
        canvas_tokens,
        settings.output,
        spec.as_ref().and_then(|spec| spec.cost_input).unwrap_or(0.0),
        spec.as_ref().and_then(|spec| spec.cost_output).unwrap_or(0.0),
    );
    println!(
        "next send: ~{} input tokens, ~${:.4}",
        cost.input_tokens,
        cost.total_usd()
    );
}

async fn run_chat(orchestrator: &Orchestrator) -> Result<()> {
    println!("Type /help for commands. Ctrl-D exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        handle_intent(orchestrator, parse_intent(input)).await;
    }
    Ok(())
}

async fn handle_intent(orchestrator: &Orchestrator, intent: Intent) {
    debug!(?intent, "chat intent");
    match intent {
        Intent::Noop => {}
        Intent::Help => {
            for command in CHAT_HELP_COMMANDS {
                println!("  {command}");
            }
        }
        Intent::Chat { message } => {
            orchestrator.submit_chat(&message).await;
        }
        Intent::Resend => {
            orchestrator.resend_last().await;
        }
        Intent::SetModel { slot, model } => match orchestrator.select_model(slot, &model) {
            Ok(spec) => println!("{slot:?} model set to {}", spec.label()),
            Err(err) => println!("error: {err}"),
        },
        Intent::Selfie { suggestion, attire } => {
            orchestrator
                .submit_selfie(&suggestion, attire.as_deref())
                .await;
        }
        Intent::SelfieVideo { suggestion, attire } => {
            orchestrator
                .submit_selfie_video(&suggestion, attire.as_deref())
                .await;
        }
        Intent::Image { prompt } => {
            let form = AdvancedImageForm {
                model: orchestrator.session().models().image,
                prompt,
                ..AdvancedImageForm::default()
            };
            orchestrator.submit_advanced_image(&form).await;
        }
        Intent::EditImage { path, prompt } => {
            let form = AdvancedImageForm {
                model: orchestrator.session().models().image,
                mode: GenerationMode::ImageToImage,
                prompt,
                source_image: Some(PathBuf::from(path)),
                ..AdvancedImageForm::default()
            };
            orchestrator.submit_advanced_image(&form).await;
        }
        Intent::Video { prompt } => {
            let form = AdvancedVideoForm {
                model: orchestrator.session().models().video,
                prompt,
                ..AdvancedVideoForm::default()
            };
            orchestrator.submit_advanced_video(&form).await;
        }
        Intent::Animate { path, prompt } => {
            let form = AdvancedVideoForm {
                model: orchestrator.session().models().video,
                mode: GenerationMode::ImageToVideo,
                prompt,
                source_image: Some(PathBuf::from(path)),
                ..AdvancedVideoForm::default()
            };
            orchestrator.submit_advanced_video(&form).await;
        }
        Intent::Clear => {
            orchestrator.clear_history();
            println!("History cleared.");
        }
        Intent::Attach { path } => match orchestrator.attach_file(Path::new(&path)).await {
            Ok(name) => println!("Attached {name}; it goes out with the next message."),
            Err(err) => println!("error: {err:#}"),
        },
        Intent::Canvas { paths } => {
            if paths.is_empty() {
                list_canvas(orchestrator);
            }
            for path in paths {
                match orchestrator.add_canvas_file(Path::new(&path)).await {
                    Ok(name) => println!("Canvas: {name}"),
                    Err(err) => println!("error: {err:#}"),
                }
            }
        }
        Intent::CanvasClear => {
            orchestrator
                .session()
                .with_conversation(|store| store.clear_canvas());
            println!("Canvas cleared.");
        }
        Intent::History => print_history(orchestrator),
        Intent::Tokens => print_tokens(orchestrator, ""),
        Intent::Unknown { command, .. } => {
            println!("Unknown command: {command}. Try /help.");
        }
    }
}

fn list_canvas(orchestrator: &Orchestrator) {
    orchestrator.session().with_conversation(|store| {
        if store.canvas_files().is_empty() {
            println!("Canvas is empty.");
        }
        for name in store.canvas_files().keys() {
            println!("  {name}");
        }
    });
}

#[derive(Debug, Default)]
struct TerminalState {
    next_id: u64,
    title: String,
    placeholders: HashMap<u64, String>,
}

/// Prints the transcript as it changes. User turns are echoed only outside
/// the REPL, where the prompt line already shows them.
struct TerminalView {
    echo_user: bool,
    state: Mutex<TerminalState>,
}

impl TerminalView {
    fn new(echo_user: bool) -> Self {
        Self {
            echo_user,
            state: Mutex::new(TerminalState {
                title: "Companion".to_string(),
                ..TerminalState::default()
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TerminalState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn next_id(&self) -> MessageId {
        self.with_state(|state| {
            state.next_id += 1;
            MessageId(state.next_id)
        })
    }
}

impl ChatView for TerminalView {
    fn append_message(&self, speaker: Speaker, fragment: DisplayFragment) -> MessageId {
        let id = self.next_id();
        match speaker {
            Speaker::User if self.echo_user => print_fragment("you", &fragment),
            Speaker::User => {}
            Speaker::Assistant => print_fragment("assistant", &fragment),
        }
        id
    }

    fn append_placeholder(&self, text: &str) -> MessageId {
        let id = self.next_id();
        self.with_state(|state| state.placeholders.insert(id.0, text.to_string()));
        println!("  ... {text}");
        id
    }

    fn set_placeholder_text(&self, id: MessageId, text: &str, tone: Tone) {
        let changed = self.with_state(|state| {
            state
                .placeholders
                .insert(id.0, text.to_string())
                .map_or(true, |previous| previous != text)
        });
        if changed {
            println!("  {} {text}", tone_marker(tone));
        }
    }

    fn replace_message(&self, id: MessageId, fragment: DisplayFragment) {
        self.with_state(|state| state.placeholders.remove(&id.0));
        print_fragment("assistant", &fragment);
    }

    fn remove_message(&self, id: MessageId) {
        self.with_state(|state| state.placeholders.remove(&id.0));
    }

    fn set_control_enabled(&self, flow: Flow, enabled: bool) {
        debug!(flow = flow.label(), enabled, "control state");
    }

    fn set_status(&self, text: &str, tone: Tone) {
        println!("{} {text}", tone_marker(tone));
    }

    fn reveal_output_folder(&self, _flow: Flow, folder: &str) {
        println!("  output folder: {folder}");
    }

    fn clear_form(&self, _flow: Flow) {}

    fn window_title(&self) -> String {
        self.with_state(|state| state.title.clone())
    }

    fn set_window_title(&self, title: &str) {
        self.with_state(|state| state.title = title.to_string());
    }
}

fn tone_marker(tone: Tone) -> &'static str {
    match tone {
        Tone::Neutral => "..",
        Tone::Success => "ok",
        Tone::Error => "!!",
    }
}

fn print_fragment(who: &str, fragment: &DisplayFragment) {
    for line in fragment_lines(fragment) {
        println!("{who}: {line}");
    }
}

fn fragment_lines(fragment: &DisplayFragment) -> Vec<String> {
    match fragment {
        DisplayFragment::Text { html } => {
            let text = plain_text(html);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
        DisplayFragment::Image { src, .. } => vec![format!("[image] {}", media_label(src))],
        DisplayFragment::Gallery { sources } => sources
            .iter()
            .map(|src| format!("[image] {}", media_label(src)))
            .collect(),
        DisplayFragment::Video(video) => vec![format!("[video] {}", media_label(&video.src))],
        DisplayFragment::Hidden { .. } => Vec::new(),
        DisplayFragment::Sequence(parts) => parts.iter().flat_map(fragment_lines).collect(),
    }
}

fn media_label(src: &str) -> String {
    if src.starts_with("data:") {
        return "(inline data)".to_string();
    }
    source_path(src)
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| src.to_string())
}

/// Sanitized HTML back to readable terminal text.
fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    for ch in html.chars() {
        match (in_tag, ch) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split_whitespace()
                    .next()
                    .unwrap_or_default();
                if matches!(name, "p" | "br" | "li" | "pre" | "h1" | "h2" | "h3" | "div")
                    && !out.ends_with('\n')
                    && !out.is_empty()
                {
                    out.push('\n');
                }
            }
            (true, _) => tag.push(ch),
            (false, _) => out.push(ch),
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_drops_tags_and_decodes_entities() {
        let html = "<p>Hello <strong>there</strong> &amp; welcome</p>\n<p>a &lt; b</p>";
        assert_eq!(plain_text(html), "Hello there & welcome\n\na < b");
    }

    #[test]
    fn fragment_lines_flatten_media() {
        let fragment = DisplayFragment::Sequence(vec![
            DisplayFragment::Text {
                html: "<p>caption</p>".to_string(),
            },
            DisplayFragment::Image {
                src: "file:///tmp/out.png".to_string(),
                alt: "Generated image".to_string(),
            },
            DisplayFragment::Hidden {
                text: "ignored".to_string(),
            },
            DisplayFragment::Image {
                src: "data:image/png;base64,AAAA".to_string(),
                alt: String::new(),
            },
        ]);
        assert_eq!(
            fragment_lines(&fragment),
            vec![
                "caption".to_string(),
                "[image] /tmp/out.png".to_string(),
                "[image] (inline data)".to_string(),
            ]
        );
    }

    #[test]
    fn exit_codes_separate_rejections_from_failures() {
        assert_eq!(exit_code(&Outcome::Busy), 2);
    }

    #[test]
    fn video_flags_build_an_image_to_video_form() -> Result<()> {
        let cli = Cli::try_parse_from([
            "companion",
            "--video-model",
            "dryrun-video-1",
            "video",
            "--prompt",
            "waves",
            "--source",
            "face.png",
            "--duration",
            "8",
        ])?;
        let Command::Video(args) = &cli.command else {
            anyhow::bail!("expected the video subcommand");
        };
        assert_eq!(args.duration, 8);
        assert_eq!(args.aspect_ratio, "16:9");
        let models = model_choice(&cli.session, &ModelRegistry::new(None))?;
        assert_eq!(models.selfie_video, "dryrun-video-1");
        assert_eq!(args.parts.to_saved(), None);
        Ok(())
    }

    #[test]
    fn unusable_models_fall_back_per_slot() -> Result<()> {
        let cli = Cli::try_parse_from([
            "companion",
            "--text-model",
            "dryrun-image-1",
            "--image-model",
            "black-forest-labs/FLUX.1-kontext-max",
            "models",
        ])?;
        let models = model_choice(&cli.session, &ModelRegistry::new(None))?;
        assert_eq!(models.text, "dryrun-text-1");
        assert_eq!(models.image, "black-forest-labs/FLUX.1-kontext-max");
        assert_eq!(models.selfie_image, "dryrun-image-1");
        assert_eq!(models.video, "dryrun-video-1");
        Ok(())
    }

    #[test]
    fn structured_flags_fill_prompt_parts() -> Result<()> {
        let cli = Cli::try_parse_from([
            "companion",
            "image",
            "--scene",
            "neon alley",
            "--style",
            "watercolor",
        ])?;
        let Command::Image(args) = &cli.command else {
            anyhow::bail!("expected the image subcommand");
        };
        assert_eq!(args.prompt, "");
        let parts = args.parts.to_saved().unwrap_or_default();
        assert_eq!(parts.scene.as_deref(), Some("neon alley"));
        assert_eq!(parts.style.as_deref(), Some("watercolor"));
        Ok(())
    }

    #[test]
    fn terminal_view_tracks_title() {
        let view = TerminalView::new(false);
        assert_eq!(view.window_title(), "Companion");
        view.set_window_title("Companion - Generating...");
        assert_eq!(view.window_title(), "Companion - Generating...");
    }
}
