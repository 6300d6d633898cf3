//! Deterministic local backend. Produces real files so the whole request
//! path can run without network access.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tracing::debug;

use companion_contracts::conversation::Role;
use companion_contracts::prompts::{default_image_prompt, default_video_prompt};

use crate::capabilities::{
    ImageGenerator, ImageRequest, ImageResponse, TextGenerator, TextRequest, TextResponse,
    VideoGenerator, VideoRequest, VideoResponse,
};
use crate::progress::{ProgressEvent, ProgressHub, ProgressStatus};
use crate::util::{color_from_prompt, short_id};

const SELFIE_SIDE: u32 = 512;

pub struct DryrunBackend {
    output_dir: PathBuf,
    progress: ProgressHub,
}

impl DryrunBackend {
    pub fn new(output_dir: impl Into<PathBuf>, progress: ProgressHub) -> Self {
        Self {
            output_dir: output_dir.into(),
            progress,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn artifact_path(&self, prefix: &str, prompt: &str, idx: u64, ext: &str) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        self.output_dir.join(format!(
            "{prefix}-{stamp}-{}.{ext}",
            short_id(prompt, idx)
        ))
    }

    async fn ensure_output_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("failed to create {}", self.output_dir.display()))
    }

    fn report(&self, request_id: &str, status: ProgressStatus, message: &str) {
        self.progress
            .publish(&ProgressEvent::new(status, message).for_request(request_id));
    }
}

#[async_trait]
impl TextGenerator for DryrunBackend {
    async fn generate_text(&self, request: &TextRequest) -> Result<TextResponse> {
        match request {
            TextRequest::Chat(payload) => {
                let last = payload
                    .history
                    .iter()
                    .rev()
                    .find(|turn| turn.role == Role::User)
                    .map(|turn| turn.content.trim().to_string())
                    .unwrap_or_default();
                debug!(model = %payload.model_config.model_id, "dryrun chat");
                Ok(TextResponse {
                    answer: Some(format!("(dryrun) You said: {last}")),
                    thinking: Some(format!(
                        "{} turns of history, {} canvas files",
                        payload.history.len(),
                        payload.context_canvas_files.len()
                    )),
                    ..TextResponse::default()
                })
            }
            TextRequest::VideoScene(payload) => Ok(TextResponse::answer(default_video_prompt(
                &payload.character,
                &payload.suggestion,
                payload.custom_attire.as_deref(),
            ))),
        }
    }
}

#[async_trait]
impl ImageGenerator for DryrunBackend {
    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        self.ensure_output_dir().await?;
        let (prefix, prompt, width, height, seed) = match request {
            ImageRequest::Selfie(payload) => (
                "selfie",
                format!(
                    "{}, {}",
                    default_image_prompt(&payload.character),
                    payload.suggestion
                ),
                SELFIE_SIDE,
                SELFIE_SIDE,
                0,
            ),
            ImageRequest::Advanced(payload) => (
                "image",
                payload.prompt.clone(),
                payload.width,
                payload.height,
                payload.seed.unwrap_or_default() as u64,
            ),
        };
        let path = self.artifact_path(prefix, &prompt, 0, "png");
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_dryrun_image(&target, width, height, &prompt, seed))
            .await
            .context("dryrun image writer panicked")??;
        Ok(ImageResponse {
            success: true,
            file_paths: vec![path.to_string_lossy().to_string()],
            error: None,
        })
    }
}

#[async_trait]
impl VideoGenerator for DryrunBackend {
    async fn generate_video(&self, request: &VideoRequest) -> Result<VideoResponse> {
        self.ensure_output_dir().await?;
        let prompt = match request {
            VideoRequest::Selfie(payload) => payload.scene_prompt.as_str(),
            VideoRequest::Advanced(payload) => payload.prompt.as_str(),
        };
        let request_id = request.request_id();
        self.report(request_id, ProgressStatus::Submitted, "Request submitted");
        tokio::task::yield_now().await;
        self.report(request_id, ProgressStatus::Processing, "Rendering frames");
        let path = self.artifact_path("video", prompt, 0, "mp4");
        tokio::fs::write(&path, mp4_stub(prompt))
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.report(request_id, ProgressStatus::Downloading, "Saving video");
        tokio::task::yield_now().await;
        self.report(request_id, ProgressStatus::Completed, "Video ready");
        Ok(VideoResponse {
            success: true,
            file_path: Some(path.to_string_lossy().to_string()),
            error: None,
        })
    }
}

fn write_dryrun_image(path: &Path, width: u32, height: u32, prompt: &str, seed: u64) -> Result<()> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))
}

/// `ftyp` box followed by a `free` box holding the prompt. Enough for
/// players and mime sniffers to recognise the container.
fn mp4_stub(prompt: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&24u32.to_be_bytes());
    out.extend_from_slice(b"ftypisom");
    out.extend_from_slice(&0x200u32.to_be_bytes());
    out.extend_from_slice(b"isommp42");
    let note = prompt.as_bytes();
    out.extend_from_slice(&((note.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(b"free");
    out.extend_from_slice(note);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use companion_contracts::prompts::CharacterProfile;

    use super::*;
    use crate::capabilities::{ScenePromptPayload, SelfieImagePayload, SelfieVideoPayload};
    use companion_contracts::request::AspectRatio;

    #[tokio::test]
    async fn selfie_image_writes_png() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = DryrunBackend::new(temp.path().join("out"), ProgressHub::new());
        let response = backend
            .generate_image(&ImageRequest::Selfie(SelfieImagePayload {
                suggestion: "at the beach".to_string(),
                custom_attire: None,
                character: CharacterProfile::default(),
                model_id: "dryrun-image-1".to_string(),
            }))
            .await?;
        assert!(response.success);
        assert_eq!(response.file_paths.len(), 1);
        let decoded = image::open(&response.file_paths[0])?;
        assert_eq!(decoded.width(), SELFIE_SIDE);
        Ok(())
    }

    #[tokio::test]
    async fn video_reports_progress_in_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let hub = ProgressHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = hub.subscribe(move |event| {
            if let Ok(mut seen) = sink.lock() {
                if event.concerns("selfie-video-7") {
                    seen.push(event.status.as_str().to_string());
                }
            }
        });
        let backend = DryrunBackend::new(temp.path(), hub);
        let response = backend
            .generate_video(&VideoRequest::Selfie(SelfieVideoPayload {
                scene_prompt: "waving on a pier at dusk".to_string(),
                custom_attire: None,
                is_selfie: true,
                seed: 0,
                aspect_ratio: AspectRatio::Landscape,
                model_id: "dryrun-video-1".to_string(),
                request_id: "selfie-video-7".to_string(),
            }))
            .await?;
        let path = response.file_path.unwrap_or_default();
        assert!(path.ends_with(".mp4"));
        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[4..8], b"ftyp");
        let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen, ["submitted", "processing", "downloading", "completed"]);
        Ok(())
    }

    #[tokio::test]
    async fn scene_prompt_is_descriptive() -> Result<()> {
        let backend = DryrunBackend::new(".", ProgressHub::new());
        let response = backend
            .generate_text(&TextRequest::VideoScene(ScenePromptPayload {
                suggestion: "at a cafe".to_string(),
                user_name: "Sam".to_string(),
                persona: "AI".to_string(),
                recent_history: Vec::new(),
                character: CharacterProfile::default(),
                custom_attire: Some("yellow raincoat".to_string()),
            }))
            .await?;
        let answer = response.answer.unwrap_or_default();
        assert!(answer.starts_with("An AI character, at a cafe, turning to face camera"));
        assert!(answer.contains("yellow raincoat"));
        assert!(!answer.contains("futuristic outfit"));
        Ok(())
    }
}
