use std::path::{Path, PathBuf};

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use reqwest::Url;

use companion_contracts::request::ArtifactKind;

/// Something the transcript can show. `to_html` is what gets stored in the
/// conversation history for assistant media turns.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayFragment {
    Text { html: String },
    Image { src: String, alt: String },
    Gallery { sources: Vec<String> },
    Video(VideoElement),
    Hidden { text: String },
    Sequence(Vec<DisplayFragment>),
}

impl DisplayFragment {
    /// Untrusted markdown, sanitized.
    pub fn text(markdown: &str) -> Self {
        Self::Text {
            html: render_markdown(markdown),
        }
    }

    pub fn to_html(&self) -> String {
        match self {
            Self::Text { html } => html.clone(),
            Self::Image { src, alt } => format!(
                "<img src=\"{}\" alt=\"{}\" class=\"generated-image\">",
                escape_attr(src),
                escape_attr(alt)
            ),
            Self::Gallery { sources } => {
                let images: String = sources
                    .iter()
                    .map(|src| {
                        format!(
                            "<img src=\"{}\" alt=\"Generated image\" class=\"generated-image\">",
                            escape_attr(src)
                        )
                    })
                    .collect();
                format!("<div class=\"image-gallery\">{images}</div>")
            }
            Self::Video(video) => video.to_html(),
            Self::Hidden { text } => {
                format!("<div style=\"display:none\">{}</div>", escape_attr(text))
            }
            Self::Sequence(parts) => parts.iter().map(DisplayFragment::to_html).collect(),
        }
    }

    pub fn video_element(&self) -> Option<&VideoElement> {
        match self {
            Self::Video(video) => Some(video),
            Self::Sequence(parts) => parts.iter().find_map(DisplayFragment::video_element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Play,
    Pause,
}

/// Inline looping player. Starts unmuted; see `playback_after_probe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoElement {
    pub src: String,
    pub controls: bool,
    pub autoplay: bool,
    pub looping: bool,
    pub playsinline: bool,
    pub muted: bool,
}

impl VideoElement {
    pub fn inline(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            controls: true,
            autoplay: true,
            looping: true,
            playsinline: true,
            muted: false,
        }
    }

    /// A clip that carries audio but ended up muted (autoplay policy) is
    /// paused rather than left looping silently.
    pub fn playback_after_probe(&self, muted: bool, has_audio: bool) -> Playback {
        if muted && has_audio {
            Playback::Pause
        } else {
            Playback::Play
        }
    }

    pub fn to_html(&self) -> String {
        let mut attrs = vec![format!("src=\"{}\"", escape_attr(&self.src))];
        for (enabled, name) in [
            (self.controls, "controls"),
            (self.autoplay, "autoplay"),
            (self.looping, "loop"),
            (self.playsinline, "playsinline"),
            (self.muted, "muted"),
        ] {
            if enabled {
                attrs.push(name.to_string());
            }
        }
        format!(
            "<video {} style=\"max-width: 100%; border-radius: 10px;\"></video>",
            attrs.join(" ")
        )
    }
}

/// Renderable media plus the folder the output button should open.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMedia {
    pub fragment: DisplayFragment,
    pub output_folder: Option<String>,
}

pub fn render_media(kind: ArtifactKind, paths: &[String], sources: &[String]) -> RenderedMedia {
    let fragment = match kind {
        ArtifactKind::Video => DisplayFragment::Video(VideoElement::inline(
            sources.first().cloned().unwrap_or_default(),
        )),
        ArtifactKind::Image if sources.len() == 1 => DisplayFragment::Image {
            src: sources[0].clone(),
            alt: "Generated image".to_string(),
        },
        ArtifactKind::Image => DisplayFragment::Gallery {
            sources: sources.to_vec(),
        },
    };
    RenderedMedia {
        fragment,
        output_folder: paths.first().and_then(|path| output_folder(path)),
    }
}

/// Folder holding `path`; a bare file name lives in the working directory.
pub fn output_folder(path: &str) -> Option<String> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    Path::new(path).parent().map(|parent| {
        let parent = parent.to_string_lossy();
        if parent.is_empty() {
            ".".to_string()
        } else {
            parent.to_string()
        }
    })
}

/// Local path behind a `file://` display source.
pub fn source_path(src: &str) -> Option<PathBuf> {
    Url::parse(src)
        .ok()
        .filter(|url| url.scheme() == "file")?
        .to_file_path()
        .ok()
}

/// Markdown to HTML with raw HTML demoted to text and script-capable URLs
/// neutralized.
pub fn render_markdown(content: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(content, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let lowered: String = url
        .trim()
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    let blocked = lowered.starts_with("javascript:")
        || lowered.starts_with("vbscript:")
        || (lowered.starts_with("data:") && !lowered.starts_with("data:image/"));
    if blocked {
        CowStr::Borrowed("#")
    } else {
        url
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sources_decode_back_to_paths() {
        assert_eq!(
            source_path("file:///tmp/take%20%232%2050%25.mp4"),
            Some(PathBuf::from("/tmp/take #2 50%.mp4"))
        );
        assert_eq!(source_path("data:image/png;base64,AAAA"), None);
        assert_eq!(source_path("https://example.com/a.png"), None);
    }

    #[test]
    fn markdown_renders_basic_formatting() {
        let html = render_markdown("**hi** there\n\n- one\n- two");
        assert!(html.contains("<strong>hi</strong>"));
        assert!(html.contains("<li>one</li>"));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = render_markdown("before <script>alert(1)</script> after\n\n<img src=x onerror=alert(1)>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<img src=x"));
    }

    #[test]
    fn script_links_are_neutralized() {
        let html = render_markdown("[click](javascript:alert(1)) [ok](https://example.com)");
        assert!(!html.contains("javascript:"));
        assert!(html.contains("href=\"#\""));
        assert!(html.contains("href=\"https://example.com\""));
    }

    #[test]
    fn video_fragment_is_inline_looping_player() {
        let rendered = render_media(
            ArtifactKind::Video,
            &["/tmp/out/out.mp4".to_string()],
            &["file:///tmp/out/out.mp4".to_string()],
        );
        let video = rendered
            .fragment
            .video_element()
            .cloned()
            .unwrap_or_else(|| VideoElement::inline(""));
        assert_eq!(video.src, "file:///tmp/out/out.mp4");
        assert!(video.autoplay && video.looping && video.playsinline && !video.muted);
        assert_eq!(rendered.output_folder.as_deref(), Some("/tmp/out"));
        let html = rendered.fragment.to_html();
        assert!(html.contains("autoplay loop playsinline"));
        assert!(!html.contains("muted"));
    }

    #[test]
    fn muted_clip_with_audio_is_paused() {
        let video = VideoElement::inline("file:///a.mp4");
        assert_eq!(video.playback_after_probe(true, true), Playback::Pause);
        assert_eq!(video.playback_after_probe(true, false), Playback::Play);
        assert_eq!(video.playback_after_probe(false, true), Playback::Play);
    }

    #[test]
    fn several_images_become_gallery() {
        let rendered = render_media(
            ArtifactKind::Image,
            &["a/1.png".to_string(), "a/2.png".to_string()],
            &["file:///a/1.png".to_string(), "file:///a/2.png\"".to_string()],
        );
        let html = rendered.fragment.to_html();
        assert!(html.starts_with("<div class=\"image-gallery\">"));
        assert!(html.contains("2.png&quot;"));
        assert_eq!(rendered.output_folder.as_deref(), Some("a"));
    }

    #[test]
    fn bare_file_name_reveals_working_directory() {
        assert_eq!(output_folder("out.mp4").as_deref(), Some("."));
        assert_eq!(output_folder("  ").as_deref(), None);
    }
}
