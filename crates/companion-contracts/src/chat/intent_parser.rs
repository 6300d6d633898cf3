use super::command_registry::{find_command, CommandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSlot {
    Text,
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Noop,
    Chat { message: String },
    Help,
    SetModel { slot: ModelSlot, model: String },
    Selfie { suggestion: String, attire: Option<String> },
    SelfieVideo { suggestion: String, attire: Option<String> },
    Image { prompt: String },
    EditImage { path: String, prompt: String },
    Video { prompt: String },
    Animate { path: String, prompt: String },
    Resend,
    Clear,
    Attach { path: String },
    Canvas { paths: Vec<String> },
    CanvasClear,
    History,
    Tokens,
    Unknown { command: String, arg: String },
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

/// `/edit "a b.png" make it night` gives `("a b.png", "make it night")`.
fn parse_path_then_text(arg: &str) -> (String, String) {
    let mut parts = parse_path_args(arg).into_iter();
    let path = parts.next().unwrap_or_default();
    let prompt = parts.collect::<Vec<_>>().join(" ");
    (path, prompt)
}

/// Splits `suggestion | attire`; a blank attire is dropped.
fn parse_selfie_args(arg: &str) -> (String, Option<String>) {
    match arg.split_once('|') {
        Some((suggestion, attire)) => {
            let attire = attire.trim();
            (
                suggestion.trim().to_string(),
                (!attire.is_empty()).then(|| attire.to_string()),
            )
        }
        None => (arg.trim().to_string(), None),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return Intent::Chat {
            message: raw_trimmed.to_string(),
        };
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Intent::Chat {
            message: raw_trimmed.to_string(),
        };
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    let Some(spec) = find_command(&command) else {
        return Intent::Unknown {
            command,
            arg: arg.to_string(),
        };
    };

    match (spec.kind, spec.command) {
        (CommandKind::RawArg, name) => {
            let slot = match name {
                "image_model" => ModelSlot::Image,
                "video_model" => ModelSlot::Video,
                _ => ModelSlot::Text,
            };
            Intent::SetModel {
                slot,
                model: arg.to_string(),
            }
        }
        (CommandKind::Text, "selfie") => {
            let (suggestion, attire) = parse_selfie_args(arg);
            Intent::Selfie { suggestion, attire }
        }
        (CommandKind::Text, "selfie_video") => {
            let (suggestion, attire) = parse_selfie_args(arg);
            Intent::SelfieVideo { suggestion, attire }
        }
        (CommandKind::Text, "video") => Intent::Video {
            prompt: arg.to_string(),
        },
        (CommandKind::Text, _) => Intent::Image {
            prompt: arg.to_string(),
        },
        (CommandKind::PathThenText, "animate") => {
            let (path, prompt) = parse_path_then_text(arg);
            Intent::Animate { path, prompt }
        }
        (CommandKind::PathThenText, _) => {
            let (path, prompt) = parse_path_then_text(arg);
            Intent::EditImage { path, prompt }
        }
        (CommandKind::SinglePath, _) => Intent::Attach {
            path: parse_single_path_arg(arg),
        },
        (CommandKind::MultiPath, _) => Intent::Canvas {
            paths: parse_path_args(arg),
        },
        (CommandKind::NoArg, "help") => Intent::Help,
        (CommandKind::NoArg, "resend") => Intent::Resend,
        (CommandKind::NoArg, "clear") => Intent::Clear,
        (CommandKind::NoArg, "canvas_clear") => Intent::CanvasClear,
        (CommandKind::NoArg, "history") => Intent::History,
        (CommandKind::NoArg, _) => Intent::Tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_intent, Intent, ModelSlot};

    #[test]
    fn plain_text_is_a_chat_message() {
        assert_eq!(
            parse_intent("  hello there  "),
            Intent::Chat {
                message: "hello there".to_string()
            }
        );
        assert_eq!(parse_intent("   "), Intent::Noop);
        assert_eq!(
            parse_intent("/ not a command"),
            Intent::Chat {
                message: "/ not a command".to_string()
            }
        );
    }

    #[test]
    fn parse_model_commands() {
        assert_eq!(
            parse_intent("/text_model gpt-4o-mini"),
            Intent::SetModel {
                slot: ModelSlot::Text,
                model: "gpt-4o-mini".to_string()
            }
        );
        assert_eq!(
            parse_intent("/VIDEO_MODEL openai/sora-2-t2v"),
            Intent::SetModel {
                slot: ModelSlot::Video,
                model: "openai/sora-2-t2v".to_string()
            }
        );
    }

    #[test]
    fn parse_selfie_with_and_without_attire() {
        assert_eq!(
            parse_intent("/selfie at the beach | red sundress"),
            Intent::Selfie {
                suggestion: "at the beach".to_string(),
                attire: Some("red sundress".to_string())
            }
        );
        assert_eq!(
            parse_intent("/selfie_video dancing in rain |  "),
            Intent::SelfieVideo {
                suggestion: "dancing in rain".to_string(),
                attire: None
            }
        );
    }

    #[test]
    fn parse_quoted_path_then_prompt() {
        assert_eq!(
            parse_intent("/edit \"/tmp/a b.png\" make it night"),
            Intent::EditImage {
                path: "/tmp/a b.png".to_string(),
                prompt: "make it night".to_string()
            }
        );
        assert_eq!(
            parse_intent("/animate still.jpg"),
            Intent::Animate {
                path: "still.jpg".to_string(),
                prompt: String::new()
            }
        );
    }

    #[test]
    fn parse_path_commands() {
        assert_eq!(
            parse_intent("/attach \"/tmp/my notes.md\""),
            Intent::Attach {
                path: "/tmp/my notes.md".to_string()
            }
        );
        assert_eq!(
            parse_intent("/canvas a.rs \"b c.rs\""),
            Intent::Canvas {
                paths: vec!["a.rs".to_string(), "b c.rs".to_string()]
            }
        );
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/resend"), Intent::Resend);
        assert_eq!(parse_intent("/clear"), Intent::Clear);
        assert_eq!(parse_intent("/canvas_clear"), Intent::CanvasClear);
        assert_eq!(parse_intent("/tokens"), Intent::Tokens);
        assert_eq!(parse_intent("/history"), Intent::History);
        assert_eq!(parse_intent("/help"), Intent::Help);
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_intent("/magic foo bar"),
            Intent::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }
}
