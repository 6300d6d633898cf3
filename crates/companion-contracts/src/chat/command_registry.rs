#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Whole remainder is one raw value (a model name).
    RawArg,
    /// Whole remainder is free text, optionally `text | attire`.
    Text,
    /// First shell word is a path, the rest is a prompt.
    PathThenText,
    /// One path, quoted or not.
    SinglePath,
    /// Any number of paths.
    MultiPath,
    NoArg,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub kind: CommandKind,
    pub usage: &'static str,
}

const fn spec(command: &'static str, kind: CommandKind, usage: &'static str) -> CommandSpec {
    CommandSpec {
        command,
        kind,
        usage,
    }
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    spec("help", CommandKind::NoArg, "/help"),
    spec("text_model", CommandKind::RawArg, "/text_model <model>"),
    spec("image_model", CommandKind::RawArg, "/image_model <model>"),
    spec("video_model", CommandKind::RawArg, "/video_model <model>"),
    spec("selfie", CommandKind::Text, "/selfie <suggestion> [| attire]"),
    spec(
        "selfie_video",
        CommandKind::Text,
        "/selfie_video <suggestion> [| attire]",
    ),
    spec("image", CommandKind::Text, "/image <prompt>"),
    spec("edit", CommandKind::PathThenText, "/edit <path> <prompt>"),
    spec("video", CommandKind::Text, "/video <prompt>"),
    spec("animate", CommandKind::PathThenText, "/animate <path> <prompt>"),
    spec("resend", CommandKind::NoArg, "/resend"),
    spec("clear", CommandKind::NoArg, "/clear"),
    spec("attach", CommandKind::SinglePath, "/attach <path>"),
    spec("canvas", CommandKind::MultiPath, "/canvas <path...>"),
    spec("canvas_clear", CommandKind::NoArg, "/canvas_clear"),
    spec("history", CommandKind::NoArg, "/history"),
    spec("tokens", CommandKind::NoArg, "/tokens"),
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/text_model <model>",
    "/image_model <model>",
    "/video_model <model>",
    "/selfie <suggestion> [| attire]",
    "/selfie_video <suggestion> [| attire]",
    "/image <prompt>",
    "/edit <path> <prompt>",
    "/video <prompt>",
    "/animate <path> <prompt>",
    "/resend",
    "/clear",
    "/attach <path>",
    "/canvas <path...>",
    "/canvas_clear",
    "/history",
    "/tokens",
];

#[cfg(test)]
mod tests {
    use super::{COMMANDS, CHAT_HELP_COMMANDS};

    #[test]
    fn help_lists_every_registered_usage() {
        assert_eq!(COMMANDS.len(), CHAT_HELP_COMMANDS.len());
        for spec in COMMANDS {
            assert!(CHAT_HELP_COMMANDS.contains(&spec.usage), "{}", spec.command);
        }
    }
}
