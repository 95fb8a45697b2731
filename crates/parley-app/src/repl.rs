//! Slash commands understood by the interactive chat.

use std::path::PathBuf;

pub const HELP: &str = "\
Commands:
  /new            start a new chat
  /image <path>   attach an image (press Enter to send it alone)
  /upload <path>  upload a document and ask about it
  /history        list the prompts in this chat
  /usage          show usage for this session
  /help           show this help
  /quit           leave";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Message(String),
    New,
    Image(PathBuf),
    Upload(PathBuf),
    History,
    Usage,
    Help,
    Quit,
    /// A slash command that is unknown or missing its argument.
    Invalid(String),
}

impl ReplCommand {
    /// Classify one line of input. Anything not starting with `/` is a message.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match (name.to_ascii_lowercase().as_str(), arg.is_empty()) {
            ("new", true) => Self::New,
            ("history", true) => Self::History,
            ("usage", true) => Self::Usage,
            ("help", true) => Self::Help,
            ("quit" | "exit", true) => Self::Quit,
            ("image", false) => Self::Image(PathBuf::from(arg)),
            ("upload", false) => Self::Upload(PathBuf::from(arg)),
            _ => Self::Invalid(line.to_string()),
        }
    }
}
