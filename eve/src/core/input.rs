//! User input parsing: optional node labels ahead of the message.

use std::sync::LazyLock;

use regex::Regex;

static BRACKET_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*[\[{]\s*label\s*:\s*(.*?)\s*[\]}]\s*(.*)$")
        .expect("bracket label regex should be valid")
});

static PIPE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*label\s*:\s*(.*?)\s*\|\s*(.*)$")
        .expect("pipe label regex should be valid")
});

/// A user message with its optional label split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInput {
    pub label: Option<String>,
    pub message: String,
}

impl UserInput {
    /// Accepts `[label: X] msg`, `{label: X} msg` and `label: X | msg`.
    pub fn parse(text: &str) -> Self {
        for re in [&*BRACKET_LABEL_RE, &*PIPE_LABEL_RE] {
            if let Some(caps) = re.captures(text) {
                let label = caps
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|label| !label.is_empty());
                let message = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
                return Self { label, message };
            }
        }
        Self {
            label: None,
            message: text.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_and_brace_labels() {
        let input = UserInput::parse("[label: refactor] split the parser");
        assert_eq!(input.label.as_deref(), Some("refactor"));
        assert_eq!(input.message, "split the parser");

        let input = UserInput::parse("{LABEL: tests}run them");
        assert_eq!(input.label.as_deref(), Some("tests"));
        assert_eq!(input.message, "run them");
    }

    #[test]
    fn pipe_label() {
        let input = UserInput::parse("label: docs | update the readme");
        assert_eq!(input.label.as_deref(), Some("docs"));
        assert_eq!(input.message, "update the readme");
    }

    #[test]
    fn plain_message_has_no_label() {
        let input = UserInput::parse("  what does main.rs do?  ");
        assert_eq!(input.label, None);
        assert_eq!(input.message, "what does main.rs do?");
    }

    #[test]
    fn empty_label_is_dropped() {
        let input = UserInput::parse("[label: ] hi");
        assert_eq!(input.label, None);
        assert_eq!(input.message, "hi");
    }
}
