//! Decision prompt assembled from the path to head.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::tree::ConversationNode;

const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");

/// One message of the conversation as the decider sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
    pub label: Option<String>,
}

/// Everything a decider needs for one decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
    /// Memory entries relevant to the latest user message.
    pub recalled: Vec<String>,
}

impl Prompt {
    pub fn from_path(path: &[&ConversationNode], recalled: Vec<String>) -> Self {
        let messages = path
            .iter()
            .map(|node| PromptMessage {
                role: node.role.as_str(),
                content: node.content.clone(),
                label: node.label.clone(),
            })
            .collect();
        Self { messages, recalled }
    }

    /// Text of the most recent user message, used as the memory query.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == "user")
            .map(|message| message.content.as_str())
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("decision", DECISION_TEMPLATE)
            .expect("decision template should be valid");
        Self { env }
    }

    pub fn render(&self, prompt: &Prompt, workspace: &str) -> Result<String> {
        let template = self.env.get_template("decision")?;
        let rendered = template.render(context! {
            workspace => workspace,
            recalled => &prompt.recalled,
            messages => &prompt.messages,
        })?;
        Ok(rendered)
    }
}
