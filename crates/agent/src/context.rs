//! Context builder for assembling model prompts

use chrono::{DateTime, Local};

use tune_provider::{Message, Tool};

/// Builds the system prompt and the message list sent to the model.
/// The prompt is rebuilt for every invocation and never checkpointed.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    assistant_name: String,
    extra_instructions: Option<String>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new("tune")
    }
}

impl ContextBuilder {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            extra_instructions: None,
        }
    }

    /// Append operator instructions after the identity section
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.extra_instructions = Some(instructions.into());
        self
    }

    pub fn build_system_prompt(&self, tools: &[Tool], now: DateTime<Local>) -> String {
        let mut parts = vec![self.identity(now)];

        if !tools.is_empty() {
            let lines: Vec<String> = tools
                .iter()
                .map(|t| format!("- {}: {}", t.function.name, t.function.description))
                .collect();
            parts.push(format!("## Tools\n{}", lines.join("\n")));
        }

        if let Some(extra) = &self.extra_instructions {
            parts.push(extra.clone());
        }

        parts.join("\n\n")
    }

    fn identity(&self, now: DateTime<Local>) -> String {
        format!(
            r#"# {name}

You are {name}, a playlist assistant with access to the user's Spotify account.
Turn the user's description into concrete actions: search for fitting tracks,
create the playlist, then add the tracks you chose.

## Current Time
{time}

When a tool returns an error, read its detail and correct your call instead of
repeating it unchanged. When you are done, answer with a short summary of what
you did and never invent track or playlist ids."#,
            name = self.assistant_name,
            time = now.format("%Y-%m-%d %H:%M (%A)"),
        )
    }

    /// System prompt followed by the thread history
    pub fn build_messages(&self, history: &[Message], tools: &[Tool]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(
            self.build_system_prompt(tools, Local::now()),
        ));
        messages.extend_from_slice(history);
        messages
    }
}
