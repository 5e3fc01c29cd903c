use std::{fmt, str::FromStr};

use crate::{
    error::ServiceError,
    model::{ChatMessage, Role},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    Gemma,
    /// `Role: content` lines for base models without chat markup.
    Transcript,
}

impl ChatTemplate {
    pub fn render(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        if messages.is_empty() {
            return Err(ServiceError::BadRequest("messages must not be empty".into()));
        }
        match self {
            ChatTemplate::Gemma => Ok(render_gemma(messages)),
            ChatTemplate::Transcript => Ok(render_transcript(messages)),
        }
    }

    /// Whether the rendered text already carries the BOS marker, in which case
    /// the tokenizer must not add its own.
    pub fn includes_bos(&self) -> bool {
        matches!(self, ChatTemplate::Gemma)
    }
}

// Gemma has no system role; a leading system message joins the first user turn.
fn render_gemma(messages: &[ChatMessage]) -> String {
    let (system, turns) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first.content.trim()), rest),
        _ => (None, messages),
    };

    let mut out = String::from("<bos>");
    for (idx, message) in turns.iter().enumerate() {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };
        out.push_str("<start_of_turn>");
        out.push_str(role);
        out.push('\n');
        if idx == 0 {
            if let Some(system) = system {
                out.push_str(system);
                out.push_str("\n\n");
            }
        }
        out.push_str(message.content.trim());
        out.push_str("<end_of_turn>\n");
    }
    out.push_str("<start_of_turn>model\n");
    out
}

fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let speaker = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(message.content.trim());
        out.push('\n');
    }
    out.push_str("Assistant:");
    out
}

impl FromStr for ChatTemplate {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "gemma" => Ok(ChatTemplate::Gemma),
            "transcript" | "plain" => Ok(ChatTemplate::Transcript),
            other => Err(format!("unknown chat template '{other}'")),
        }
    }
}

impl fmt::Display for ChatTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTemplate::Gemma => f.write_str("gemma"),
            ChatTemplate::Transcript => f.write_str("transcript"),
        }
    }
}
