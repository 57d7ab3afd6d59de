//! Transcript rendering for the terminal
//!
//! Plain text only. Each lane is printed as a labelled block so the two
//! conversations can be read one after the other.

use std::fmt::Write;

use duet_core::backend::ModelInfo;
use duet_core::{ChatMessage, ComparisonMode, MessageRole, Side};

/// Heading for one lane in the given mode
pub fn lane_label(mode: ComparisonMode, side: Side) -> &'static str {
    match (mode, side) {
        (ComparisonMode::SystemPrompt, Side::Left) => "original system prompt",
        (ComparisonMode::SystemPrompt, Side::Right) => "optimized system prompt",
        (ComparisonMode::UserPrompt, Side::Left) => "original user prompt",
        (ComparisonMode::UserPrompt, Side::Right) => "optimized user prompt",
    }
}

/// Render one lane's log
pub fn lane(mode: ComparisonMode, side: Side, messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ({}) ===", side.as_str(), lane_label(mode, side));

    for message in messages {
        let speaker = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "model",
            MessageRole::System => "system",
        };
        let _ = writeln!(out, "[{speaker}] {}", message.content.trim_end());
        for attachment in &message.attachments {
            let _ = writeln!(out, "        + {}", attachment.name);
        }
    }
    out
}

/// Render both lanes, left first
pub fn transcript(mode: ComparisonMode, left: &[ChatMessage], right: &[ChatMessage]) -> String {
    format!(
        "{}\n{}",
        lane(mode, Side::Left, left),
        lane(mode, Side::Right, right)
    )
}

/// One line per model
pub fn models(models: &[ModelInfo]) -> String {
    let mut out = String::new();
    for model in models {
        match &model.parameters {
            Some(parameters) => {
                let _ = writeln!(out, "{} ({parameters})", model.name);
            }
            None => {
                let _ = writeln!(out, "{}", model.name);
            }
        }
    }
    out
}
