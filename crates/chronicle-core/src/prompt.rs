//! Prompt assembly for the language model.
//!
//! Renders persona instructions, retrieved context, and conversation
//! history into an ordered message sequence. Deterministic: identical
//! inputs always produce identical messages.

use serde::{Deserialize, Serialize};

use crate::models::ContextChunk;

/// How many history turns are included by default.
pub const DEFAULT_HISTORY_TURNS: usize = 5;

/// Default persona constitution: character voice, accuracy constraints,
/// and the mandatory citation format. Overridable via configuration.
pub const DEFAULT_PERSONA_PROMPT: &str = "\
You are Abraham Lincoln, the 16th President of the United States, speaking in the \
modern era but keeping your historical perspective and wisdom.

PERSONALITY & STYLE:
- Speak with Lincoln's characteristic thoughtfulness, humility, and measured wisdom
- Use accessible modern English while keeping dignity and gravitas
- Include occasional folksy analogies or stories when appropriate
- Show empathy, moral clarity, and practical wisdom

HISTORICAL ACCURACY:
- Base all factual claims on the provided historical sources
- Cite sources for any specific facts, quotes, or historical references
- If uncertain about a fact, acknowledge the limitation honestly

CITATION REQUIREMENTS:
- Every factual claim must include a citation in the format: [Source: Title, Page/Location]
- Quote directly from sources when possible; if paraphrasing, still provide a citation
- Never make unsupported historical claims

CONVERSATION APPROACH:
- Listen carefully to the user's question or concern
- Provide thoughtful, substantive responses
- Connect historical lessons to contemporary issues when relevant";

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the sequence sent to the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One prior exchange in the conversation. Either side may be absent
/// (e.g. a turn whose response failed).
#[derive(Debug, Clone, Default)]
pub struct HistoryTurn {
    pub user: Option<String>,
    pub assistant: Option<String>,
}

impl HistoryTurn {
    pub fn exchange(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            assistant: Some(assistant.into()),
        }
    }
}

/// Build the full message sequence: persona system message, the last
/// `max_history` turns in original order, then one synthesized user
/// message carrying the numbered source listing, the literal question,
/// and the citation instruction.
pub fn build_messages(
    system_prompt: &str,
    user_message: &str,
    context: &[ContextChunk],
    history: &[HistoryTurn],
    max_history: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];

    let skip = history.len().saturating_sub(max_history);
    for turn in &history[skip..] {
        if let Some(user) = &turn.user {
            messages.push(ChatMessage::user(user));
        }
        if let Some(assistant) = &turn.assistant {
            messages.push(ChatMessage::assistant(assistant));
        }
    }

    let context_text = format_context(context);
    let prompt = format!(
        "Based on the following historical sources, please respond in character, \
         addressing the user's question or comment.\n\n\
         HISTORICAL SOURCES:\n{context_text}\n\n\
         USER MESSAGE: {user_message}\n\n\
         Please respond in character, using only the provided sources to inform your \
         response. Include specific citations in the format [Source: Title, Page/Location] \
         for any factual claims or quotes. Keep the speaking style true to character while \
         making the content accessible to modern readers."
    );
    messages.push(ChatMessage::user(prompt));

    messages
}

/// Numbered listing of retrieved context: source title, author, type,
/// reliability, and the chunk's full text.
fn format_context(context: &[ContextChunk]) -> String {
    let mut parts = Vec::with_capacity(context.len());
    for (i, cc) in context.iter().enumerate() {
        parts.push(format!(
            "\n[{}] Source: {}\nAuthor: {}\nType: {}\nReliability: {:.1}/1.0\nContent: {}\n---",
            i + 1,
            cc.source.title,
            cc.source.author.as_deref().unwrap_or("Unknown"),
            cc.source.source_type,
            cc.source.reliability,
            cc.chunk.text,
        ));
    }
    parts.join("\n")
}
