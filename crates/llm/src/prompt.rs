//! Prompt construction for the speaking-tutor persona
//!
//! All prompt text lives here so the engine and responder never format
//! model input themselves.

use serde::{Deserialize, Serialize};

use tutor_core::Speaker;

/// Message role in a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Tutor persona instructions, prepended to every request
pub fn system_prompt() -> Message {
    Message::new(
        Role::System,
        "You are a friendly spoken-language tutor having a voice conversation \
         with a learner. Reply in one to three short sentences that are easy to \
         say aloud. Gently correct mistakes by restating the learner's idea \
         correctly, then keep the conversation moving with a simple follow-up \
         question. Never use lists, markdown, or stage directions.",
    )
}

/// Short verbal acknowledgments used before speaking a buffered reply whose
/// prefix the learner only extended with low-importance trailing words.
const ACKNOWLEDGMENTS: &[&str] = &["Right,", "Okay,", "Mm-hmm,", "I see,"];

/// Spoken while a late decision finishes in the background
pub const FILLER_RESPONSE: &str = "Let me think about that for a moment.";

/// Spoken when generation fails even after the background retry
pub const TROUBLE_RESPONSE: &str =
    "I'm having a little trouble putting that together. Could you say it once more?";

/// Deterministic acknowledgment pick for a given utterance
pub fn acknowledgment_for(text: &str) -> &'static str {
    ACKNOWLEDGMENTS[text.len() % ACKNOWLEDGMENTS.len()]
}

/// Fold conversation history into role-tagged messages
fn history_messages(history: &[(Speaker, String)]) -> Vec<Message> {
    history
        .iter()
        .map(|(speaker, text)| {
            let role = match speaker {
                Speaker::User => Role::User,
                Speaker::Assistant => Role::Assistant,
            };
            Message::new(role, text.clone())
        })
        .collect()
}

/// Request for a normal reply to a finalized user utterance
pub fn reply_messages(history: &[(Speaker, String)], user_text: &str) -> Vec<Message> {
    let mut messages = vec![system_prompt()];
    messages.extend(history_messages(history));
    messages.push(Message::new(Role::User, user_text));
    messages
}

/// Request for a speculative draft against an in-progress transcript prefix.
///
/// The prefix may be incomplete, so the model is told to answer what was
/// said so far without commenting on the sentence being unfinished.
pub fn speculative_messages(history: &[(Speaker, String)], prefix: &str) -> Vec<Message> {
    let mut messages = vec![system_prompt()];
    messages.extend(history_messages(history));
    messages.push(Message::new(
        Role::System,
        "The learner is still speaking; the next message is what they have \
         said so far. Draft a reply to it as if it were complete. Do not \
         mention that the sentence may be unfinished.",
    ));
    messages.push(Message::new(Role::User, prefix));
    messages
}

/// Request for a merge: regenerate for the full utterance, using the
/// buffered draft as a head start rather than starting cold.
pub fn merge_messages(
    history: &[(Speaker, String)],
    candidate_text: &str,
    final_text: &str,
) -> Vec<Message> {
    let mut messages = vec![system_prompt()];
    messages.extend(history_messages(history));
    messages.push(Message::new(
        Role::System,
        format!(
            "You already drafted this reply to an earlier portion of the \
             learner's utterance: \"{candidate_text}\". The learner then said \
             more. Produce one reply to their complete utterance, reusing the \
             draft where it still applies."
        ),
    ));
    messages.push(Message::new(Role::User, final_text));
    messages
}
