//! Chat transcript state.
//!
//! [`Transcript`] is a reducer: every user or network event is an
//! [`Action`] passed to [`Transcript::apply`]. Messages are only ever
//! appended, except for the text of the pending bot message, which is
//! replaced with the cumulative answer on every streamed chunk.
//!
//! ```text
//! Input("hi") → Enter{shift: false}
//!   ⇒ [.., User "hi", Bot ""]   responding = true   → PendingRequest
//! Chunk("Hel") → Chunk("lo")
//!   ⇒ [.., User "hi", Bot "Hello"]
//! Finished
//!   ⇒ responding = false
//! ```

use tracing::{debug, error};
use uuid::Uuid;

use crate::models::{Message, Sender};

/// First bot message of every transcript.
pub const GREETING: &str = "Hi! I'm here to help you.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Replace the input buffer.
    Input(String),
    /// Enter key; with shift it inserts a newline instead of sending.
    Enter { shift: bool },
    /// Send button.
    Send,
    /// Decoded text for the pending bot message `id`.
    Chunk { id: String, text: String },
    /// The answer stream for `id` ended normally.
    Finished { id: String },
    /// The answer stream for `id` failed.
    Failed { id: String, error: String },
    ToggleTheme,
}

/// A question accepted for sending, and the placeholder its answer fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub question: String,
    pub bot_id: String,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    input: String,
    responding: bool,
    theme: Theme,
    /// Placeholder id and the answer received for it so far.
    pending: Option<(String, String)>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: vec![Message {
                id: new_id(),
                text: GREETING.to_string(),
                sender: Sender::Bot,
            }],
            input: String::new(),
            responding: false,
            theme: Theme::default(),
            pending: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_responding(&self) -> bool {
        self.responding
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether a send would be accepted right now.
    pub fn can_send(&self) -> bool {
        !self.responding && !self.input.trim().is_empty()
    }

    /// Apply one action. Returns the request to issue when a send is accepted.
    pub fn apply(&mut self, action: Action) -> Option<PendingRequest> {
        match action {
            Action::Input(text) => {
                self.input = text;
                None
            }
            Action::Enter { shift: true } => {
                self.input.push('\n');
                None
            }
            Action::Enter { shift: false } | Action::Send => self.send(),
            Action::Chunk { id, text } => {
                self.on_chunk(&id, &text);
                None
            }
            Action::Finished { id } => {
                self.finish(&id);
                None
            }
            Action::Failed { id, error } => {
                error!(message = %id, error = %error, "answer stream failed");
                self.finish(&id);
                None
            }
            Action::ToggleTheme => {
                self.theme = self.theme.toggled();
                None
            }
        }
    }

    fn send(&mut self) -> Option<PendingRequest> {
        if !self.can_send() {
            return None;
        }

        let question = self.input.trim().to_string();
        self.input.clear();
        self.responding = true;

        self.messages.push(Message {
            id: new_id(),
            text: question.clone(),
            sender: Sender::User,
        });

        let bot_id = new_id();
        self.messages.push(Message {
            id: bot_id.clone(),
            text: String::new(),
            sender: Sender::Bot,
        });
        self.pending = Some((bot_id.clone(), String::new()));

        Some(PendingRequest { question, bot_id })
    }

    fn on_chunk(&mut self, id: &str, text: &str) {
        let Some((pending_id, answer)) = self.pending.as_mut() else {
            debug!(message = %id, "chunk with no pending answer");
            return;
        };
        if pending_id.as_str() != id {
            debug!(message = %id, "chunk for a message that is not pending");
            return;
        }

        answer.push_str(text);
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.text = answer.clone();
        }
    }

    fn finish(&mut self, id: &str) {
        if matches!(&self.pending, Some((pending_id, _)) if pending_id == id) {
            self.pending = None;
            self.responding = false;
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Incremental UTF-8 decoder for network chunks.
///
/// A multi-byte character split across chunks is held back until the rest
/// arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, returning all text that is complete so far.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let keep = rest.len();
        let start = self.pending.len() - keep;
        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
