use shared::protocol::timestamp_now;
use shared::ChatMessage;
use std::collections::VecDeque;

/// Number of chat messages the server remembers.
pub const CHAT_HISTORY: usize = 20;

/// Bounded chat history; the oldest message is evicted first.
#[derive(Debug)]
pub struct ChatLog {
    history: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a message from `sender`. Blank text is dropped and yields `None`.
    pub fn record(&mut self, sender: &str, text: &str) -> Option<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let message = ChatMessage {
            sender: sender.to_string(),
            message: text.to_string(),
            time: timestamp_now(),
        };
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(message.clone());
        Some(message)
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatMessage> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(CHAT_HISTORY)
    }
}
