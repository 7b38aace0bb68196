// Conversational memory for one session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;

use crate::providers::ChatRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded message window, oldest messages dropped first
#[derive(Debug, Clone)]
pub struct MemoryContext {
    max_messages: usize,
    messages: VecDeque<MemoryMessage>,
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MemoryContext {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            messages: VecDeque::new(),
        }
    }

    pub fn add_message(&mut self, role: ChatRole, content: impl Into<String>, metadata: Option<Map<String, Value>>) {
        self.messages.push_back(MemoryMessage {
            role,
            content: content.into(),
            metadata: metadata.unwrap_or_default(),
            timestamp: Utc::now(),
        });
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// The newest `n` messages, oldest first
    pub fn recent_messages(&self, n: usize) -> Vec<&MemoryMessage> {
        let start = self.messages.len().saturating_sub(n);
        self.messages.range(start..).collect()
    }

    /// `[{role, content}]` for the newest `limit` messages (all kept
    /// messages when `None`)
    pub fn context_for_llm(&self, limit: Option<usize>) -> Vec<Value> {
        self.recent_messages(limit.unwrap_or(self.max_messages))
            .into_iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
