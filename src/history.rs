//! Conversation history: an ordered message log with stable ids and labels.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Ordered message sequence backing one conversation.
///
/// Invariants: the first entry is always a system message; ids are unique and
/// strictly increasing in append order; a label names at most one message
/// (re-using a label moves it, last write wins).
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    next_id: u64,
}

impl ConversationHistory {
    pub fn new(system_message: &str) -> Self {
        let mut history = Self {
            messages: Vec::new(),
            next_id: 0,
        };
        history.append(Role::System, system_message.to_string(), None);
        history
    }

    /// Rebuilds a history from persisted messages, restoring the system-first
    /// invariant and the id counter. Messages persisted without ids get fresh
    /// ones.
    pub fn from_messages(messages: Vec<Message>, fallback_system: &str) -> Self {
        let mut history = Self {
            messages: Vec::new(),
            next_id: 0,
        };
        if messages.first().map(|m| m.role) != Some(Role::System) {
            history.append(Role::System, fallback_system.to_string(), None);
        }
        for msg in messages {
            history.append(msg.role, msg.content, msg.label);
        }
        history
    }

    pub fn reset(&mut self, system_message: &str) {
        self.messages.clear();
        self.next_id = 0;
        self.append(Role::System, system_message.to_string(), None);
    }

    pub fn push_user(&mut self, content: String) -> u64 {
        self.append(Role::User, content, None)
    }

    pub fn push_assistant(&mut self, content: String) -> u64 {
        self.append(Role::Assistant, content, None)
    }

    pub fn push_system(&mut self, content: String) -> u64 {
        self.append(Role::System, content, None)
    }

    pub fn push_labeled(&mut self, role: Role, content: String, label: &str) -> u64 {
        self.append(role, content, Some(label.to_string()))
    }

    fn append(&mut self, role: Role, content: String, label: Option<String>) -> u64 {
        if let Some(label) = &label {
            // Last write wins: the label moves to the new message.
            for msg in &mut self.messages {
                if msg.label.as_deref() == Some(label.as_str()) {
                    msg.label = None;
                }
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(Message {
            role,
            content,
            id: Some(id),
            label,
        });
        id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn id_for_label(&self, label: &str) -> Option<u64> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.label.as_deref() == Some(label))
            .and_then(|m| m.id)
    }

    /// Drops every message appended after the one with the given id. Returns
    /// false (and leaves the history untouched) if the id is unknown. The
    /// initial system message can never be rewound away.
    pub fn rewind_to_id(&mut self, id: u64) -> bool {
        match self.messages.iter().position(|m| m.id == Some(id)) {
            Some(pos) => {
                self.messages.truncate(pos + 1);
                true
            }
            None => false,
        }
    }

    pub fn rewind_to_label(&mut self, label: &str) -> bool {
        match self.id_for_label(label) {
            Some(id) => self.rewind_to_id(id),
            None => false,
        }
    }

    /// Display form for the `/history` command.
    pub fn transcript(&self) -> String {
        let mut out = String::from("\n--------------------\n==== [Current Chat History]:\n");
        for msg in &self.messages {
            let prefix = match msg.role {
                Role::System => continue,
                Role::User => "You: ",
                Role::Assistant => "Assistant: ",
            };
            out.push_str(prefix);
            out.push_str(&msg.content);
            out.push_str("\n\n");
        }
        out.push_str("[End Of History]\n");
        out
    }
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
