use crate::history::{Message, Role};

const MAX_MESSAGES: usize = 40;

/// Selects the slice of history that goes on the wire: every system message
/// (they carry instructions and attached files), plus the most recent
/// non-system messages up to the window size, in chronological order.
pub fn select_context_messages(messages: &[Message], max_messages: Option<usize>) -> Vec<Message> {
    let window_size = max_messages.unwrap_or(MAX_MESSAGES);

    let mut result: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .cloned()
        .collect();

    let recent: Vec<Message> = messages
        .iter()
        .rev()
        .filter(|m| m.role != Role::System)
        .take(window_size)
        .cloned()
        .collect();

    result.extend(recent.into_iter().rev());
    result
}
