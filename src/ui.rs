//! UI marshaling: background workers enqueue tasks; the single UI-owning
//! side drains them. Workers never touch host state directly.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum UiTask {
    /// Append text to the output surface.
    AppendOutput(String),
    /// Show the modal input prompt.
    PromptInput { prompt: String },
    /// Show the list picker.
    PickFromList { title: String, items: Vec<String> },
    /// Update the transient status line.
    SetStatus(String),
}

/// Sending half of the UI task queue. Cheap to clone into workers.
#[derive(Debug, Clone)]
pub struct UiQueue {
    tx: UnboundedSender<UiTask>,
}

impl UiQueue {
    pub fn new() -> (Self, UnboundedReceiver<UiTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, task: UiTask) {
        // A closed receiver means the host went away; nothing left to update.
        let _ = self.tx.send(task);
    }

    pub fn append_output(&self, text: impl Into<String>) {
        self.push(UiTask::AppendOutput(text.into()));
    }

    pub fn prompt_input(&self, prompt: impl Into<String>) {
        self.push(UiTask::PromptInput {
            prompt: prompt.into(),
        });
    }

    pub fn pick_from_list(&self, title: impl Into<String>, items: Vec<String>) {
        self.push(UiTask::PickFromList {
            title: title.into(),
            items,
        });
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.push(UiTask::SetStatus(status.into()));
    }
}

/// The slice of the host editor the engine reads from.
pub trait HostSurface: Send {
    /// Name and content of the currently active buffer, if any. Backs the
    /// `/file` attachment command.
    fn read_active_buffer(&self) -> Option<(String, String)>;
}

/// Host with no readable buffers; useful for headless embedding and tests.
pub struct NullHost;

impl HostSurface for NullHost {
    fn read_active_buffer(&self) -> Option<(String, String)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_drain_in_order() {
        let (queue, mut rx) = UiQueue::new();
        queue.append_output("a");
        queue.set_status("busy");
        queue.append_output("b");
        assert_eq!(rx.recv().await, Some(UiTask::AppendOutput("a".into())));
        assert_eq!(rx.recv().await, Some(UiTask::SetStatus("busy".into())));
        assert_eq!(rx.recv().await, Some(UiTask::AppendOutput("b".into())));
    }

    #[test]
    fn push_after_receiver_dropped_is_silent() {
        let (queue, rx) = UiQueue::new();
        drop(rx);
        queue.append_output("ignored");
    }
}
