//! Tool capability registry.
//!
//! Capabilities are registered explicitly by the host; nothing is discovered
//! or loaded from disk. Execution failures never abort the conversation: the
//! outcome is rendered into the output stream either way.

use crate::error::ChatError;
use crate::toolcall::ToolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait ToolFunction: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn invoke(&self, args: &HashMap<String, String>) -> Result<String, ChatError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub command: String,
    pub output: String,
    pub ok: bool,
}

impl ToolOutcome {
    /// Rendering appended to history so the model sees the result.
    pub fn as_history_entry(&self) -> String {
        format!("Tool result for '{}':\n{}", self.command, self.output)
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolFunction>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolFunction>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolFunction>> {
        self.tools.get(name)
    }

    pub fn list(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect();
        entries.sort();
        entries
    }

    /// Runs one parsed call. Unknown commands and invoke errors come back as
    /// a failed outcome, not an error.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        match self.tools.get(&call.command) {
            None => {
                warn!(command = %call.command, "unknown tool command");
                ToolOutcome {
                    command: call.command.clone(),
                    output: format!("[Tool '{}' failed: unknown command]", call.command),
                    ok: false,
                }
            }
            Some(tool) => {
                info!(command = %call.command, "executing tool");
                match tool.invoke(&call.args).await {
                    Ok(output) => ToolOutcome {
                        command: call.command.clone(),
                        output,
                        ok: true,
                    },
                    Err(e) => ToolOutcome {
                        command: call.command.clone(),
                        output: format!("[Tool '{}' failed: {}]", call.command, e),
                        ok: false,
                    },
                }
            }
        }
    }
}

/// Built-in capability: writes a named text snippet into the data directory.
pub struct SaveSnippet {
    dir: PathBuf,
}

impl SaveSnippet {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl ToolFunction for SaveSnippet {
    fn name(&self) -> &str {
        "save_snippet"
    }

    fn description(&self) -> &str {
        "Save a text snippet to a named file in the chat data directory"
    }

    async fn invoke(&self, args: &HashMap<String, String>) -> Result<String, ChatError> {
        let name = args
            .get("name")
            .ok_or_else(|| ChatError::Tool("missing 'name' argument".into()))?;
        let content = args
            .get("content")
            .ok_or_else(|| ChatError::Tool("missing 'content' argument".into()))?;
        let file_name = crate::session::slug_id(name);
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, content).await?;
        Ok(format!("Saved snippet to {}", path.display()))
    }
}
