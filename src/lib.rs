//! deepchat: an embeddable chat engine for LLM APIs.
//!
//! The host (an editor plugin shim, a desktop shell, a test harness) supplies
//! a thin surface: an output view to append to, an input prompt, a list
//! picker. It drains the [`ui::UiQueue`]. The engine owns everything else:
//! conversation history, request dispatch with retries, incremental streaming
//! assembly with stall detection, session persistence, embedded tool calls,
//! slash commands and scripted multi-step conversations.

pub mod client;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod logging;
pub mod script;
pub mod session;
pub mod stream;
pub mod toolcall;
pub mod tools;
pub mod ui;
pub mod window;

pub use client::ChatClient;
pub use config::{ModelConfig, Settings};
pub use controller::{ChatController, StopSwitch};
pub use error::ChatError;
pub use history::{ConversationHistory, Message, Role};
pub use session::{SessionRecord, SessionStore};
pub use stream::{SharedReply, StreamAssembler};
pub use toolcall::{parse_tool_calls, ToolCall};
pub use tools::{ToolFunction, ToolRegistry};
pub use ui::{HostSurface, UiQueue, UiTask};
