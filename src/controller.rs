//! The session controller: one explicit context object per conversation.
//!
//! Owns the history, settings, session store, tool registry and script
//! engine. Background workers only ever touch the shared reply state; the
//! controller appends the completed reply to history itself, so all history
//! mutation happens on one ownership path.

use crate::client::ChatClient;
use crate::commands::{self, Command};
use crate::config::{default_data_dir, default_settings_path, Settings};
use crate::error::ChatError;
use crate::history::ConversationHistory;
use crate::script::{ScriptAction, ScriptEngine, ScriptStore};
use crate::session::{generated_id, slug_id, FileRef, SessionRecord, SessionStore, AUTOSAVE_ID};
use crate::stream::SharedReply;
use crate::toolcall::{parse_tool_calls, ToolCall};
use crate::tools::{SaveSnippet, ToolRegistry};
use crate::ui::{HostSurface, UiQueue};
use crate::window;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

const UI_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cancellation handle for the in-flight request. The host keeps a clone so
/// `/stop` can reach a stream the controller is currently awaiting.
#[derive(Clone, Default)]
pub struct StopSwitch(Arc<Mutex<Option<SharedReply>>>);

impl StopSwitch {
    pub fn stop(&self) {
        if let Some(reply) = self.0.lock().unwrap().as_ref() {
            reply.request_stop();
        }
    }

    fn arm(&self, reply: SharedReply) {
        *self.0.lock().unwrap() = Some(reply);
    }

    fn disarm(&self) {
        *self.0.lock().unwrap() = None;
    }
}

pub struct ChatController {
    settings: Settings,
    settings_path: PathBuf,
    active_model: Option<String>,
    history: ConversationHistory,
    added_files: HashMap<String, FileRef>,
    session_id: Option<String>,
    store: SessionStore,
    scripts: ScriptStore,
    registry: ToolRegistry,
    engine: ScriptEngine,
    client: ChatClient,
    ui: UiQueue,
    host: Box<dyn HostSurface>,
    stop: StopSwitch,
}

impl ChatController {
    pub fn new(
        settings: Settings,
        settings_path: PathBuf,
        store: SessionStore,
        scripts: ScriptStore,
        registry: ToolRegistry,
        ui: UiQueue,
        host: Box<dyn HostSurface>,
    ) -> Result<Self, ChatError> {
        let client = ChatClient::new()?;
        let active_model = settings.last_active_model.clone();
        let history = ConversationHistory::new(&settings.system_message);
        let mut controller = Self {
            settings,
            settings_path,
            active_model,
            history,
            added_files: HashMap::new(),
            session_id: None,
            store,
            scripts,
            registry,
            engine: ScriptEngine::new(),
            client,
            ui,
            host,
            stop: StopSwitch::default(),
        };
        if controller.settings.auto_resume {
            controller.resume_autosave()?;
        }
        Ok(controller)
    }

    /// Constructs a controller over the default settings/data locations and
    /// registers the built-in tools.
    pub fn with_defaults(ui: UiQueue, host: Box<dyn HostSurface>) -> Result<Self, ChatError> {
        let settings_path = default_settings_path()?;
        let settings = Settings::load_or_init(&settings_path)?;
        let store = SessionStore::open_default()?;
        let scripts = ScriptStore::open_default()?;
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SaveSnippet::new(default_data_dir()?.join("snippets"))));
        Self::new(settings, settings_path, store, scripts, registry, ui, host)
    }

    pub fn stop_switch(&self) -> StopSwitch {
        self.stop.clone()
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn active_model(&self) -> Option<&str> {
        self.active_model.as_deref()
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Handles one line from the input prompt. Every failure degrades to a
    /// message on the output surface; nothing propagates to the host.
    pub async fn handle_input(&mut self, line: &str) {
        if let Err(e) = self.dispatch(line).await {
            warn!(error = %e, "command failed");
            self.ui.append_output(format!("\n[Error]: {}\n", e));
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<(), ChatError> {
        let command = match commands::parse(line) {
            Some(command) => command,
            None => return Ok(()),
        };
        match command {
            Command::Stop => self.stop.stop(),
            Command::Clear => {
                self.history.reset(&self.settings.system_message);
                self.added_files.clear();
                self.session_id = None;
                self.ui.append_output("\n[History cleared]\n");
                self.show_current_model();
            }
            Command::History => self.ui.append_output(self.history.transcript()),
            Command::ListModels => self.ui.append_output(self.settings.model_listing()),
            Command::SetModel(name) => self.set_active_model(&name)?,
            Command::AttachFile => self.attach_active_file(),
            Command::Save(name) => self.save_session(name)?,
            Command::Load(id) => self.load_session(&id)?,
            Command::Sessions => self.list_sessions()?,
            Command::Delete(id) => self.delete_session(&id)?,
            Command::Resume => self.toggle_auto_resume()?,
            Command::RunScript(None) => self.list_scripts()?,
            Command::RunScript(Some(name)) => self.start_script(&name).await?,
            Command::Continue => {
                if self.engine.resume() {
                    self.drive_script().await?;
                } else {
                    self.ui.append_output("\n[No script paused]\n");
                }
            }
            Command::Say(text) => {
                if self.engine.is_awaiting_input() {
                    self.engine.on_input(&text);
                    self.drive_script().await?;
                } else {
                    self.send_user_message(text).await?;
                }
            }
            Command::Unknown(msg) => self.ui.append_output(format!("\n[Error]: {}\n", msg)),
        }
        Ok(())
    }

    // --- Model selection ---

    fn set_active_model(&mut self, name: &str) -> Result<(), ChatError> {
        if self.settings.models.contains_key(name) {
            self.active_model = Some(name.to_string());
            self.settings.last_active_model = Some(name.to_string());
            self.settings.save(&self.settings_path)?;
            self.ui.append_output(format!("\n[Model set to: {}]\n", name));
        } else {
            self.ui.append_output(format!(
                "\n[Error]: Model '{}' not found in settings.\n",
                name
            ));
        }
        Ok(())
    }

    fn show_current_model(&self) {
        match &self.active_model {
            Some(model) => self
                .ui
                .append_output(format!("\n[Current Model: {}]\n", model)),
            None => self
                .ui
                .append_output("\n[Using default model. /list to show models]\n"),
        }
    }

    // --- Sending ---

    async fn send_user_message(&mut self, text: String) -> Result<(), ChatError> {
        self.history.push_user(text.clone());
        self.ui.append_output(format!("\n--------\nQ:  {}\n\n", text));
        self.send_message().await
    }

    async fn send_message(&mut self) -> Result<(), ChatError> {
        let model_name = self.settings.resolve_model_name(self.active_model.as_deref())?;
        let config = self.settings.model(&model_name)?.clone();
        let context = window::select_context_messages(self.history.messages(), None);
        info!(model = %model_name, messages = context.len(), stream = config.stream, "sending request");

        let reply_text = if config.stream {
            let reply = SharedReply::new();
            self.stop.arm(reply.clone());
            let poller = spawn_ui_poller(reply.clone(), self.ui.clone());
            let result = self.client.send_streaming(&config, &context, reply).await;
            self.stop.disarm();
            let _ = poller.await;
            let text = result?;
            self.ui.append_output("\n");
            text
        } else {
            let text = self.client.send(&config, &context).await?;
            self.ui.append_output(format!("{}\n\n", text));
            text
        };

        self.history.push_assistant(reply_text.clone());
        self.post_reply(&reply_text).await
    }

    /// Runs after every completed assistant reply: execute embedded tool
    /// calls, autosave, and hand the reply to a waiting script.
    async fn post_reply(&mut self, reply_text: &str) -> Result<(), ChatError> {
        for call in parse_tool_calls(reply_text) {
            self.ui.set_status(format!("Running tool: {}", call.command));
            let outcome = self.registry.execute(&call).await;
            self.ui
                .append_output(format!("\n[Tool: {}]\n{}\n", outcome.command, outcome.output));
            self.history.push_system(outcome.as_history_entry());
        }
        self.autosave()?;
        if self.engine.is_awaiting_reply() {
            if let Some(pause_note) = self.engine.on_reply(reply_text) {
                self.ui.append_output(pause_note);
            }
        }
        Ok(())
    }

    // --- Sessions ---

    fn build_record(&self, id: String) -> SessionRecord {
        let mut record = SessionRecord::new(
            id,
            self.active_model.clone(),
            self.history.messages().to_vec(),
        );
        record.added_files = self.added_files.clone();
        record
    }

    fn save_session(&mut self, name: Option<String>) -> Result<(), ChatError> {
        let id = match name {
            Some(name) => slug_id(&name),
            None => self.session_id.clone().unwrap_or_else(generated_id),
        };
        let mut record = self.build_record(id.clone());
        if let Some(existing) = self.store.load(&id)? {
            record.created_at = existing.created_at;
        }
        self.store.save(&mut record)?;
        self.session_id = Some(id.clone());
        self.ui.append_output(format!("\n[Session saved: {}]\n", id));
        Ok(())
    }

    fn load_session(&mut self, id: &str) -> Result<(), ChatError> {
        match self.store.load(id)? {
            Some(record) => {
                self.history = ConversationHistory::from_messages(
                    record.history,
                    &self.settings.system_message,
                );
                if record.active_model.is_some() {
                    self.active_model = record.active_model;
                }
                self.added_files = record.added_files;
                self.session_id = Some(record.id.clone());
                self.ui.append_output(format!(
                    "\n[Session loaded: {} ({} messages)]\n",
                    record.id,
                    self.history.len()
                ));
            }
            None => self
                .ui
                .append_output(format!("\n[Session '{}' not found]\n", id)),
        }
        Ok(())
    }

    fn list_sessions(&self) -> Result<(), ChatError> {
        let summaries = self.store.list()?;
        if summaries.is_empty() {
            self.ui.append_output("\n[No saved sessions]\n");
            return Ok(());
        }
        let mut out = String::from("\n==== [Saved Sessions]:\n");
        for summary in summaries {
            out.push_str(&format!(
                "- {}   ({} messages)\n",
                summary.id, summary.message_count
            ));
        }
        out.push('\n');
        self.ui.append_output(out);
        Ok(())
    }

    fn delete_session(&mut self, id: &str) -> Result<(), ChatError> {
        if self.store.delete(id)? {
            if self.session_id.as_deref() == Some(id) {
                self.session_id = None;
            }
            self.ui.append_output(format!("\n[Session deleted: {}]\n", id));
        } else {
            self.ui
                .append_output(format!("\n[Session '{}' not found]\n", id));
        }
        Ok(())
    }

    fn toggle_auto_resume(&mut self) -> Result<(), ChatError> {
        self.settings.auto_resume = !self.settings.auto_resume;
        self.settings.save(&self.settings_path)?;
        let state = if self.settings.auto_resume { "on" } else { "off" };
        self.ui
            .append_output(format!("\n[Auto-resume is now {}]\n", state));
        Ok(())
    }

    fn autosave(&mut self) -> Result<(), ChatError> {
        if !self.settings.auto_resume {
            return Ok(());
        }
        let mut record = self.build_record(AUTOSAVE_ID.to_string());
        if let Some(existing) = self.store.load(AUTOSAVE_ID)? {
            record.created_at = existing.created_at;
        }
        self.store.save(&mut record)
    }

    fn resume_autosave(&mut self) -> Result<(), ChatError> {
        if let Some(record) = self.store.load(AUTOSAVE_ID)? {
            info!(messages = record.history.len(), "resuming autosaved session");
            self.history = ConversationHistory::from_messages(
                record.history,
                &self.settings.system_message,
            );
            if record.active_model.is_some() {
                self.active_model = record.active_model;
            }
            self.added_files = record.added_files;
            self.session_id = Some(AUTOSAVE_ID.to_string());
        }
        Ok(())
    }

    // --- File attachment ---

    fn attach_active_file(&mut self) {
        match self.host.read_active_buffer() {
            Some((name, content)) => {
                self.history
                    .push_system(format!("Here is the content of {}:\n{}", name, content));
                self.added_files
                    .insert(name.clone(), FileRef { content });
                self.ui.append_output(format!("\n[Attached file: {}]", name));
            }
            None => self.ui.append_output("\n[No active file to attach]\n"),
        }
    }

    // --- Scripts ---

    fn list_scripts(&self) -> Result<(), ChatError> {
        let scripts = self.scripts.list()?;
        if scripts.is_empty() {
            self.ui.set_status("No scripts found");
            return Ok(());
        }
        let mut out = String::from("\n==== [Available Scripts]:\n");
        let mut names = Vec::new();
        for info in &scripts {
            out.push_str(&format!(
                "- {}:   {} | {} steps\n",
                info.name,
                if info.description.is_empty() {
                    "No description"
                } else {
                    &info.description
                },
                info.steps
            ));
            names.push(info.name.clone());
        }
        out.push('\n');
        self.ui.append_output(out);
        self.ui.pick_from_list("Run script", names);
        Ok(())
    }

    async fn start_script(&mut self, name: &str) -> Result<(), ChatError> {
        let script = self.scripts.load(name)?;
        self.ui
            .append_output(format!("\n[Starting script: {}]\n", script.name));
        if !script.description.is_empty() {
            self.ui.append_output(format!("[{}]\n", script.description));
        }
        self.engine.load(script);
        self.drive_script().await
    }

    /// Executes script steps until the script finishes or blocks on a reply,
    /// an input, or a manual `/continue`.
    async fn drive_script(&mut self) -> Result<(), ChatError> {
        loop {
            if !self.engine.is_running()
                || self.engine.is_paused()
                || self.engine.is_awaiting_input()
                || self.engine.is_awaiting_reply()
            {
                return Ok(());
            }
            let (step, total) = self.engine.progress().unwrap_or((0, 0));
            let action = match self.engine.next_action() {
                Ok(action) => action,
                Err(e) => {
                    self.ui.append_output(format!("\n[Condition error: {}]\n", e));
                    return Ok(());
                }
            };
            match action {
                ScriptAction::Finished => {
                    self.ui.append_output("\n[Script completed]\n");
                    return Ok(());
                }
                ScriptAction::Note(note) => {
                    if !note.is_empty() {
                        self.ui.append_output(format!("\n{}\n", note));
                    }
                }
                ScriptAction::PushSystem(text) => {
                    self.history.push_system(text.clone());
                    self.ui.append_output(format!("[System]: {}\n", text));
                }
                ScriptAction::SendPrompt { text } => {
                    self.ui.append_output(format!("\n[Step {}/{}]\n", step, total));
                    self.history.push_user(text.clone());
                    self.ui.append_output(format!("\n# Q: {}\n\n", text));
                    self.send_message().await?;
                }
                ScriptAction::CallFunction { name, args } => {
                    self.ui.append_output(format!("\n[Step {}/{}]\n", step, total));
                    let call = ToolCall { command: name, args };
                    let outcome = self.registry.execute(&call).await;
                    self.ui.append_output(format!("{}\n", outcome.output));
                    self.engine.on_function_result(&outcome.output);
                }
                ScriptAction::RequestInput { prompt } => {
                    self.ui
                        .append_output(format!("\n[Input required: {}]\n", prompt));
                    self.ui.prompt_input(prompt);
                    return Ok(());
                }
            }
        }
    }
}

/// Flushes newly arrived reply text to the output surface every 100ms until
/// the stream finalizes, then drains the remainder.
fn spawn_ui_poller(reply: SharedReply, ui: UiQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(UI_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            let new_text = reply.take_new_text();
            if !new_text.is_empty() {
                ui.append_output(new_text);
            }
            if reply.is_finalized() {
                let rest = reply.take_new_text();
                if !rest.is_empty() {
                    ui.append_output(rest);
                }
                break;
            }
        }
    })
}
