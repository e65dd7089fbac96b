//! Slash-command parsing for the interactive input line.

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Cancel the in-flight stream.
    Stop,
    /// Reset history and clear the output surface.
    Clear,
    /// Display the conversation transcript.
    History,
    /// Display available models.
    ListModels,
    /// `/model:<name>` selects the active model.
    SetModel(String),
    /// Attach the host's active buffer as context.
    AttachFile,
    /// `/save` or `/save:<name>` persists the session.
    Save(Option<String>),
    /// `/load:<id>` restores a saved session.
    Load(String),
    /// List saved sessions.
    Sessions,
    /// `/delete:<id>` removes a saved session.
    Delete(String),
    /// Toggle auto-resume of the autosaved session.
    Resume,
    /// `/script` lists scripts, `/script:<name>` runs one.
    RunScript(Option<String>),
    /// Resume a paused script.
    Continue,
    /// Plain text: send as a user message.
    Say(String),
    /// Unrecognized slash command.
    Unknown(String),
}

/// Parses one input line. Returns None for blank input.
pub fn parse(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.starts_with('/') {
        return Some(Command::Say(trimmed.to_string()));
    }

    // Command word matches case-insensitively; the argument after ':' keeps
    // its original case (model and session names may be case sensitive).
    let (word, arg) = match trimmed.split_once(':') {
        Some((w, a)) => (w.trim().to_lowercase(), Some(a.trim())),
        None => (trimmed.to_lowercase(), None),
    };
    let arg_owned = arg.map(str::to_string).filter(|a| !a.is_empty());

    let command = match word.as_str() {
        "/stop" => Command::Stop,
        "/clear" => Command::Clear,
        "/history" => Command::History,
        "/list" => Command::ListModels,
        "/model" => match arg_owned {
            Some(name) => Command::SetModel(name),
            None => Command::Unknown(
                "Invalid /model command format. Use /model:model_name".to_string(),
            ),
        },
        "/file" => Command::AttachFile,
        "/save" => Command::Save(arg_owned),
        "/load" => match arg_owned {
            Some(id) => Command::Load(id),
            None => Command::Unknown("Use /load:session_id".to_string()),
        },
        "/sessions" => Command::Sessions,
        "/delete" => match arg_owned {
            Some(id) => Command::Delete(id),
            None => Command::Unknown("Use /delete:session_id".to_string()),
        },
        "/resume" => Command::Resume,
        "/script" => Command::RunScript(arg_owned),
        "/continue" => Command::Continue,
        _ => Command::Unknown(format!("Unknown command: {}", trimmed)),
    };
    Some(command)
}
