//! Multi-step scripted conversations.
//!
//! A script is a JSON document of steps: prompts sent to the model, tool
//! function calls, user-input pauses, and conditional branches. Conditions
//! use a small whitelisted grammar (comparisons and boolean connectives over
//! named variables) rather than a general expression evaluator.

use crate::error::ChatError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const SCRIPT_EXTENSION: &str = ".script.json";

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Script {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Send text to the model (or append it as a system message).
    Prompt {
        text: String,
        #[serde(default)]
        system: bool,
        #[serde(default)]
        store_as: Option<String>,
        #[serde(default = "default_true")]
        auto_continue: bool,
    },
    /// Invoke a registered tool function.
    Function {
        function: String,
        #[serde(default)]
        args: HashMap<String, String>,
        #[serde(default)]
        store_as: Option<String>,
    },
    /// Pause for a value from the user.
    Input {
        prompt: String,
        #[serde(default)]
        store_as: Option<String>,
    },
    /// Evaluate a condition and splice in one of two branches.
    Condition {
        test: String,
        #[serde(default)]
        if_true: Vec<Step>,
        #[serde(default)]
        if_false: Vec<Step>,
    },
}

/// What the controller should do next on behalf of the script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAction {
    SendPrompt { text: String },
    PushSystem(String),
    CallFunction {
        name: String,
        args: HashMap<String, String>,
    },
    RequestInput { prompt: String },
    Note(String),
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
enum Awaiting {
    Idle,
    Reply { store_as: Option<String> },
    FunctionResult { store_as: Option<String> },
    Input { store_as: Option<String> },
    Continue,
}

/// Step machine for one running script. The controller calls [`next_action`],
/// performs the action, and feeds results back through the `on_*` methods.
pub struct ScriptEngine {
    script: Option<Script>,
    cursor: usize,
    vars: HashMap<String, String>,
    awaiting: Awaiting,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self {
            script: None,
            cursor: 0,
            vars: HashMap::new(),
            awaiting: Awaiting::Idle,
        }
    }

    pub fn load(&mut self, script: Script) {
        self.vars = script.variables.clone();
        self.cursor = 0;
        self.awaiting = Awaiting::Idle;
        self.script = Some(script);
    }

    pub fn is_running(&self) -> bool {
        self.script.is_some()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        matches!(self.awaiting, Awaiting::Reply { .. })
    }

    pub fn is_awaiting_input(&self) -> bool {
        matches!(self.awaiting, Awaiting::Input { .. })
    }

    pub fn is_paused(&self) -> bool {
        self.awaiting == Awaiting::Continue
    }

    /// 1-based step position and total, for progress banners.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.script
            .as_ref()
            .map(|s| (self.cursor + 1, s.steps.len()))
    }

    pub fn abort(&mut self) {
        self.script = None;
        self.awaiting = Awaiting::Idle;
    }

    /// Advances to the next action. Only meaningful while idle; a script
    /// error aborts the run.
    pub fn next_action(&mut self) -> Result<ScriptAction, ChatError> {
        if self.awaiting != Awaiting::Idle {
            return Ok(ScriptAction::Note(String::new()));
        }
        let steps_len = match self.script.as_ref() {
            Some(s) => s.steps.len(),
            None => return Ok(ScriptAction::Finished),
        };
        if self.cursor >= steps_len {
            self.script = None;
            return Ok(ScriptAction::Finished);
        }

        let step = self.script.as_ref().expect("script checked above").steps[self.cursor].clone();
        match step {
            Step::Prompt {
                text,
                system: true,
                ..
            } => {
                let text = substitute_vars(&text, &self.vars);
                self.cursor += 1;
                Ok(ScriptAction::PushSystem(text))
            }
            Step::Prompt {
                text,
                system: false,
                store_as,
                ..
            } => {
                let text = substitute_vars(&text, &self.vars);
                self.awaiting = Awaiting::Reply { store_as };
                Ok(ScriptAction::SendPrompt { text })
            }
            Step::Function {
                function,
                args,
                store_as,
            } => {
                let args = args
                    .into_iter()
                    .map(|(k, v)| (k, substitute_vars(&v, &self.vars)))
                    .collect();
                self.awaiting = Awaiting::FunctionResult { store_as };
                Ok(ScriptAction::CallFunction {
                    name: function,
                    args,
                })
            }
            Step::Input { prompt, store_as } => {
                let prompt = substitute_vars(&prompt, &self.vars);
                self.awaiting = Awaiting::Input { store_as };
                Ok(ScriptAction::RequestInput { prompt })
            }
            Step::Condition {
                test,
                if_true,
                if_false,
            } => {
                let test = substitute_vars(&test, &self.vars);
                let outcome = match eval_condition(&test, &self.vars) {
                    Ok(v) => v,
                    Err(e) => {
                        self.abort();
                        return Err(e);
                    }
                };
                let branch = if outcome { if_true } else { if_false };
                // Splice the chosen branch right after the condition step and
                // step onto its first element.
                let script = self.script.as_mut().expect("script checked above");
                let insert_at = self.cursor + 1;
                script.steps.splice(insert_at..insert_at, branch);
                self.cursor += 1;
                Ok(ScriptAction::Note(format!(
                    "[Condition '{}' is {}]",
                    test, outcome
                )))
            }
        }
    }

    /// Feeds back a completed model reply. Returns a pause note when the
    /// following step declines auto-continue.
    pub fn on_reply(&mut self, reply: &str) -> Option<String> {
        if let Awaiting::Reply { store_as } = std::mem::replace(&mut self.awaiting, Awaiting::Idle)
        {
            if let Some(var) = store_as {
                self.vars.insert(var, reply.to_string());
            }
            self.cursor += 1;
            let next_pauses = self
                .script
                .as_ref()
                .and_then(|s| s.steps.get(self.cursor))
                .map(|step| matches!(step, Step::Prompt { auto_continue: false, .. }))
                .unwrap_or(false);
            if next_pauses {
                self.awaiting = Awaiting::Continue;
                return Some("\n[Script paused - type /continue to proceed]\n".to_string());
            }
        }
        None
    }

    pub fn on_function_result(&mut self, result: &str) {
        if let Awaiting::FunctionResult { store_as } =
            std::mem::replace(&mut self.awaiting, Awaiting::Idle)
        {
            if let Some(var) = store_as {
                self.vars.insert(var, result.to_string());
            }
            self.cursor += 1;
        }
    }

    pub fn on_input(&mut self, value: &str) {
        if let Awaiting::Input { store_as } =
            std::mem::replace(&mut self.awaiting, Awaiting::Idle)
        {
            if let Some(var) = store_as {
                self.vars.insert(var, value.to_string());
            }
            self.cursor += 1;
        }
    }

    /// `/continue` after a pause. Returns false if nothing was paused.
    pub fn resume(&mut self) -> bool {
        if self.awaiting == Awaiting::Continue {
            self.awaiting = Awaiting::Idle;
            true
        } else {
            false
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `{{var}}` with the variable's value; unknown variables are left
/// in place.
pub fn substitute_vars(text: &str, vars: &HashMap<String, String>) -> String {
    let pattern = Regex::new(r"\{\{(\w+)\}\}").expect("substitution pattern is valid");
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// --- Condition grammar ---
//
// expr  := and ( '||' and )*
// and   := unary ( '&&' unary )*
// unary := '!' unary | '(' expr ')' | comparison
// comparison := operand ( ('=='|'!='|'<'|'<='|'>'|'>=') operand )?
// operand    := identifier | quoted string | number
//
// A bare operand is truthy when non-empty and not "false"/"0". Comparisons
// are numeric when both sides parse as numbers, string-wise otherwise.

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>, ChatError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(ChatError::Script(format!(
                                "unterminated string in condition: {}",
                                input
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Eq);
                } else {
                    return Err(ChatError::Script("single '=' is not allowed, use '=='".into()));
                }
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::And);
                } else {
                    return Err(ChatError::Script("single '&' is not allowed, use '&&'".into()));
                }
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::Or);
                } else {
                    return Err(ChatError::Script("single '|' is not allowed, use '||'".into()));
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num = s
                    .parse::<f64>()
                    .map_err(|_| ChatError::Script(format!("invalid number '{}'", s)))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => {
                return Err(ChatError::Script(format!(
                    "unexpected character '{}' in condition",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

struct ConditionParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a HashMap<String, String>,
}

impl<'a> ConditionParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<bool, ChatError> {
        let mut value = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.and_expr()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<bool, ChatError> {
        let mut value = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, ChatError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                Ok(!self.unary()?)
            }
            Some(Token::LParen) => {
                self.advance();
                let value = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(ChatError::Script("expected ')' in condition".into())),
                }
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<bool, ChatError> {
        let lhs = self.operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Le) => Token::Le,
            Some(Token::Gt) => Token::Gt,
            Some(Token::Ge) => Token::Ge,
            _ => return Ok(truthy(&lhs)),
        };
        self.advance();
        let rhs = self.operand()?;
        Ok(compare(&op, &lhs, &rhs))
    }

    fn operand(&mut self) -> Result<String, ChatError> {
        match self.advance() {
            Some(Token::Ident(name)) => {
                Ok(self.vars.get(&name).cloned().unwrap_or_default())
            }
            Some(Token::Str(s)) => Ok(s),
            Some(Token::Num(n)) => Ok(format_number(n)),
            other => Err(ChatError::Script(format!(
                "expected a value in condition, found {:?}",
                other
            ))),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "false" && value != "0"
}

fn compare(op: &Token, lhs: &str, rhs: &str) -> bool {
    if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        return match op {
            Token::Eq => a == b,
            Token::Ne => a != b,
            Token::Lt => a < b,
            Token::Le => a <= b,
            Token::Gt => a > b,
            Token::Ge => a >= b,
            _ => false,
        };
    }
    match op {
        Token::Eq => lhs == rhs,
        Token::Ne => lhs != rhs,
        Token::Lt => lhs < rhs,
        Token::Le => lhs <= rhs,
        Token::Gt => lhs > rhs,
        Token::Ge => lhs >= rhs,
        _ => false,
    }
}

/// Evaluates a condition against the script variables. Anything outside the
/// grammar is a script error, never silently false.
pub fn eval_condition(test: &str, vars: &HashMap<String, String>) -> Result<bool, ChatError> {
    let tokens = lex(test)?;
    if tokens.is_empty() {
        return Err(ChatError::Script("empty condition".into()));
    }
    let mut parser = ConditionParser {
        tokens,
        pos: 0,
        vars,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ChatError::Script(format!(
            "trailing input in condition: {}",
            test
        )));
    }
    Ok(value)
}

// --- Script files ---

#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub path: PathBuf,
}

pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub fn new(dir: PathBuf) -> Result<Self, ChatError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn open_default() -> Result<Self, ChatError> {
        Self::new(crate::config::default_data_dir()?.join("scripts"))
    }

    /// Lists available scripts; unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<ScriptInfo>, ChatError> {
        let mut scripts = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            let is_script = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(SCRIPT_EXTENSION))
                .unwrap_or(false);
            if !is_script {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(ChatError::from)
                .and_then(|c| serde_json::from_str::<Script>(&c).map_err(ChatError::from))
            {
                Ok(script) => scripts.push(ScriptInfo {
                    name: script.name,
                    description: script.description,
                    steps: script.steps.len(),
                    path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable script"),
            }
        }
        scripts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scripts)
    }

    /// Loads a script by its declared name or file stem.
    pub fn load(&self, name: &str) -> Result<Script, ChatError> {
        for info in self.list()? {
            let stem_matches = info
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.trim_end_matches(SCRIPT_EXTENSION) == name)
                .unwrap_or(false);
            if info.name == name || stem_matches {
                let content = fs::read_to_string(&info.path)?;
                return Ok(serde_json::from_str(&content)?);
            }
        }
        Err(ChatError::Script(format!("script '{}' not found", name)))
    }
}
