//! Parser for tool-call directives embedded in completed assistant replies.
//!
//! Syntax:
//!
//! ```text
//! [tool_call]
//! @command: save_snippet
//! name: notes.txt
//! content: <<<
//! first line
//! second line
//! >>>
//! [/tool_call]
//! ```
//!
//! Malformed blocks are skipped, never a parse failure.

use std::collections::HashMap;

pub const BLOCK_OPEN: &str = "[tool_call]";
pub const BLOCK_CLOSE: &str = "[/tool_call]";
pub const MULTILINE_OPEN: &str = "<<<";
pub const MULTILINE_CLOSE: &str = ">>>";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub command: String,
    pub args: HashMap<String, String>,
}

/// Extracts every well-formed tool-call block from a completed reply.
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if line.trim() != BLOCK_OPEN {
            continue;
        }
        if let Some(call) = parse_block(&mut lines) {
            calls.push(call);
        }
    }
    calls
}

/// Parses one block body up to its closing tag. Returns None for blocks with
/// no command, an unterminated multi-line value, or a missing close tag.
fn parse_block<'a>(lines: &mut std::str::Lines<'a>) -> Option<ToolCall> {
    let mut command = None;
    let mut args = HashMap::new();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed == BLOCK_CLOSE {
            return command.map(|command| ToolCall { command, args });
        }
        if trimmed.is_empty() {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix("@command:") {
            command = Some(name.trim().to_string());
            continue;
        }
        let (key, value) = match trimmed.split_once(':') {
            Some((k, v)) => (k.trim().to_string(), v.trim()),
            None => continue, // stray line, skip it
        };
        if value == MULTILINE_OPEN {
            args.insert(key, collect_multiline(lines)?);
        } else {
            args.insert(key, value.to_string());
        }
    }
    // Ran out of input before the close tag.
    None
}

/// Collects lines until the closing marker, preserving interior newlines
/// verbatim and stripping a single leading and trailing blank line if present.
fn collect_multiline(lines: &mut std::str::Lines<'_>) -> Option<String> {
    let mut collected: Vec<&str> = Vec::new();
    for line in lines.by_ref() {
        if line.trim() == MULTILINE_CLOSE {
            if collected.first() == Some(&"") {
                collected.remove(0);
            }
            if collected.last() == Some(&"") {
                collected.pop();
            }
            return Some(collected.join("\n"));
        }
        collected.push(line);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_block() {
        let reply = "Sure, saving that.\n[tool_call]\n@command: save_snippet\nname: a.txt\n[/tool_call]\nDone.";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "save_snippet");
        assert_eq!(calls[0].args["name"], "a.txt");
    }

    #[test]
    fn multiline_value_preserves_newlines_strips_one_blank_each_end() {
        let reply = "\
[tool_call]
@command: save_snippet
content: <<<

fn main() {

    println!(\"hi\");
}

>>>
[/tool_call]";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 1);
        // One leading and one trailing blank line stripped; the interior
        // blank line survives verbatim.
        assert_eq!(
            calls[0].args["content"],
            "fn main() {\n\n    println!(\"hi\");\n}"
        );
    }

    #[test]
    fn multiline_without_blank_padding_is_untouched() {
        let reply = "[tool_call]\n@command: c\nv: <<<\nline1\nline2\n>>>\n[/tool_call]";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls[0].args["v"], "line1\nline2");
    }

    #[test]
    fn arguments_after_a_multiline_value_still_parse() {
        let reply = "\
[tool_call]
@command: save_snippet
content: <<<
body text
>>>
name: after.txt
[/tool_call]";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args["content"], "body text");
        assert_eq!(calls[0].args["name"], "after.txt");
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let reply = "\
[tool_call]
no command here
[/tool_call]
[tool_call]
@command: good
key: value
[/tool_call]
[tool_call]
@command: unterminated";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "good");
    }

    #[test]
    fn unterminated_multiline_skips_block() {
        let reply = "[tool_call]\n@command: c\nv: <<<\nnever closed\n[/tool_call]";
        // The close tag is swallowed by the multi-line scan, so the block is
        // treated as unterminated.
        assert!(parse_tool_calls(reply).is_empty());
    }

    #[test]
    fn multiple_blocks_in_order() {
        let reply = "\
[tool_call]
@command: first
[/tool_call]
middle text
[tool_call]
@command: second
[/tool_call]";
        let calls = parse_tool_calls(reply);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command, "first");
        assert_eq!(calls[1].command, "second");
    }

    #[test]
    fn no_blocks_no_calls() {
        assert!(parse_tool_calls("plain reply with [brackets] only").is_empty());
    }
}
