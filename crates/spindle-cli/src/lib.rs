// ABOUTME: Rendering helpers for the spindle CLI.
// ABOUTME: Turns task records and message histories into terminal output.

//! # spindle-cli
//!
//! ```text
//! spindle
//! ├── init                              # Write the default config
//! ├── list [--active]                   # Show the task tree
//! ├── create [--parent ID] [--name N]   # Create a task or subtask
//! ├── delete <task>                     # Delete a task and its subtasks
//! ├── duplicate <task>                  # Copy a task with its history
//! ├── fork <task> <message>             # Branch a task's history
//! ├── show <task>                       # Print a task's messages
//! ├── remove-message <task> <id>        # Remove a message or tool call
//! └── version
//! ```

use spindle_core::{ContentPart, Message, MessageContent, TaskData};
use std::collections::{HashMap, HashSet};

/// Version of the spindle CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One line per task, children indented under their parent.
///
/// Tasks whose parent is not in `tasks` are shown at the top level.
pub fn render_tree(tasks: &[TaskData]) -> Vec<String> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<&TaskData>> = HashMap::new();
    let mut roots = Vec::new();

    for task in tasks {
        match task.parent_id.as_deref() {
            Some(parent) if ids.contains(parent) => children.entry(parent).or_default().push(task),
            _ => roots.push(task),
        }
    }

    let mut lines = Vec::new();
    let mut visited = HashSet::new();
    for root in roots {
        push_subtree(root, 0, &children, &mut visited, &mut lines);
    }
    lines
}

fn push_subtree<'a>(
    task: &'a TaskData,
    depth: usize,
    children: &HashMap<&str, Vec<&'a TaskData>>,
    visited: &mut HashSet<&'a str>,
    lines: &mut Vec<String>,
) {
    if !visited.insert(task.id.as_str()) {
        return;
    }
    lines.push(format!("{}{}", "  ".repeat(depth), task_line(task)));
    for child in children.get(task.id.as_str()).into_iter().flatten() {
        push_subtree(child, depth + 1, children, visited, lines);
    }
}

fn task_line(task: &TaskData) -> String {
    let name = if task.name.is_empty() {
        "(unnamed)"
    } else {
        task.name.as_str()
    };
    let mut line = format!("{} {}", task.id, name);
    if !task.state.is_empty() {
        line.push_str(&format!(" [{}]", task.state));
    }
    if task.archived {
        line.push_str(" (archived)");
    }
    line
}

/// Human-readable message, one line per content part
pub fn render_message(message: &Message) -> Vec<String> {
    let role = format!("{:?}", message.role).to_lowercase();
    let header = format!("{role} {}", message.id);
    let mut lines = vec![header];
    match &message.content {
        MessageContent::Text(text) => lines.push(format!("  {text}")),
        MessageContent::Parts(parts) => lines.extend(parts.iter().map(|p| format!("  {}", part_line(p)))),
    }
    lines
}

fn part_line(part: &ContentPart) -> String {
    match part {
        ContentPart::Text { text } => text.clone(),
        ContentPart::Reasoning { text } => format!("(reasoning) {text}"),
        ContentPart::Image { source, .. } => format!("(image) {source}"),
        ContentPart::CodeBlock { language, code } => {
            format!("(code {}) {} lines", language.as_deref().unwrap_or("text"), code.lines().count())
        }
        ContentPart::ToolCall {
            tool_call_id,
            tool_name,
            ..
        } => format!("(tool call {tool_call_id}) {tool_name}"),
        ContentPart::ToolResult {
            tool_call_id,
            tool_name,
            ..
        } => format!("(tool result {tool_call_id}) {tool_name}"),
    }
}
