//! Tool-call classification shared by the phase gate, the quality analyzer
//! and the orchestrator's KPI bookkeeping.

use warden_core::ToolCall;

/// Tools that run arbitrary commands; classified by their arguments.
pub const SHELL_TOOLS: &[&str] = &[
    "bash",
    "shell",
    "shell_execute",
    "run_command",
    "execute_command",
];

/// Markers that show where a tool invocation begins inside response text.
pub const TOOL_MARKERS: &[&str] = &["<tool_use", "<function_calls", "<invoke", "```tool"];

/// Matches tool calls by name, or shell tool calls by argument keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolMatcher {
    pub label: &'static str,
    pub names: &'static [&'static str],
    pub shell_keywords: &'static [&'static str],
}

impl ToolMatcher {
    pub fn matches(&self, call: &ToolCall) -> bool {
        let name = call.name.to_ascii_lowercase();
        if self.names.contains(&name.as_str()) {
            return true;
        }
        if self.shell_keywords.is_empty() || !SHELL_TOOLS.contains(&name.as_str()) {
            return false;
        }
        let args = call.argument_text();
        self.shell_keywords.iter().any(|k| args.contains(k))
    }

    pub fn any(&self, calls: &[ToolCall]) -> bool {
        calls.iter().any(|c| self.matches(c))
    }
}

pub const TASK_LIST: ToolMatcher = ToolMatcher {
    label: "task-list creation",
    names: &[
        "todo_write",
        "create_task_list",
        "task_list",
        "update_plan",
        "write_todos",
    ],
    shell_keywords: &[],
};

pub const TEST_EXECUTION: ToolMatcher = ToolMatcher {
    label: "test execution",
    names: &["run_tests", "test"],
    shell_keywords: &[
        "test",
        "pytest",
        "jest",
        "vitest",
        "cargo test",
        "npm test",
        "go test",
    ],
};

pub const INSPECTION: ToolMatcher = ToolMatcher {
    label: "inspection",
    names: &[
        "read_file",
        "file_read",
        "list_directory",
        "search_files",
        "grep",
        "glob",
        "view",
        "git_diff",
        "git_status",
    ],
    shell_keywords: &[],
};

pub const FILE_MODIFICATION: ToolMatcher = ToolMatcher {
    label: "file modification",
    names: &[
        "write_file",
        "file_write",
        "edit_file",
        "str_replace",
        "apply_patch",
        "create_file",
        "delete_file",
    ],
    shell_keywords: &[],
};

pub const GIT_COMMIT: ToolMatcher = ToolMatcher {
    label: "git commit",
    names: &["git_commit"],
    shell_keywords: &["git commit"],
};

/// Words of prose before the first tool marker, or in the whole text when
/// it contains no marker.
pub fn prose_word_count(text: &str) -> usize {
    let cut = TOOL_MARKERS
        .iter()
        .filter_map(|m| text.find(m))
        .min()
        .unwrap_or(text.len());
    text[..cut].split_whitespace().count()
}
