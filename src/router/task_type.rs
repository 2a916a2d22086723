use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Search,
    Coding,
    Analysis,
    Planning,
    Execution,
    Vision,
    Conversation,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Coding => "coding",
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Vision => "vision",
            Self::Conversation => "conversation",
        }
    }
}

const SEARCH_KEYWORDS: &[&str] = &[
    "search", "find", "look up", "lookup", "news", "latest", "research", "browse", "web",
];
const CODING_KEYWORDS: &[&str] = &[
    "code", "implement", "refactor", "debug", "compile", "function", "script", "bug", "test",
    "rust", "python", "javascript",
];
const ANALYSIS_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "analysis", "summarize", "summarise", "compare", "evaluate", "review",
    "explain", "why",
];
const PLANNING_KEYWORDS: &[&str] = &[
    "plan", "schedule", "organize", "organise", "roadmap", "steps", "break down", "outline",
];
const EXECUTION_KEYWORDS: &[&str] = &[
    "run", "execute", "create", "write", "delete", "move", "copy", "install", "deploy", "mkdir",
];
const VISION_KEYWORDS: &[&str] = &[
    "image", "screenshot", "picture", "photo", "diagram", "look at", "see the screen",
];

/// Keyword heuristic over the last user-role message. Categories are
/// checked in the order they are documented; a message matching none of
/// them is `execution` when tools are offered, `conversation` otherwise.
pub fn detect_task_type(last_user_message: Option<&str>, has_tools: bool) -> TaskType {
    let Some(message) = last_user_message else {
        return fallback(has_tools);
    };
    let lowered = message.to_ascii_lowercase();
    let categories: &[(TaskType, &[&str])] = &[
        (TaskType::Search, SEARCH_KEYWORDS),
        (TaskType::Coding, CODING_KEYWORDS),
        (TaskType::Analysis, ANALYSIS_KEYWORDS),
        (TaskType::Planning, PLANNING_KEYWORDS),
        (TaskType::Execution, EXECUTION_KEYWORDS),
        (TaskType::Vision, VISION_KEYWORDS),
    ];
    for (task_type, keywords) in categories {
        if keywords.iter().any(|keyword| contains_phrase(&lowered, keyword)) {
            return *task_type;
        }
    }
    fallback(has_tools)
}

fn fallback(has_tools: bool) -> TaskType {
    if has_tools {
        TaskType::Execution
    } else {
        TaskType::Conversation
    }
}

/// Single-word keywords must match on token boundaries so "news" does
/// not fire on "newsletter"; multi-word phrases use plain containment.
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.contains(' ') {
        return haystack.contains(phrase);
    }
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == phrase)
}
