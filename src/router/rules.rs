use super::task_type::TaskType;
use serde::{Deserialize, Serialize};

/// Matcher → provider mapping. Empty constraint lists match anything;
/// populated lists all have to hold for the rule to fire.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub task_types: Vec<TaskType>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    pub reason: String,
}

impl RoutingRule {
    pub fn matches(
        &self,
        task_type: TaskType,
        last_user_message: Option<&str>,
        tool_names: &[&str],
    ) -> bool {
        if !self.task_types.is_empty() && !self.task_types.contains(&task_type) {
            return false;
        }
        if !self.keywords.is_empty() {
            let Some(message) = last_user_message else {
                return false;
            };
            let lowered = message.to_ascii_lowercase();
            if !self
                .keywords
                .iter()
                .any(|keyword| lowered.contains(&keyword.to_ascii_lowercase()))
            {
                return false;
            }
        }
        if !self.required_tools.is_empty()
            && !self
                .required_tools
                .iter()
                .all(|required| tool_names.contains(&required.as_str()))
        {
            return false;
        }
        true
    }
}

/// Built-in rules evaluated after any user-supplied ones: the
/// search-optimized provider for search tasks, the multimodal provider
/// for vision tasks.
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule {
            task_types: vec![TaskType::Search],
            keywords: Vec::new(),
            required_tools: Vec::new(),
            provider: "perplexity".to_string(),
            model: None,
            reason: "search tasks route to the search-optimized provider".to_string(),
        },
        RoutingRule {
            task_types: vec![TaskType::Vision],
            keywords: Vec::new(),
            required_tools: Vec::new(),
            provider: "gemini".to_string(),
            model: None,
            reason: "vision tasks route to the multimodal provider".to_string(),
        },
        RoutingRule {
            task_types: vec![TaskType::Coding],
            keywords: Vec::new(),
            required_tools: Vec::new(),
            provider: "anthropic".to_string(),
            model: None,
            reason: "coding tasks route to the code-strong provider".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_constraints_match_anything() {
        let rule = RoutingRule {
            task_types: Vec::new(),
            keywords: Vec::new(),
            required_tools: Vec::new(),
            provider: "anthropic".to_string(),
            model: None,
            reason: "catch-all".to_string(),
        };
        assert!(rule.matches(TaskType::Conversation, None, &[]));
    }

    #[test]
    fn all_populated_constraints_must_hold() {
        let rule = RoutingRule {
            task_types: vec![TaskType::Execution],
            keywords: vec!["deploy".to_string()],
            required_tools: vec!["terminal".to_string()],
            provider: "openai".to_string(),
            model: None,
            reason: "deploys".to_string(),
        };
        assert!(rule.matches(
            TaskType::Execution,
            Some("deploy the service"),
            &["terminal", "filesystem"],
        ));
        assert!(!rule.matches(TaskType::Execution, Some("deploy it"), &["filesystem"]));
        assert!(!rule.matches(TaskType::Coding, Some("deploy it"), &["terminal"]));
        assert!(!rule.matches(TaskType::Execution, Some("restart it"), &["terminal"]));
    }
}
