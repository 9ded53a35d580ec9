//! Prompt rendering for each agent role.
//!
//! Templates are minijinja Markdown files with section markers
//! (`<!-- section:KEY required|droppable -->`). After rendering, droppable
//! sections are removed in a fixed order until the prompt fits the budget.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::agents::AgentRole;
use crate::core::types::{Evaluation, ExecutionStep, Message, OperationPreview, Role};

const CLASSIFIER_TEMPLATE: &str = include_str!("prompts/classifier.md");
const COLLECTOR_TEMPLATE: &str = include_str!("prompts/collector.md");
const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const EVALUATOR_TEMPLATE: &str = include_str!("prompts/evaluator.md");
const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");

/// Sections dropped first when over budget.
const DROP_ORDER: [&str; 5] = ["outline", "history", "completed", "context", "feedback"];

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in [
        ("classifier", CLASSIFIER_TEMPLATE),
        ("collector", COLLECTOR_TEMPLATE),
        ("planner", PLANNER_TEMPLATE),
        ("coder", CODER_TEMPLATE),
        ("evaluator", EVALUATOR_TEMPLATE),
        ("chat", CHAT_TEMPLATE),
    ] {
        env.add_template(name, source)
            .expect("bundled prompt template should be valid");
    }
    env
});

static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex")
});

/// Conversation-level inputs shared by classifier, collector, planner and chat.
#[derive(Debug, Clone, Default)]
pub struct TurnInputs {
    /// Latest user request.
    pub request: String,
    /// Earlier messages, oldest first.
    pub history: Vec<Message>,
    /// Accumulated context bundles rendered as text.
    pub context: String,
    /// Relative file list.
    pub outline: Vec<String>,
    /// Context rounds already spent and allowed, shown to the classifier.
    pub context_rounds: (u32, u32),
}

/// Inputs for one task cycle (coder and evaluator).
#[derive(Debug, Clone, Default)]
pub struct TaskInputs {
    pub description: String,
    pub static_context: String,
    pub dynamic_context: String,
    pub feedback: Vec<Evaluation>,
}

#[derive(Debug, Serialize)]
struct FeedbackItem {
    attempt: usize,
    feedback: String,
    weaknesses: Vec<String>,
    suggested_revision: Option<String>,
    alternative_approach: Option<String>,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds role prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn classifier(&self, input: &TurnInputs) -> Result<String> {
        self.render_turn(AgentRole::Classifier, "classifier", input)
    }

    pub fn collector(&self, input: &TurnInputs) -> Result<String> {
        self.render_turn(AgentRole::Collector, "collector", input)
    }

    pub fn chat(&self, input: &TurnInputs) -> Result<String> {
        self.render_turn(AgentRole::Chat, "chat", input)
    }

    pub fn planner(
        &self,
        input: &TurnInputs,
        previous: Option<&[ExecutionStep]>,
    ) -> Result<String> {
        let previous =
            previous.map(|steps| serde_json::to_string_pretty(steps).unwrap_or_default());
        let rendered = ENGINE.get_template("planner")?.render(context! {
            request => input.request.trim(),
            history => render_history(&input.history),
            context => non_empty(&input.context),
            outline => outline_text(&input.outline),
            previous => previous,
        })?;
        Ok(self.fit(AgentRole::Planner, &rendered))
    }

    pub fn coder(&self, input: &TaskInputs) -> Result<String> {
        let rendered = ENGINE.get_template("coder")?.render(context! {
            description => input.description.trim(),
            static_context => non_empty(&input.static_context),
            dynamic_context => non_empty(&input.dynamic_context),
            feedback => feedback_items(&input.feedback),
        })?;
        Ok(self.fit(AgentRole::Coder, &rendered))
    }

    pub fn evaluator(
        &self,
        input: &TaskInputs,
        proposal_json: &str,
        previews: &[OperationPreview],
    ) -> Result<String> {
        let rendered = ENGINE.get_template("evaluator")?.render(context! {
            description => input.description.trim(),
            static_context => non_empty(&input.static_context),
            dynamic_context => non_empty(&input.dynamic_context),
            proposal => proposal_json,
            previews => previews,
        })?;
        Ok(self.fit(AgentRole::Evaluator, &rendered))
    }

    fn render_turn(&self, role: AgentRole, template: &str, input: &TurnInputs) -> Result<String> {
        let rendered = ENGINE.get_template(template)?.render(context! {
            request => input.request.trim(),
            history => render_history(&input.history),
            context => non_empty(&input.context),
            outline => outline_text(&input.outline),
            context_rounds_used => input.context_rounds.0,
            context_rounds_max => input.context_rounds.1,
        })?;
        Ok(self.fit(role, &rendered))
    }

    fn fit(&self, role: AgentRole, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes, role);
        render_sections(&sections)
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn outline_text(outline: &[String]) -> Option<String> {
    (!outline.is_empty()).then(|| outline.join("\n"))
}

fn render_history(history: &[Message]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let lines: Vec<String> = history
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("[{who}] {}", m.content.trim())
        })
        .collect();
    Some(lines.join("\n\n"))
}

fn feedback_items(feedback: &[Evaluation]) -> Vec<FeedbackItem> {
    feedback
        .iter()
        .enumerate()
        .map(|(idx, eval)| FeedbackItem {
            attempt: idx + 1,
            feedback: eval.feedback.trim().to_string(),
            weaknesses: eval.weaknesses.clone(),
            suggested_revision: eval.suggested_revision.clone(),
            alternative_approach: eval.alternative_approach.clone(),
        })
        .collect()
}

/// Split rendered output at section markers. Empty droppable sections vanish.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize, role: AgentRole) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };
    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                role = role.as_str(),
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Grade, OperationType};
    use crate::test_support::evaluation;

    fn turn() -> TurnInputs {
        TurnInputs {
            request: "Fix the typo in README line 3".to_string(),
            history: vec![Message::user("earlier question"), Message::assistant("earlier answer")],
            context: "Summary: README has a typo".to_string(),
            outline: vec!["README.md".to_string(), "src/lib.rs".to_string()],
            context_rounds: (1, 2),
        }
    }

    #[test]
    fn classifier_prompt_orders_sections() {
        let prompt = PromptBuilder::new(100_000).classifier(&turn()).expect("render");
        let contract = prompt.find("<contract>").expect("contract");
        let request = prompt.find("<request>").expect("request");
        let history = prompt.find("<history>").expect("history");
        let context = prompt.find("<context>").expect("context");
        assert!(contract < request && request < history && history < context);
        assert!(prompt.contains("1 of 2"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let input = TurnInputs {
            request: "hi".to_string(),
            ..TurnInputs::default()
        };
        let prompt = PromptBuilder::new(100_000).chat(&input).expect("render");
        assert!(!prompt.contains("<history>"));
        assert!(!prompt.contains("<context>"));
        assert!(prompt.contains("<request>"));
    }

    #[test]
    fn budget_drops_outline_and_history_first() {
        let mut input = turn();
        input.outline = (0..500).map(|i| format!("src/file_{i}.rs")).collect();
        input.history = vec![Message::user("x".repeat(2_000))];
        let prompt = PromptBuilder::new(1_500).planner(&input, None).expect("render");
        assert!(!prompt.contains("<outline>"));
        assert!(!prompt.contains("<history>"));
        assert!(prompt.contains("<request>"));
        assert!(prompt.contains("<contract>"));
    }

    #[test]
    fn coder_prompt_lists_prior_feedback() {
        let mut eval = evaluation(Grade::RevisionNeeded);
        eval.feedback = "missing error handling".to_string();
        let input = TaskInputs {
            description: "Add retry".to_string(),
            static_context: "src/lib.rs".to_string(),
            dynamic_context: String::new(),
            feedback: vec![eval],
        };
        let prompt = PromptBuilder::new(100_000).coder(&input).expect("render");
        assert!(prompt.contains("<feedback>"));
        assert!(prompt.contains("missing error handling"));
        assert!(!prompt.contains("<dynamic_context>"));
    }

    #[test]
    fn evaluator_prompt_states_codebase_is_unchanged() {
        let input = TaskInputs {
            description: "Fix typo".to_string(),
            ..TaskInputs::default()
        };
        let previews = vec![OperationPreview {
            file_path: Some("README.md".to_string()),
            operation_type: OperationType::Replace,
            diff: "-teh\n+the\n".to_string(),
        }];
        let prompt = PromptBuilder::new(100_000)
            .evaluator(&input, "{\"summary\":\"fix\"}", &previews)
            .expect("render");
        assert!(prompt.contains("NOT been applied"));
        assert!(prompt.contains("+the"));
    }
}
