//! Embedded prompt templates with repo override.
//!
//! Defaults are compiled into the binary; a file at the expected path
//! under `_governator/` takes precedence, so operators customize
//! without forking. Lookups never fail: an unknown role falls back to
//! the default role template.

use governator_store::config::ReasoningEffort;
use governator_store::layout::Layout;

const WORKER_CONTRACT: &str = include_str!("../../templates/worker-contract.md");

const ROLE_DEFAULT: &str = include_str!("../../templates/roles/default.md");
const ROLE_ARCHITECT: &str = include_str!("../../templates/roles/architect.md");
const ROLE_PLANNER: &str = include_str!("../../templates/roles/planner.md");
const ROLE_TESTER: &str = include_str!("../../templates/roles/tester.md");
const ROLE_REVIEWER: &str = include_str!("../../templates/roles/reviewer.md");
const ROLE_RESOLVER: &str = include_str!("../../templates/roles/resolver.md");

const REASONING_LOW: &str = include_str!("../../templates/reasoning/low.md");
const REASONING_MEDIUM: &str = include_str!("../../templates/reasoning/medium.md");
const REASONING_HIGH: &str = include_str!("../../templates/reasoning/high.md");

const PLANNING_ARCHITECTURE: &str = include_str!("../../templates/planning/architecture.md");
const PLANNING_BREAKDOWN: &str = include_str!("../../templates/planning/breakdown.md");

/// Resolves templates repo-override-first, embedded-default second.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    layout: Layout,
}

fn read_override(path: &std::path::Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(body) if !body.trim().is_empty() => Some(body),
        _ => None,
    }
}

impl TemplateSet {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn worker_contract(&self) -> String {
        read_override(&self.layout.worker_contract_path())
            .unwrap_or_else(|| WORKER_CONTRACT.to_string())
    }

    /// Role prompt for `role`. Unknown roles use the default role
    /// template so planner-invented roles still get a sane prompt.
    pub fn role_prompt(&self, role: &str) -> String {
        if let Some(body) = read_override(&self.layout.role_path(role)) {
            return body;
        }
        match role {
            "architect" => ROLE_ARCHITECT,
            "planner" => ROLE_PLANNER,
            "tester" => ROLE_TESTER,
            "reviewer" => ROLE_REVIEWER,
            "resolver" => ROLE_RESOLVER,
            _ => ROLE_DEFAULT,
        }
        .to_string()
    }

    /// Operator-wide override prompt, if present.
    pub fn global_override(&self) -> Option<String> {
        read_override(&self.layout.global_prompt_path())
    }

    /// Operator per-role override prompt, if present.
    pub fn role_override(&self, role: &str) -> Option<String> {
        read_override(&self.layout.role_prompt_path(role))
    }

    pub fn reasoning(&self, effort: ReasoningEffort) -> String {
        if let Some(body) = read_override(&self.layout.reasoning_path(effort.as_str())) {
            return body;
        }
        match effort {
            ReasoningEffort::Low => REASONING_LOW,
            ReasoningEffort::Medium => REASONING_MEDIUM,
            ReasoningEffort::High => REASONING_HIGH,
        }
        .to_string()
    }

    /// Prompt template for a planning step, by template name.
    ///
    /// Overrides resolve under `_governator/prompts/<name>.md`.
    pub fn planning_template(&self, name: &str) -> Option<String> {
        if let Some(body) = read_override(&self.layout.prompts_dir().join(format!("{name}.md"))) {
            return Some(body);
        }
        match name {
            "architecture" => Some(PLANNING_ARCHITECTURE.to_string()),
            "breakdown" => Some(PLANNING_BREAKDOWN.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, TemplateSet) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure_tree().unwrap();
        let templates = TemplateSet::new(Layout::new(tmp.path()));
        (tmp, templates)
    }

    #[test]
    fn embedded_defaults_are_nonempty() {
        let (_tmp, templates) = scratch();
        assert!(templates.worker_contract().contains("Change Summary"));
        assert!(!templates.role_prompt("architect").is_empty());
        assert!(!templates.reasoning(ReasoningEffort::High).is_empty());
        assert!(templates.planning_template("architecture").is_some());
        assert!(templates.planning_template("no-such-step").is_none());
    }

    #[test]
    fn unknown_role_falls_back_to_default() {
        let (_tmp, templates) = scratch();
        assert_eq!(templates.role_prompt("wizard"), templates.role_prompt("default"));
    }

    #[test]
    fn repo_override_wins() {
        let (tmp, templates) = scratch();
        let layout = Layout::new(tmp.path());

        std::fs::write(layout.worker_contract_path(), "custom contract\n").unwrap();
        std::fs::write(layout.role_path("tester"), "custom tester\n").unwrap();

        assert_eq!(templates.worker_contract(), "custom contract\n");
        assert_eq!(templates.role_prompt("tester"), "custom tester\n");
        // Other roles untouched.
        assert!(templates.role_prompt("reviewer").contains("Reviewer"));
    }

    #[test]
    fn empty_override_is_ignored() {
        let (tmp, templates) = scratch();
        let layout = Layout::new(tmp.path());
        std::fs::write(layout.worker_contract_path(), "  \n").unwrap();
        assert!(templates.worker_contract().contains("Worker Contract"));
    }

    #[test]
    fn overrides_absent_yield_none() {
        let (_tmp, templates) = scratch();
        assert!(templates.global_override().is_none());
        assert!(templates.role_override("default").is_none());
    }
}
