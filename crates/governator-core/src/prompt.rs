//! Prompt-stack assembly.
//!
//! A worker's prompt is a fixed-order concatenation: contract, role
//! prompt, operator global override, operator per-role override,
//! reasoning-effort guidance, and finally the task markdown. Absent
//! overrides are skipped; the order is a contract.

use governator_store::config::ReasoningEffort;

use crate::templates::TemplateSet;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Assemble the full prompt for one worker invocation.
pub fn assemble(
    templates: &TemplateSet,
    role: &str,
    effort: ReasoningEffort,
    task_markdown: &str,
) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(6);

    sections.push(templates.worker_contract());
    sections.push(templates.role_prompt(role));
    if let Some(global) = templates.global_override() {
        sections.push(global);
    }
    if let Some(per_role) = templates.role_override(role) {
        sections.push(per_role);
    }
    sections.push(templates.reasoning(effort));
    sections.push(task_markdown.to_string());

    sections
        .iter()
        .map(|s| s.trim_end())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use governator_store::layout::Layout;

    fn scratch() -> (tempfile::TempDir, Layout, TemplateSet) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure_tree().unwrap();
        let templates = TemplateSet::new(layout.clone());
        (tmp, layout, templates)
    }

    #[test]
    fn order_is_contract_role_reasoning_task() {
        let (_tmp, _layout, templates) = scratch();
        let prompt = assemble(&templates, "default", ReasoningEffort::Low, "# Task 001");

        let contract = prompt.find("Worker Contract").unwrap();
        let role = prompt.find("Role: Implementer").unwrap();
        let effort = prompt.find("Effort: Low").unwrap();
        let task = prompt.find("# Task 001").unwrap();
        assert!(contract < role && role < effort && effort < task);
    }

    #[test]
    fn overrides_slot_between_role_and_reasoning() {
        let (_tmp, layout, templates) = scratch();
        std::fs::write(layout.global_prompt_path(), "GLOBAL RULES\n").unwrap();
        std::fs::write(layout.role_prompt_path("tester"), "TESTER RULES\n").unwrap();

        let prompt = assemble(&templates, "tester", ReasoningEffort::Medium, "# Task");
        let role = prompt.find("Role: Tester").unwrap();
        let global = prompt.find("GLOBAL RULES").unwrap();
        let per_role = prompt.find("TESTER RULES").unwrap();
        let effort = prompt.find("Effort: Medium").unwrap();
        assert!(role < global && global < per_role && per_role < effort);

        // Other roles do not pick up the tester override.
        let other = assemble(&templates, "default", ReasoningEffort::Medium, "# Task");
        assert!(other.contains("GLOBAL RULES"));
        assert!(!other.contains("TESTER RULES"));
    }

    #[test]
    fn task_markdown_lands_verbatim_at_end() {
        let (_tmp, _layout, templates) = scratch();
        let task = "---\ntask: 001-x\n---\n\nDo the thing.";
        let prompt = assemble(&templates, "default", ReasoningEffort::High, task);
        assert!(prompt.ends_with("Do the thing."));
    }
}
