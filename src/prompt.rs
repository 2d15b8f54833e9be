//! Prompt construction for the decision-maker, and the predefined tasks.

use std::fmt::Write as _;

use crate::registry::catalogue;
use crate::state::OrchestratorState;

const RULES: &str = r#"CRITICAL RULES:
- Return EXACTLY ONE tool call for the next step.
- DO NOT repeat actions! Check CURRENT STATE above:
  - If Connected is true, do NOT call connect_browser again.
  - If already at the URL, do NOT call navigate again.
  - If Dashboard ready is true, do NOT call wait_for_dashboard again. Start investigating.

PAGE LOADING:
- wait_for_page compares successive screenshots. If they keep changing the page is still loading.
- For dashboards with panels use wait_for_dashboard(max_wait=60); it waits for actual data.
- A "timeout" result means the page may still be loading. Call it again with a longer max_wait before clicking.
- A "login_required" result means you must call login first.

LOADING SEQUENCE:
1. navigate(url)
2. wait_for_page(max_wait=30)
3. If login is required: login, then wait_for_page(max_wait=30) again
4. wait_for_dashboard(max_wait=60) for pages with data panels
5. Only then explore or click

EXPLORATION:
- explore_section(section_name) describes a section before you click in it.
- list_clickable_elements(section_keyword) shows what can be clicked.

CLICKING:
- Priority: red indicators (0/X, Critical) > links > numbered items > panels.
- "0/1" means 0 healthy out of 1, which is a problem. Click it.
- Use click_text(text) when you know the exact text, click_element(description) otherwise.
- If unsure whether something is clickable, hover_text(text): cursor_style "pointer" means it is.
- After each click, call wait_for_page(max_wait=30) before analyzing.

SCROLLING:
- If you have analyzed the same view twice without finding what you need, scroll_page(direction="down").
- Details pages are long; events and logs are often at the bottom.

COMPLETION:
- Return DONE with a detailed summary when the task is complete."#;

const RESPONSE_FORMAT: &str = r#"RESPONSE FORMAT (pick one):
  TOOL: tool_name
  ARGS: {"arg1": "value1"}
  REASON: why you're doing this

  OR

  DONE: <summary of findings>"#;

/// Render the catalogue as `- name: description (required: ..; optional: ..)` lines.
pub fn tool_descriptions() -> String {
    let mut out = String::new();
    for spec in catalogue() {
        let _ = write!(out, "- {}: {}", spec.name, spec.description);
        let mut notes = Vec::new();
        if !spec.required.is_empty() {
            notes.push(format!("required: {}", spec.required.join(", ")));
        }
        if !spec.optional.is_empty() {
            notes.push(format!("optional: {}", spec.optional));
        }
        if !notes.is_empty() {
            let _ = write!(out, " ({})", notes.join("; "));
        }
        out.push('\n');
    }
    out
}

/// Build the full prompt for one THINK step.
pub fn build(task: &str, state: &OrchestratorState, history_window: usize) -> String {
    let recent = state.recent_history(history_window);
    let history = if recent.is_empty() {
        "No actions taken yet.".to_string()
    } else {
        recent
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are a browser automation agent. You must decide the NEXT SINGLE action to take.\n\n\
         AVAILABLE TOOLS:\n{tools}\n\
         TASK: {task}\n\n\
         {state}\n\n\
         ACTION HISTORY (most recent last):\n{history}\n\n\
         {RULES}\n\n\
         {RESPONSE_FORMAT}\n",
        tools = tool_descriptions(),
        task = task.trim(),
        state = state.summary_block(),
    )
}

/// Predefined tasks selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Open a public homepage and report what is on it.
    Test,
    /// Drill down from a monitoring dashboard to the root cause of a critical alert.
    Dashboard,
}

impl Preset {
    pub fn task(self) -> &'static str {
        match self {
            Preset::Test => {
                "Simple browser test.\n\n\
                 Steps:\n\
                 1. Connect to the browser\n\
                 2. Navigate to https://www.google.com\n\
                 3. Take a screenshot\n\
                 4. Analyze what you see on the page\n\
                 5. Report the result"
            }
            Preset::Dashboard => {
                "You are an SRE investigating a critical alert on the monitoring dashboard that is open in the browser.\n\n\
                 YOUR MISSION: find the root cause of the \"Critical\" issue.\n\n\
                 STRATEGY:\n\
                 1. DASHBOARD: wait for panels to load. If you see \"0/1\" or \"Critical\", click it.\n\
                 2. DRILL DOWN: follow the red indicators.\n\
                 3. FIND EVENTS: the root cause is in the events or logs, often at the bottom of the page. \
                 Scroll down if you don't see them.\n\
                 4. REPORT: device name, IP, location and the specific error message from the event log.\n\n\
                 RULES:\n\
                 - If you've analyzed the same view twice, scroll down.\n\
                 - If unsure whether something is clickable, use hover_text to check for a pointer cursor."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EntryKind, HistoryEntry};
    use crate::types::ToolArgs;

    #[test]
    fn test_prompt_lists_every_tool_and_required_args() {
        let text = tool_descriptions();
        for spec in catalogue() {
            assert!(text.contains(&format!("- {}:", spec.name)));
        }
        assert!(text.contains("- navigate: Go to a URL. Reports whether a login page was detected. (required: url)"));
    }

    #[test]
    fn test_prompt_contains_task_state_and_format() {
        let mut state = OrchestratorState::new(3);
        state.connected = true;
        let prompt = build("verify homepage loads", &state, 10);
        assert!(prompt.contains("TASK: verify homepage loads"));
        assert!(prompt.contains("- Connected: true"));
        assert!(prompt.contains("- Current URL: None"));
        assert!(prompt.contains("No actions taken yet."));
        assert!(prompt.contains("DONE: <summary of findings>"));
    }

    #[test]
    fn test_prompt_history_is_windowed() {
        let mut state = OrchestratorState::new(3);
        for step in 1..=12 {
            state.push(HistoryEntry::new(
                step,
                EntryKind::Executed,
                Some("extract_text".into()),
                ToolArgs::new(),
                format!("result {step}"),
            ));
        }
        let prompt = build("t", &state, 10);
        assert!(!prompt.contains("Step 2: extract_text"));
        assert!(prompt.contains("Step 3: extract_text({}) → result 3"));
        assert!(prompt.contains("Step 12:"));
    }

    #[test]
    fn test_presets_have_tasks() {
        assert!(Preset::Test.task().contains("Navigate to https://www.google.com"));
        assert!(Preset::Dashboard.task().contains("root cause"));
    }
}
