//! Prompt rendering for initializer and coding sessions.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::auth::AuthorizationPolicy;
use crate::auth::validators::BOOTSTRAP_SCRIPT;
use crate::core::run::RunKind;
use crate::core::task::Task;

const INITIALIZER_TEMPLATE: &str = include_str!("prompts/initializer.md");
const CODING_TEMPLATE: &str = include_str!("prompts/coding.md");

/// Droppable sections in the order they are removed when over budget.
const DROP_ORDER: &[&str] = &["tasks", "specification"];

/// Kind-specific instructions for the initializer session.
pub fn kind_instructions(kind: &RunKind) -> String {
    match kind {
        RunKind::Builder { .. } => "Plan the whole project from the specification: setup and \
            tooling first, then core features, then polish. Give every feature task a \
            verification command."
            .to_string(),
        RunKind::Migrator {
            source_dir,
            target_dir,
            ..
        } => format!(
            "Inventory `{}` and plan a module-by-module port into `{}`. Keep behavior \
             identical; one task per module or feature, each verified against the original \
             behavior.",
            source_dir.display(),
            target_dir.display()
        ),
        RunKind::Scaffold { stack, .. } => {
            let stack = stack.as_deref().unwrap_or("the most suitable stack");
            format!(
                "Plan a minimal runnable skeleton using {stack}: project layout, build, a \
                 smoke test, then the described entry points."
            )
        }
        RunKind::Bugfix { reproduction, .. } => {
            let mut text = "First task: reproduce the bug with a failing test. Then fix the \
                root cause, then add regression coverage."
                .to_string();
            if reproduction.is_some() {
                text.push_str(" Use the given reproduction as the starting point.");
            }
            text
        }
        RunKind::Feature { .. } => "Plan the feature as incremental tasks inside the existing \
            codebase. Read the surrounding code before planning; keep existing tests passing."
            .to_string(),
        RunKind::Refactor { scope, .. } => {
            let mut text = "Plan behavior-preserving steps, each leaving the build and tests \
                green."
                .to_string();
            if !scope.is_empty() {
                text.push_str(&format!(" Touch only: {}.", scope.join(", ")));
            }
            text
        }
        RunKind::PlanExecution { .. } => "Turn each step of the plan into one task, in plan \
            order, keeping the plan's own dependencies."
            .to_string(),
    }
}

fn kind_title(kind: &RunKind) -> &'static str {
    match kind {
        RunKind::Builder { .. } => "Builder",
        RunKind::Migrator { .. } => "Migration",
        RunKind::Scaffold { .. } => "Scaffold",
        RunKind::Bugfix { .. } => "Bugfix",
        RunKind::Feature { .. } => "Feature",
        RunKind::Refactor { .. } => "Refactor",
        RunKind::PlanExecution { .. } => "Plan",
    }
}

/// Programs granted beyond the preset, and deny entries, for display.
fn permission_lists(policy: &AuthorizationPolicy) -> (Vec<String>, Vec<String>) {
    let preset = policy.preset.programs();
    let extra = policy
        .effective_programs()
        .into_iter()
        .filter(|p| !preset.contains(p.as_str()))
        .collect();
    let denied = policy
        .deny
        .iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    (extra, denied)
}

/// Inputs for the first session, which writes the task list.
#[derive(Debug, Clone)]
pub struct InitializerInputs<'a> {
    pub kind: &'a RunKind,
    pub policy: &'a AuthorizationPolicy,
    pub tasks_path: &'a str,
}

/// Inputs for a working session targeting one task.
#[derive(Debug, Clone)]
pub struct CodingInputs<'a> {
    pub session: u32,
    pub kind: &'a RunKind,
    pub policy: &'a AuthorizationPolicy,
    pub tasks_path: &'a str,
    pub task: &'a Task,
    pub tasks: &'a [Task],
    pub progress: &'a str,
    /// Retry guidance from the latest failed verification of the target.
    pub guidance: Option<&'a str>,
    pub completion_phrase: &'a str,
}

/// Renders prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("initializer", INITIALIZER_TEMPLATE)
            .context("load initializer template")?;
        env.add_template("coding", CODING_TEMPLATE)
            .context("load coding template")?;
        Ok(Self { env, budget_bytes })
    }

    pub fn build_initializer(&self, input: &InitializerInputs<'_>) -> Result<String> {
        let (extra_programs, denied) = permission_lists(input.policy);
        let rendered = self
            .env
            .get_template("initializer")?
            .render(context! {
                kind => input.kind.label(),
                kind_title => kind_title(input.kind),
                instructions => kind_instructions(input.kind),
                specification => input.kind.specification_text().trim(),
                tasks_path => input.tasks_path,
                preset => input.policy.preset.as_str(),
                extra_programs => extra_programs,
                denied => denied,
                bootstrap_script => BOOTSTRAP_SCRIPT,
            })
            .context("render initializer prompt")?;
        Ok(self.fit(&rendered))
    }

    pub fn build_coding(&self, input: &CodingInputs<'_>) -> Result<String> {
        let (extra_programs, denied) = permission_lists(input.policy);
        let rendered = self
            .env
            .get_template("coding")?
            .render(context! {
                session => input.session,
                kind => input.kind.label(),
                tasks_path => input.tasks_path,
                task => input.task,
                tasks => input.tasks,
                progress => input.progress.trim(),
                guidance => input.guidance.map(str::trim).filter(|g| !g.is_empty()),
                completion_phrase => input.completion_phrase,
                specification => input.kind.specification_text().trim(),
                preset => input.policy.preset.as_str(),
                extra_programs => extra_programs,
                denied => denied,
            })
            .context("render coding prompt")?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

/// Split on `<!-- section:KEY required|droppable -->` markers. Empty sections are dropped.
fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim();
        if content.is_empty() {
            continue;
        }
        sections.push(Section {
            key: key.as_str().to_string(),
            required: kind.as_str() == "required",
            content: content.to_string(),
        });
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in `DROP_ORDER`; if still over, truncate the last section.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(section = key, bytes = sections[idx].content.len(), "dropped prompt section");
            sections.remove(idx);
        }
    }

    let over = total_len(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    if let Some(last) = sections.last_mut() {
        let keep = last.content.len().saturating_sub(over + 12);
        let mut cut = keep;
        while !last.content.is_char_boundary(cut) {
            cut -= 1;
        }
        last.content.truncate(cut);
        last.content.push_str("\n[truncated]");
        debug!(section = %last.key, "truncated prompt section");
    }
}

fn render_sections(sections: &[Section]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
