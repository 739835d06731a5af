//! Prompt and test templates.
//!
//! Everything sent to the model, and the fixed test template, is rendered
//! from minijinja templates compiled into the binary.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

const REPAIR_SYSTEM: &str = include_str!("prompts/repair_system.md");
const REPAIR_USER: &str = include_str!("prompts/repair_user.md");
const SCAFFOLD_SYSTEM: &str = include_str!("prompts/scaffold_system.md");
const SCAFFOLD_USER: &str = include_str!("prompts/scaffold_user.md");
const TEST_TEMPLATE: &str = include_str!("prompts/test_template.js.j2");

/// Inputs for one repair prompt.
#[derive(Debug, Clone)]
pub struct RepairPrompt<'a> {
    pub issue_id: &'a str,
    pub issue_title: &'a str,
    pub issue_text: &'a str,
    pub attempt: u32,
    pub budget: u32,
    /// Newest failing test output, already truncated.
    pub failure: Option<&'a str>,
    /// Parse/apply problems from earlier attempts.
    pub errors: &'a [String],
    pub snapshot: &'a str,
}

#[derive(Debug, Clone)]
pub struct ScaffoldPrompt<'a> {
    pub source_path: &'a str,
    pub source: &'a str,
    pub test_path: &'a str,
    pub import_path: &'a str,
    pub issue_text: Option<&'a str>,
}

/// One expected call in a generated test.
#[derive(Debug, Clone, Serialize)]
pub struct TestCase {
    pub args: String,
    pub expected: String,
    pub boundary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Export {
    pub name: String,
    /// Declared as a function in the module source.
    pub callable: bool,
    /// Known expectations; empty means only smoke checks are generated.
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone)]
pub struct TestTemplate<'a> {
    pub source_path: &'a str,
    pub import_path: &'a str,
    pub esm: bool,
    pub exports: &'a [Export],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("repair_user", REPAIR_USER)
            .expect("repair template should be valid");
        env.add_template("scaffold_user", SCAFFOLD_USER)
            .expect("scaffold template should be valid");
        env.add_template("test_template", TEST_TEMPLATE)
            .expect("test template should be valid");
        Self { env }
    }

    pub fn repair_system(&self) -> &'static str {
        REPAIR_SYSTEM.trim_end()
    }

    pub fn scaffold_system(&self) -> &'static str {
        SCAFFOLD_SYSTEM.trim_end()
    }

    pub fn render_repair(&self, input: &RepairPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("repair_user")?;
        let rendered = template.render(context! {
            issue_id => input.issue_id,
            issue_title => input.issue_title.trim(),
            issue_text => input.issue_text.trim(),
            attempt => input.attempt,
            budget => input.budget,
            failure => input.failure.map(str::trim_end).filter(|s| !s.trim().is_empty()),
            errors => input.errors,
            snapshot => input.snapshot.trim_end(),
        })?;
        Ok(rendered)
    }

    pub fn render_scaffold(&self, input: &ScaffoldPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("scaffold_user")?;
        let rendered = template.render(context! {
            source_path => input.source_path,
            source => input.source.trim_end(),
            test_path => input.test_path,
            import_path => input.import_path,
            issue_text => input.issue_text.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn render_test_template(&self, input: &TestTemplate<'_>) -> Result<String> {
        let template = self.env.get_template("test_template")?;
        let mut rendered = template.render(context! {
            source_path => input.source_path,
            import_path => input.import_path,
            esm => input.esm,
            exports => input.exports,
        })?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}
