//! Configuration stored in `.autofix.toml` at the repository root.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::heuristic::SignatureRule;
use crate::error::FixError;

pub const CONFIG_FILE: &str = ".autofix.toml";

/// Autofix configuration (TOML).
///
/// Intended to be edited by humans. Missing fields and tables fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutofixConfig {
    /// Total attempts: one heuristic attempt followed by model attempts.
    pub attempt_budget: u32,

    /// Label that marks issues eligible for automatic repair.
    pub trigger_label: String,

    /// Branch for issue `N` is `<branch_prefix>N`.
    pub branch_prefix: String,

    /// Branch pull requests target.
    pub base_branch: String,

    /// Remote to push the fix branch to.
    pub remote: String,

    pub tests: TestsConfig,
    pub model: ModelConfig,
    pub scaffold: ScaffoldConfig,
    pub heuristic: HeuristicConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test command (e.g. `["npm", "test"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Captured test output beyond this many bytes (per stream) is dropped.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub provider_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Repository text included in repair prompts.
    pub snapshot_budget_bytes: usize,
    /// Tail of the failing test output included in repair prompts.
    pub failure_budget_bytes: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScaffoldMode {
    /// Fixed template per source unit.
    Template,
    /// Ask the model to write the test from the unit's source.
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScaffoldConfig {
    pub mode: ScaffoldMode,
    pub source_dir: String,
    pub test_dir: String,
    /// Source file extension without the dot.
    pub extension: String,
    /// `src/math.js` -> `tests/math<suffix>.js`.
    pub test_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeuristicConfig {
    /// The single file the heuristic may touch.
    pub file: String,
    /// Literal text identifying the function declaration line.
    pub signature: String,
    /// Literal buggy expression expected inside the body.
    pub find: String,
    pub replace: String,
}

impl HeuristicConfig {
    pub fn rule(&self) -> SignatureRule {
        SignatureRule {
            signature: self.signature.clone(),
            find: self.find.clone(),
            replace: self.replace.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Only files with these extensions are shown to the model.
    pub include_extensions: Vec<String>,
    /// Directories never scanned (in addition to `.git` and `.autofix`).
    pub exclude_dirs: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["npm".to_string(), "test".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_secs: 120,
            snapshot_budget_bytes: 60_000,
            failure_budget_bytes: 20_000,
        }
    }
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            mode: ScaffoldMode::Template,
            source_dir: "src".to_string(),
            test_dir: "tests".to_string(),
            extension: "js".to_string(),
            test_suffix: ".test".to_string(),
        }
    }
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            file: "src/math.js".to_string(),
            signature: "export function add(a, b)".to_string(),
            find: "a - b".to_string(),
            replace: "a + b".to_string(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            include_extensions: ["js", "mjs", "cjs", "ts", "json", "md"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_dirs: ["node_modules", "target", "dist", "coverage"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            attempt_budget: 3,
            trigger_label: "autofix".to_string(),
            branch_prefix: "autofix/issue-".to_string(),
            base_branch: "main".to_string(),
            remote: "origin".to_string(),
            tests: TestsConfig::default(),
            model: ModelConfig::default(),
            scaffold: ScaffoldConfig::default(),
            heuristic: HeuristicConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl AutofixConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempt_budget == 0 {
            return invalid("attempt_budget must be > 0");
        }
        if self.trigger_label.trim().is_empty() {
            return invalid("trigger_label must not be empty");
        }
        if self.branch_prefix.trim().is_empty() {
            return invalid("branch_prefix must not be empty");
        }
        if self.tests.command.is_empty() || self.tests.command[0].trim().is_empty() {
            return invalid("tests.command must be a non-empty array");
        }
        if self.tests.timeout_secs == 0 {
            return invalid("tests.timeout_secs must be > 0");
        }
        if self.tests.output_limit_bytes == 0 {
            return invalid("tests.output_limit_bytes must be > 0");
        }
        if self.model.timeout_secs == 0 {
            return invalid("model.timeout_secs must be > 0");
        }
        if self.model.max_tokens == 0 {
            return invalid("model.max_tokens must be > 0");
        }
        if self.model.api_key_env.trim().is_empty() {
            return invalid("model.api_key_env must not be empty");
        }
        if self.scaffold.extension.trim().is_empty() {
            return invalid("scaffold.extension must not be empty");
        }
        if self.scaffold.test_suffix.trim().is_empty() {
            return invalid("scaffold.test_suffix must not be empty");
        }
        if self.heuristic.file.trim().is_empty() {
            return invalid("heuristic.file must not be empty");
        }
        if self.heuristic.signature.is_empty() || self.heuristic.find.is_empty() {
            return invalid("heuristic.signature and heuristic.find must not be empty");
        }
        Ok(())
    }

    /// Number of model-backed attempts after the heuristic one.
    pub fn model_attempts(&self) -> u32 {
        self.attempt_budget.saturating_sub(1)
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(FixError::config(message).into())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutofixConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutofixConfig> {
    if !path.exists() {
        let cfg = AutofixConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutofixConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AutofixConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
