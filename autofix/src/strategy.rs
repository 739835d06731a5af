//! Patch strategies.
//!
//! A strategy turns the issue (and, for model repair, the newest failing test
//! output) into file changes in the workspace. Strategies run in plan order:
//! the deterministic signature fix first, model repair after it.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::diff::apply_hunks;
use crate::core::heuristic::{Rewrite, SignatureRule, rewrite_signature};
use crate::core::model_output::{ModelPatch, parse_model_output};
use crate::core::snapshot::{build_snapshot, truncate_tail};
use crate::core::types::{Issue, StrategyKind};
use crate::error::FixError;
use crate::io::config::AutofixConfig;
use crate::io::llm::{GenerationRequest, TextGenerator, Turn};
use crate::io::prompt::{PromptEngine, RepairPrompt};
use crate::io::workspace::{Workspace, normalize_rel};

/// What a strategy did to the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchReport {
    /// Files rewritten (relative path -> full new content).
    Changed(BTreeMap<String, String>),
    /// Nothing to change. Not an error: the loop moves to the next strategy.
    Unchanged,
}

/// What a strategy sees of the run so far.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub issue: &'a Issue,
    pub ordinal: u32,
    pub budget: u32,
    /// Output of the most recent failing test run.
    pub last_failure: Option<&'a str>,
    /// Parse/apply problems of earlier attempts, oldest first.
    pub prior_errors: &'a [String],
}

pub struct StrategyOutput {
    /// Raw model response, when a model was called.
    pub response: Option<String>,
    pub result: Result<PatchReport>,
}

/// Deterministic fix for one known bug signature in one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFix {
    pub file: String,
    pub rule: SignatureRule,
}

/// Model-backed repair settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRepair {
    pub model: String,
    pub max_tokens: u32,
    pub snapshot_budget_bytes: usize,
    pub failure_budget_bytes: usize,
    pub include_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchStrategy {
    Heuristic(SignatureFix),
    Model(ModelRepair),
}

/// One heuristic attempt followed by `attempt_budget - 1` model attempts.
pub fn default_plan(cfg: &AutofixConfig) -> Vec<PatchStrategy> {
    let mut plan = vec![PatchStrategy::Heuristic(SignatureFix {
        file: cfg.heuristic.file.clone(),
        rule: cfg.heuristic.rule(),
    })];
    let repair = ModelRepair {
        model: cfg.model.model.clone(),
        max_tokens: cfg.model.max_tokens,
        snapshot_budget_bytes: cfg.model.snapshot_budget_bytes,
        failure_budget_bytes: cfg.model.failure_budget_bytes,
        include_extensions: cfg.snapshot.include_extensions.clone(),
    };
    for _ in 0..cfg.model_attempts() {
        plan.push(PatchStrategy::Model(repair.clone()));
    }
    plan
}

impl PatchStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            PatchStrategy::Heuristic(_) => StrategyKind::Heuristic,
            PatchStrategy::Model(_) => StrategyKind::Model,
        }
    }

    /// Produce and write this strategy's changes.
    ///
    /// Any write happens only after the whole patch has been computed, so a
    /// failed result leaves the workspace as it was.
    pub fn apply(
        &self,
        ctx: &AttemptContext<'_>,
        ws: &mut Workspace,
        generator: Option<&dyn TextGenerator>,
    ) -> StrategyOutput {
        match self {
            PatchStrategy::Heuristic(fix) => StrategyOutput {
                response: None,
                result: fix.apply(ws),
            },
            PatchStrategy::Model(repair) => {
                let mut response = None;
                let result = repair.apply(ctx, ws, generator, &mut response);
                StrategyOutput { response, result }
            }
        }
    }
}

impl SignatureFix {
    #[instrument(skip_all, fields(file = %self.file))]
    fn apply(&self, ws: &mut Workspace) -> Result<PatchReport> {
        if !ws.contains(&self.file) {
            return Err(FixError::config(format!(
                "heuristic.file {} does not exist in the workspace",
                self.file
            ))
            .into());
        }
        let content = ws.read(&self.file)?;
        match rewrite_signature(&content, &self.rule) {
            Rewrite::Changed { content, lines } => {
                let mut changes = BTreeMap::new();
                changes.insert(self.file.clone(), content);
                ws.write_changes(&changes)?;
                info!(?lines, "heuristic rewrote signature");
                Ok(PatchReport::Changed(changes))
            }
            Rewrite::Unchanged => {
                info!("heuristic signature not found, escalating");
                Ok(PatchReport::Unchanged)
            }
        }
    }
}

impl ModelRepair {
    #[instrument(skip_all, fields(attempt = ctx.ordinal))]
    fn apply(
        &self,
        ctx: &AttemptContext<'_>,
        ws: &mut Workspace,
        generator: Option<&dyn TextGenerator>,
        response: &mut Option<String>,
    ) -> Result<PatchReport> {
        let generator = generator
            .ok_or_else(|| FixError::config("model repair requires a model client"))?;
        let request = self.request(ctx, ws)?;
        let raw = generator.generate(&request).context("model repair request")?;
        *response = Some(raw.clone());

        let changes = match parse_model_output(&raw)? {
            ModelPatch::FullFiles(blocks) => {
                let mut changes = BTreeMap::new();
                for block in blocks {
                    match normalize_rel(&block.path).filter(|p| ws.contains(p)) {
                        Some(path) => {
                            if changes.insert(path.clone(), block.content).is_some() {
                                debug!(%path, "later block replaces earlier block");
                            }
                        }
                        None => warn!(path = %block.path, "skipping block for unknown path"),
                    }
                }
                changes
            }
            ModelPatch::Diff(patches) => {
                let mut changes: BTreeMap<String, String> = BTreeMap::new();
                for patch in patches {
                    let path = normalize_rel(&patch.path)
                        .filter(|p| ws.contains(p))
                        .ok_or_else(|| {
                            FixError::apply(&patch.path, "path is not part of the workspace")
                        })?;
                    let current = match changes.entry(path.clone()) {
                        Entry::Occupied(entry) => entry.remove(),
                        Entry::Vacant(_) => ws.read(&path)?,
                    };
                    let updated = apply_hunks(&current, &patch.hunks)
                        .map_err(|err| FixError::apply(&path, err.to_string()))?;
                    changes.insert(path, updated);
                }
                changes
            }
        };

        let mut effective = BTreeMap::new();
        for (path, content) in changes {
            if ws.read(&path)? == content {
                debug!(%path, "content identical, not rewriting");
                continue;
            }
            effective.insert(path, content);
        }
        if effective.is_empty() {
            info!("model response changed nothing");
            return Ok(PatchReport::Unchanged);
        }
        ws.write_changes(&effective)?;
        info!(files = ?effective.keys().collect::<Vec<_>>(), "model repair applied");
        Ok(PatchReport::Changed(effective))
    }

    fn request(&self, ctx: &AttemptContext<'_>, ws: &Workspace) -> Result<GenerationRequest> {
        let issue_text = ctx.issue.text();
        let files = ws.snapshot_files(&self.include_extensions)?;
        let snapshot = build_snapshot(&files, &issue_text, self.snapshot_budget_bytes);
        let failure = ctx
            .last_failure
            .map(|out| truncate_tail(out, self.failure_budget_bytes));

        let engine = PromptEngine::new();
        let user = engine.render_repair(&RepairPrompt {
            issue_id: ctx.issue.id.as_str(),
            issue_title: &ctx.issue.title,
            issue_text: &issue_text,
            attempt: ctx.ordinal,
            budget: ctx.budget,
            failure: failure.as_deref(),
            errors: ctx.prior_errors,
            snapshot: &snapshot.text,
        })?;
        debug!(
            snapshot_files = snapshot.included.len(),
            omitted = snapshot.omitted.len(),
            prompt_bytes = user.len(),
            "built repair prompt"
        );
        Ok(GenerationRequest {
            system: engine.repair_system().to_string(),
            turns: vec![Turn::user(user)],
            model: self.model.clone(),
            max_tokens: self.max_tokens,
        })
    }
}
