//! Test scaffolding: every source unit gets a test unit before any fix runs.
//!
//! Source units are files under `scaffold.source_dir` with the configured
//! extension. `src/a/b.js` maps to `tests/a/b.test.js`. Existing test files
//! are never touched, so rerunning on a fully tested tree writes nothing.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Issue;
use crate::error::FixError;
use crate::io::config::{ModelConfig, ScaffoldConfig, ScaffoldMode};
use crate::io::llm::{GenerationRequest, TextGenerator, Turn};
use crate::io::prompt::{Export, PromptEngine, ScaffoldPrompt, TestCase, TestTemplate};
use crate::io::workspace::Workspace;

const IDENT: &str = r"[A-Za-z_$][\w$]*";

static ESM_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*export[ \t]+(?:async[ \t]+)?(?P<kind>function\*?|const|let|var|class)[ \t]*\*?[ \t]*(?P<name>{IDENT})"
    ))
    .expect("export declaration regex should be valid")
});

static ESM_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*export[ \t]*\{(?P<names>[^}]*)\}")
        .expect("export list regex should be valid")
});

static CJS_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"module\.exports[ \t]*=[ \t]*\{(?P<names>[^}]*)\}")
        .expect("module.exports regex should be valid")
});

static CJS_PROPERTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?m)^[ \t]*(?:module\.)?exports\.(?P<name>{IDENT})[ \t]*=[ \t]*(?P<value>[^\r\n]*)"
    ))
    .expect("exports property regex should be valid")
});

static ESM_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export|import)[ \t{*]").expect("esm marker regex should be valid")
});

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```[A-Za-z0-9_-]*[ \t]*\r?\n(?P<body>.*?)^[ \t]*```[ \t]*$")
        .expect("code fence regex should be valid")
});

/// A line only a JavaScript test file would start with.
static TEST_CODE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:import[ \t{*'"]|(?:const|let|var)[ \t].*\brequire\(|require\(|(?:test|describe|it)(?:\.\w+)?\(|['"]use strict['"])"#,
    )
    .expect("test code line regex should be valid")
});

/// A source file and the test file that should cover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub source: String,
    pub test: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaffoldReport {
    /// Test files created by this run.
    pub written: Vec<String>,
    /// Source units that already had a test file.
    pub skipped: Vec<String>,
}

/// Every source unit in the workspace, in path order.
pub fn source_units(ws: &Workspace, cfg: &ScaffoldConfig) -> Vec<SourceUnit> {
    let source_prefix = dir_prefix(&cfg.source_dir);
    let test_prefix = dir_prefix(&cfg.test_dir);
    let dotted_ext = format!(".{}", cfg.extension);
    let test_tail = format!("{}{}", cfg.test_suffix, dotted_ext);

    ws.known_files()
        .filter(|path| path.starts_with(&source_prefix) && path.ends_with(&dotted_ext))
        .filter(|path| !path.ends_with(&test_tail))
        .filter(|path| test_prefix.is_empty() || !path.starts_with(&test_prefix))
        .map(|path| {
            let inner = &path[source_prefix.len()..path.len() - dotted_ext.len()];
            SourceUnit {
                source: path.to_string(),
                test: format!("{test_prefix}{inner}{test_tail}"),
            }
        })
        .collect()
}

/// Source units whose test file does not exist yet.
pub fn missing_tests(ws: &Workspace, cfg: &ScaffoldConfig) -> Vec<SourceUnit> {
    source_units(ws, cfg)
        .into_iter()
        .filter(|unit| !ws.contains(&unit.test))
        .collect()
}

/// Create a test file for every source unit that lacks one.
///
/// In model mode `generator` must be present. A response without usable test
/// code fails with [`FixError::Parse`] carrying the raw response.
#[instrument(skip_all, fields(mode = ?cfg.mode))]
pub fn scaffold_tests(
    ws: &mut Workspace,
    issue: Option<&Issue>,
    cfg: &ScaffoldConfig,
    model: &ModelConfig,
    generator: Option<&dyn TextGenerator>,
) -> Result<ScaffoldReport> {
    let engine = PromptEngine::new();
    let issue_text = issue.map(Issue::text);
    let mut report = ScaffoldReport::default();

    for unit in source_units(ws, cfg) {
        if ws.contains(&unit.test) {
            debug!(source = %unit.source, test = %unit.test, "test already present");
            report.skipped.push(unit.source);
            continue;
        }

        let source = ws.read(&unit.source)?;
        let import_path = relative_import(&unit.test, &unit.source);
        let content = match cfg.mode {
            ScaffoldMode::Template => template_test(&engine, &unit, &import_path, &source)?,
            ScaffoldMode::Model => {
                let generator = generator.ok_or_else(|| {
                    FixError::config("scaffold.mode = \"model\" requires a model client")
                })?;
                let prompt = ScaffoldPrompt {
                    source_path: &unit.source,
                    source: &source,
                    test_path: &unit.test,
                    import_path: &import_path,
                    issue_text: issue_text.as_deref(),
                };
                generated_test(&engine, generator, model, &prompt)?
            }
        };

        if ws.create_new(&unit.test, &content)? {
            info!(source = %unit.source, test = %unit.test, "wrote test");
            report.written.push(unit.test);
        } else {
            warn!(test = %unit.test, "test appeared while scaffolding, leaving it alone");
            report.skipped.push(unit.source);
        }
    }

    Ok(report)
}

fn template_test(
    engine: &PromptEngine,
    unit: &SourceUnit,
    import_path: &str,
    source: &str,
) -> Result<String> {
    let exports = extract_exports(source);
    if exports.is_empty() {
        warn!(source = %unit.source, "no exports found, generating a load-only test");
    }
    engine
        .render_test_template(&TestTemplate {
            source_path: &unit.source,
            import_path,
            esm: ESM_MARKER_RE.is_match(source),
            exports: &exports,
        })
        .with_context(|| format!("render test template for {}", unit.source))
}

fn generated_test(
    engine: &PromptEngine,
    generator: &dyn TextGenerator,
    model: &ModelConfig,
    prompt: &ScaffoldPrompt<'_>,
) -> Result<String> {
    let request = GenerationRequest {
        system: engine.scaffold_system().to_string(),
        turns: vec![Turn::user(engine.render_scaffold(prompt)?)],
        model: model.model.clone(),
        max_tokens: model.max_tokens,
    };
    let raw = generator
        .generate(&request)
        .with_context(|| format!("generate test for {}", prompt.source_path))?;
    Ok(extract_test_code(&raw)?)
}

/// Test code from a model response: the first fenced block, or the whole
/// response when it has no fence but plainly is test code (an import,
/// `require` or `test(` line). Prose fails with [`FixError::Parse`].
pub fn extract_test_code(raw: &str) -> Result<String, FixError> {
    let code = match CODE_FENCE_RE.captures(raw).and_then(|caps| caps.name("body")) {
        Some(body) => body.as_str(),
        None if TEST_CODE_LINE_RE.is_match(raw) => raw,
        None => return Err(FixError::parse("response contains no fenced test code", raw)),
    };
    let code = code.trim();
    if code.is_empty() {
        return Err(FixError::parse("response contains no test code", raw));
    }
    Ok(format!("{code}\n"))
}

/// Exported bindings in declaration order, without duplicates.
pub fn extract_exports(source: &str) -> Vec<Export> {
    let mut names: Vec<(String, Option<bool>)> = Vec::new();
    let mut push = |name: &str, callable: Option<bool>| {
        if !name.is_empty() && !names.iter().any(|(n, _)| n == name) {
            names.push((name.to_string(), callable));
        }
    };

    for caps in ESM_DECL_RE.captures_iter(source) {
        let callable = caps["kind"].starts_with("function").then_some(true);
        push(&caps["name"], callable);
    }
    for caps in ESM_LIST_RE.captures_iter(source) {
        for entry in caps["names"].split(',') {
            // `a as b` exports `b`, bound to local `a`.
            let mut words = entry.split_whitespace();
            let local = words.next().unwrap_or_default();
            let name = words.last().unwrap_or(local);
            push(name, Some(declares_function(source, local)));
        }
    }
    for caps in CJS_OBJECT_RE.captures_iter(source) {
        for entry in caps["names"].split(',') {
            let name = entry.split(':').next().unwrap_or_default().trim();
            push(name, None);
        }
    }
    for caps in CJS_PROPERTY_RE.captures_iter(source) {
        let value = caps["value"].trim_start();
        let callable = (value.starts_with("function")
            || value.starts_with("async")
            || value.starts_with('(')
            || value.contains("=>"))
        .then_some(true);
        push(&caps["name"], callable);
    }

    names
        .into_iter()
        .filter(|(name, _)| is_identifier(name))
        .map(|(name, callable)| {
            let callable = callable.unwrap_or_else(|| declares_function(source, &name));
            let cases = if callable { known_cases(&name) } else { Vec::new() };
            Export {
                name,
                callable,
                cases,
            }
        })
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// True when `name` is bound to a function somewhere in `source`.
fn declares_function(source: &str, name: &str) -> bool {
    let name = regex::escape(name);
    let pattern = format!(
        r"(?m)(?:\bfunction\*?[ \t]*{name}[ \t]*\(|\b{name}[ \t]*=[ \t]*(?:async[ \t]+)?(?:function\b|\([^)]*\)[ \t]*=>|[A-Za-z_$][\w$]*[ \t]*=>))"
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}

/// Expectations for arithmetic helpers whose behavior is known in advance.
fn known_cases(name: &str) -> Vec<TestCase> {
    let table: &[(&str, &str, bool)] = match name {
        "add" | "sum" => &[
            ("2, 3", "5", false),
            ("10, 32", "42", false),
            ("0, 0", "0", true),
            ("-1, 1", "0", true),
            ("Number.MAX_SAFE_INTEGER - 1, 1", "Number.MAX_SAFE_INTEGER", true),
        ],
        "subtract" | "sub" => &[
            ("5, 3", "2", false),
            ("3, 5", "-2", false),
            ("0, 0", "0", true),
            ("-1, -1", "0", true),
        ],
        "multiply" | "mul" => &[
            ("2, 3", "6", false),
            ("-2, 3", "-6", false),
            ("0, 5", "0", true),
            ("1, Number.MAX_SAFE_INTEGER", "Number.MAX_SAFE_INTEGER", true),
        ],
        _ => &[],
    };
    table
        .iter()
        .map(|(args, expected, boundary)| TestCase {
            args: (*args).to_string(),
            expected: (*expected).to_string(),
            boundary: *boundary,
        })
        .collect()
}

/// Import specifier from the test file to the source file.
fn relative_import(test: &str, source: &str) -> String {
    let test_dir: Vec<&str> = Path::new(test)
        .parent()
        .map(|p| p.iter().filter_map(|c| c.to_str()).collect())
        .unwrap_or_default();
    let source_parts: Vec<&str> = source.split('/').collect();

    let common = test_dir
        .iter()
        .zip(&source_parts)
        .take_while(|(a, b)| a == b)
        .count()
        .min(source_parts.len().saturating_sub(1));
    let ups = test_dir.len() - common;
    let rest = source_parts[common..].join("/");
    if ups == 0 {
        format!("./{rest}")
    } else {
        format!("{}{rest}", "../".repeat(ups))
    }
}

fn dir_prefix(dir: &str) -> String {
    let trimmed = dir.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
