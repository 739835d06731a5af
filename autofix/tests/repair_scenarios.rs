use autofix::error::FixError;
use autofix::io::config::{AutofixConfig, ScaffoldMode};
use autofix::io::git::VersionControl;
use autofix::io::github::PullRequests;
use autofix::io::llm::TextGenerator;
use autofix::io::test_runner::TestRunner;
use autofix::publish::PrStatus;
use autofix::run::{RunOptions, RunOutcome, Services, run_issue, run_scaffold};
use autofix::test_support::{
    ContentTestRunner, RecordingPulls, RecordingRepo, ScriptedGenerator, ScriptedTestRunner,
    StaticIssues, TempWorkspace, issue,
};

const BUGGY_ARROW: &str = "export const add = (a, b) => a - b;\n";
const FIXED_ARROW: &str = "export const add = (a, b) => a + b;\n";
const FAILING_OUTPUT: &str = "not ok 1 - add\n  AssertionError: expected 5, got -1\n";

fn services<'a>(
    issues: &'a StaticIssues,
    pulls: &'a dyn PullRequests,
    repo: &'a dyn VersionControl,
    tests: &'a dyn TestRunner,
    generator: &'a dyn TextGenerator,
) -> Services<'a> {
    Services {
        issues,
        prs: pulls,
        vcs: repo,
        tests,
        generator: Some(generator),
    }
}

fn succeeded(outcome: RunOutcome) -> (u32, usize, Option<autofix::publish::PublishOutcome>) {
    match outcome {
        RunOutcome::Succeeded {
            passing_attempt,
            attempts,
            publish,
            ..
        } => (passing_attempt, attempts, publish),
        other => panic!("expected success, got {other:?}"),
    }
}

#[test]
fn heuristic_fix_passes_first_and_skips_the_model() {
    let temp = TempWorkspace::with_files(&[(
        "src/math.js",
        "export function add(a, b) {\n  return a - b;\n}\n",
    )]);
    let issues = StaticIssues::new(vec![issue("12", "add() subtracts", None)]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ScriptedTestRunner::new(vec![(true, "# pass 1")]);
    let generator = ScriptedGenerator::new(Vec::<String>::new());

    let outcome = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &RunOptions::default(),
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .expect("run");

    let (passing, attempts, publish) = succeeded(outcome);
    assert_eq!((passing, attempts), (1, 1));
    assert_eq!(generator.calls(), 0);
    assert_eq!(tests.calls(), 1);
    assert!(temp.read("src/math.js").contains("return a + b;"));
    assert!(matches!(publish.expect("published").pr, PrStatus::Created(_)));
}

#[test]
fn model_repair_sees_failure_then_publishes_once() {
    let temp = TempWorkspace::with_files(&[("src/math.js", BUGGY_ARROW)]);
    let issues = StaticIssues::new(vec![issue("12", "add() subtracts", Some("2 + 3 gives -1"))]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ContentTestRunner::new(temp.root(), "src/math.js", "a + b", FAILING_OUTPUT);
    let generator = ScriptedGenerator::new(vec![format!(
        "=== FILE: src/math.js ===\n{FIXED_ARROW}=== END ===\n"
    )]);
    let cfg = AutofixConfig::default();

    let outcome = run_issue(
        temp.root(),
        &cfg,
        &RunOptions::default(),
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .expect("run");

    let (passing, attempts, publish) = succeeded(outcome);
    assert_eq!((passing, attempts), (2, 2));
    assert_eq!(temp.read("src/math.js"), FIXED_ARROW);
    assert!(temp.exists("tests/math.test.js"));

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].turns[0].content.contains("expected 5, got -1"));
    assert!(requests[0].turns[0].content.contains("2 + 3 gives -1"));

    assert_eq!(repo.commits(), 1);
    assert_eq!(repo.pushes(), 1);
    let created = pulls.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].head, "autofix/issue-12");
    assert!(created[0].body.starts_with("Closes #12"));
    assert_eq!(publish.expect("published").branch, "autofix/issue-12");

    assert!(temp.exists(".autofix/runs/12/1/meta.json"));
    assert!(temp.exists(".autofix/runs/12/2/response.txt"));
    assert_eq!(temp.read(".autofix/.gitignore"), "*\n");

    // A rerun finds the open pull request instead of opening another.
    let rerun_repo = RecordingRepo::new(false);
    let outcome = run_issue(
        temp.root(),
        &cfg,
        &RunOptions::default(),
        &services(&issues, &pulls, &rerun_repo, &tests, &generator),
    )
    .expect("rerun");
    let (passing, _, publish) = succeeded(outcome);
    assert_eq!(passing, 1);
    assert!(matches!(publish.expect("published").pr, PrStatus::Existing(_)));
    assert_eq!(pulls.created().len(), 1);
    assert_eq!(generator.calls(), 1);
    assert!(!temp.exists(".autofix/runs/12/2"));
}

#[test]
fn exhausted_budget_publishes_nothing_and_keeps_sources() {
    let temp = TempWorkspace::with_files(&[("src/math.js", BUGGY_ARROW)]);
    let issues = StaticIssues::new(vec![issue("5", "add() subtracts", None)]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ScriptedTestRunner::new(vec![
        (false, "failure one"),
        (false, "failure two"),
        (false, "failure three"),
    ]);
    let generator = ScriptedGenerator::new(vec![
        "The bug is probably in add.",
        "Try changing the operator.",
    ]);

    let err = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &RunOptions::default(),
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .unwrap_err();

    match err.downcast_ref::<FixError>() {
        Some(FixError::Exhausted {
            attempts,
            last_output,
        }) => {
            assert_eq!(*attempts, 3);
            assert_eq!(last_output, "failure three");
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(tests.calls(), 3);
    assert_eq!(generator.calls(), 2);
    assert_eq!(temp.read("src/math.js"), BUGGY_ARROW);
    assert!(repo.calls().is_empty());
    assert!(pulls.created().is_empty());
}

#[test]
fn blocks_for_unknown_paths_are_skipped() {
    let temp = TempWorkspace::with_files(&[("src/math.js", BUGGY_ARROW)]);
    let issues = StaticIssues::new(vec![issue("8", "add() subtracts", None)]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ContentTestRunner::new(temp.root(), "src/math.js", "a + b", FAILING_OUTPUT);
    let generator = ScriptedGenerator::new(vec![format!(
        "=== FILE: src/evil.js ===\nprocess.exit(0);\n=== END ===\n\
         === FILE: src/math.js ===\n{FIXED_ARROW}=== END ===\n"
    )]);

    let outcome = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &RunOptions::default(),
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .expect("run");

    let (passing, _, _) = succeeded(outcome);
    assert_eq!(passing, 2);
    assert!(!temp.exists("src/evil.js"));
    assert_eq!(temp.read("src/math.js"), FIXED_ARROW);
}

#[test]
fn dry_run_repairs_without_publishing() {
    let temp = TempWorkspace::with_files(&[(
        "src/math.js",
        "export function add(a, b) {\n  return a - b;\n}\n",
    )]);
    let issues = StaticIssues::new(vec![issue("3", "add() subtracts", None)]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ScriptedTestRunner::new(vec![(true, "ok")]);
    let generator = ScriptedGenerator::new(Vec::<String>::new());
    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };

    let outcome = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &options,
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .expect("run");

    let (_, _, publish) = succeeded(outcome);
    assert!(publish.is_none());
    assert!(repo.calls().is_empty());
    assert_eq!(pulls.lookups(), 0);
}

#[test]
fn no_labelled_issue_is_not_an_error() {
    let temp = TempWorkspace::with_files(&[("src/math.js", BUGGY_ARROW)]);
    let issues = StaticIssues::new(Vec::new());
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ScriptedTestRunner::new(Vec::<(bool, &str)>::new());
    let generator = ScriptedGenerator::new(Vec::<String>::new());
    let options = RunOptions {
        label: Some("bot-fix".to_string()),
        ..RunOptions::default()
    };

    let outcome = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &options,
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .expect("run");

    assert_eq!(
        outcome,
        RunOutcome::NoIssuesFound {
            label: "bot-fix".to_string()
        }
    );
    assert_eq!(tests.calls(), 0);
    assert!(!temp.exists("tests/math.test.js"));
}

#[test]
fn scaffolding_twice_writes_once() {
    let temp = TempWorkspace::with_files(&[
        ("src/math.js", FIXED_ARROW),
        ("src/util/strings.js", "export function shout(s) {\n  return s.toUpperCase();\n}\n"),
    ]);
    let cfg = AutofixConfig::default();

    let first = run_scaffold(temp.root(), &cfg, None).expect("scaffold");
    assert_eq!(
        first.written,
        vec!["tests/math.test.js", "tests/util/strings.test.js"]
    );
    let written = temp.read("tests/util/strings.test.js");
    assert!(written.contains("../../src/util/strings.js"));

    let second = run_scaffold(temp.root(), &cfg, None).expect("scaffold again");
    assert!(second.written.is_empty());
    assert_eq!(second.skipped, vec!["src/math.js", "src/util/strings.js"]);
    assert_eq!(temp.read("tests/util/strings.test.js"), written);
}

#[test]
fn model_scaffold_writes_fenced_code() {
    let temp = TempWorkspace::with_files(&[("src/math.js", FIXED_ARROW)]);
    let cfg = AutofixConfig {
        scaffold: autofix::io::config::ScaffoldConfig {
            mode: ScaffoldMode::Model,
            ..Default::default()
        },
        ..AutofixConfig::default()
    };
    let generator = ScriptedGenerator::new(vec![
        "Here is a test:\n```js\nimport { add } from '../src/math.js';\n```\n",
    ]);

    let report = run_scaffold(temp.root(), &cfg, Some(&generator)).expect("scaffold");
    assert_eq!(report.written, vec!["tests/math.test.js"]);
    assert_eq!(
        temp.read("tests/math.test.js").trim_end(),
        "import { add } from '../src/math.js';"
    );
    assert!(generator.requests()[0].turns[0].content.contains("src/math.js"));
}

#[test]
fn prose_scaffold_reply_surfaces_raw_response() {
    let temp = TempWorkspace::with_files(&[("src/math.js", FIXED_ARROW)]);
    let cfg = AutofixConfig {
        scaffold: autofix::io::config::ScaffoldConfig {
            mode: ScaffoldMode::Model,
            ..Default::default()
        },
        ..AutofixConfig::default()
    };
    let refusal = "I'm sorry, I cannot write tests for this module without more context.";
    let generator = ScriptedGenerator::new(vec![refusal]);

    let err = run_scaffold(temp.root(), &cfg, Some(&generator)).unwrap_err();
    match err.downcast_ref::<FixError>() {
        Some(FixError::Parse { raw, .. }) => assert_eq!(raw, refusal),
        other => panic!("expected a parse error, got {other:?}"),
    }
    assert!(!temp.exists("tests/math.test.js"));
}

#[test]
fn missing_heuristic_file_stops_before_any_test_run() {
    let temp = TempWorkspace::with_files(&[("lib/calc.js", BUGGY_ARROW)]);
    let issues = StaticIssues::new(vec![issue("4", "add() subtracts", None)]);
    let pulls = RecordingPulls::new(None);
    let repo = RecordingRepo::new(true);
    let tests = ScriptedTestRunner::new(vec![(false, "fail")]);
    let generator = ScriptedGenerator::new(Vec::<String>::new());

    let err = run_issue(
        temp.root(),
        &AutofixConfig::default(),
        &RunOptions::default(),
        &services(&issues, &pulls, &repo, &tests, &generator),
    )
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<FixError>(),
        Some(FixError::Config { .. })
    ));
    assert_eq!(tests.calls(), 0);
    assert_eq!(generator.calls(), 0);
    assert!(repo.calls().is_empty());
}
