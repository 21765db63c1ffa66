#![cfg(unix)]
#![allow(deprecated)] // cargo_bin is deprecated but still supported by assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// Stand-in for the `llm` tool. Completions echo the model and prompt; grader
/// prompts get a JSON grade, F when the candidate came from `bad-model`.
const FAKE_LLM: &str = r#"#!/bin/sh
case "$1" in
  models) printf 'OpenAI Chat: gpt-4o-mini\nOpenAI Chat: gpt-4o (aliases: 4o)\nDefault: gpt-4o-mini\n'; exit 0;;
  embed) echo 'Error: embeddings disabled' >&2; exit 1;;
esac
prompt=$(cat)
case "$prompt" in
  *'answer from bad-model'*) echo '{"grade": "F", "feedback": "Wrong answer."}';;
  *'<candidate_response>'*) echo '{"grade": "B", "feedback": "Minor wording change."}';;
  *) echo "answer from $2: $prompt";;
esac
"#;

struct Workspace {
    dir: TempDir,
    llm: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let llm = dir.path().join("fake-llm");
        fs::write(&llm, FAKE_LLM).unwrap();
        fs::set_permissions(&llm, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, llm }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("promptolab").expect("promptolab binary");
        cmd.current_dir(self.dir.path())
            .env_remove("PROMPTOLAB_SETTINGS")
            .env_remove("PROMPTOLAB_BACKEND")
            .env_remove("PROMPTOLAB_MODEL")
            .env_remove("PROMPTOLAB_LLM_PROGRAM")
            .env("PROMPTOLAB_STORE_DIR", self.path("sets"))
            .env("RUST_LOG", "error");
        cmd
    }

    /// A subcommand wired to the fake `llm`.
    fn engine_cmd(&self, sub: &str, model: &str) -> Command {
        let mut cmd = self.cmd();
        cmd.arg(sub)
            .arg("--llm-program")
            .arg(&self.llm)
            .arg("--model")
            .arg(model);
        cmd
    }

    fn add_faq(&self) {
        self.cmd()
            .args(["sets", "add", "faq", "--input", "What is 2+2?", "--input", "Name a colour"])
            .assert()
            .success();
    }
}

fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_str(&text).expect("valid JSON")
}

#[test]
fn version_prints_package_version() {
    Workspace::new()
        .cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn baseline_then_eval_writes_reports_and_saves_outputs() {
    let ws = Workspace::new();
    ws.add_faq();

    ws.engine_cmd("baseline", "gpt-4o-mini")
        .args(["--test-set", "faq"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Baselines: 2 generated, 0 failed"));

    ws.cmd()
        .args(["sets", "show", "faq"])
        .assert()
        .success()
        .stdout(predicate::str::contains("answer from gpt-4o-mini: What is 2+2?"));

    let json = ws.path("report.json");
    let md = ws.path("report.md");
    ws.engine_cmd("eval", "gpt-4o")
        .args(["--test-set", "faq", "--report-json"])
        .arg(&json)
        .arg("--report-md")
        .arg(&md)
        .assert()
        .code(0)
        .stderr(predicate::str::contains("Summary: 2 passed, 0 regressed"));

    let report = read_json(&json);
    assert_eq!(report["metadata"]["model"], "gpt-4o");
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["grade"], "B");
        assert_eq!(row["status"], "completed");
        assert_eq!(row["similarity"]["method"], "lexical");
    }
    assert_eq!(rows[0]["input"], "What is 2+2?");
    assert_eq!(report["stats"]["grade_distribution"]["B"], 2);

    let markdown = fs::read_to_string(&md).unwrap();
    assert!(markdown.contains("gpt-4o"));
    assert!(markdown.contains("Minor wording change."));

    let stored = read_json(&ws.path("sets/faq.json"));
    assert_eq!(
        stored["test_cases"][0]["current_output"],
        "answer from gpt-4o: What is 2+2?"
    );
    assert_eq!(
        stored["test_cases"][0]["baseline_output"],
        "answer from gpt-4o-mini: What is 2+2?"
    );
}

#[test]
fn regression_exits_one_and_no_save_keeps_the_set() {
    let ws = Workspace::new();
    ws.add_faq();
    ws.engine_cmd("baseline", "gpt-4o-mini")
        .args(["--test-set", "faq"])
        .assert()
        .success();
    let before = fs::read_to_string(ws.path("sets/faq.json")).unwrap();

    ws.engine_cmd("eval", "bad-model")
        .args(["--test-set", "faq", "--no-save"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("0 passed, 2 regressed"));

    assert_eq!(fs::read_to_string(ws.path("sets/faq.json")).unwrap(), before);
}

#[test]
fn eval_without_baselines_is_not_a_regression() {
    let ws = Workspace::new();
    ws.add_faq();
    ws.engine_cmd("eval", "gpt-4o")
        .args(["--test-set", "faq"])
        .assert()
        .code(0);
    let stored = read_json(&ws.path("sets/faq.json"));
    assert_eq!(
        stored["test_cases"][1]["current_output"],
        "answer from gpt-4o: Name a colour"
    );
}

#[test]
fn models_lists_backend_models() {
    let ws = Workspace::new();
    ws.engine_cmd("models", "gpt-4o-mini")
        .assert()
        .success()
        .stdout("gpt-4o-mini\ngpt-4o\n");
}

#[test]
fn strict_models_rejects_unknown_model() {
    let ws = Workspace::new();
    ws.add_faq();
    ws.engine_cmd("baseline", "gpt-4o-mnii")
        .args(["--test-set", "faq", "--strict-models"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("did you mean 'gpt-4o-mini'"));
}

#[test]
fn missing_test_set_is_a_storage_error() {
    let ws = Workspace::new();
    ws.engine_cmd("eval", "gpt-4o")
        .args(["--test-set", "nope"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("test set 'nope' not found"));
}

#[test]
fn sets_list_and_delete() {
    let ws = Workspace::new();
    ws.add_faq();
    ws.cmd()
        .args(["sets", "list"])
        .assert()
        .success()
        .stdout("faq\n");
    ws.cmd().args(["sets", "delete", "faq"]).assert().success();
    ws.cmd()
        .args(["sets", "delete", "faq"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn sets_add_without_inputs_fails() {
    Workspace::new()
        .cmd()
        .args(["sets", "add", "faq"])
        .assert()
        .code(2);
}

#[test]
fn init_writes_settings_once() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["init", "--model", "gpt-4o", "--concurrency", "2"])
        .assert()
        .success();
    let yaml = fs::read_to_string(ws.path("promptolab.yaml")).unwrap();
    assert!(yaml.lines().any(|l| l == "model: gpt-4o"));
    assert!(yaml.contains("concurrency: 2"));

    ws.cmd()
        .args(["init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
    ws.cmd().args(["init", "--force"]).assert().success();
    let yaml = fs::read_to_string(ws.path("promptolab.yaml")).unwrap();
    assert!(yaml.lines().any(|l| l == "model: gpt-4o-mini"));

    // The written file is accepted by every other command.
    ws.add_faq();
}
