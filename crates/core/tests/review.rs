//! End-to-end review flow: context assembly, finding parsing, line-span
//! recovery, and the optional validation pass, all against the mock gateway.

mod helpers;

use falconeye_core::indexer::IndexCommand;
use falconeye_core::review::{ReviewCommand, Reviewer};
use falconeye_core::types::{CancelToken, Confidence, Severity};
use helpers::{test_indexer, MockGateway};
use std::path::PathBuf;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "Respond with JSON only.";

fn review_command(file: PathBuf, validate: bool) -> ReviewCommand {
    ReviewCommand {
        file_path: file,
        language: "python".into(),
        system_prompt: SYSTEM_PROMPT.into(),
        validate_findings: validate,
        top_k_context: 5,
    }
}

#[tokio::test]
async fn review_parses_fenced_response_and_recovers_lines() {
    let project = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let target = project.path().join("t.py");
    std::fs::write(&target, "def f(x):\n    return eval(x)\n    # end\n").unwrap();

    let response = "Here are the findings:\n```json\n{\"reviews\":[{\"issue\":\"X\",\
\"severity\":\"high\",\"confidence\":0.9,\"code_snippet\":\"    return eval(x)\"}]}\n```\nHope this helps.";
    let gateway = Arc::new(MockGateway::with_analysis(response));
    let indexer = test_indexer(data.path(), Arc::clone(&gateway));

    let reviewer = Reviewer::new(indexer.assembler_for("demo"), gateway);
    let review =
        reviewer.review_file(&review_command(target, false), &CancelToken::new()).await.unwrap();

    assert_eq!(review.files_analyzed, 1);
    assert!(review.completed_at.is_some());
    assert_eq!(review.findings.len(), 1);

    let finding = &review.findings[0];
    assert_eq!(finding.issue, "X");
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.confidence, Confidence::High);
    assert_eq!(finding.line_start, Some(2));
    assert_eq!(finding.line_end, Some(2));
    // The expanded snippet shows every surrounding line, marking line 2.
    assert!(finding.code_snippet.contains("   1 | def f(x):"));
    assert!(finding.code_snippet.contains("   2 >     return eval(x)"));
    assert!(finding.code_snippet.contains("   3 |     # end"));
}

#[tokio::test]
async fn undecodable_response_completes_with_no_findings() {
    let project = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let target = project.path().join("t.py");
    std::fs::write(&target, "print('ok')\n").unwrap();

    let gateway = Arc::new(MockGateway::with_analysis("I could not find anything noteworthy."));
    let indexer = test_indexer(data.path(), Arc::clone(&gateway));

    let reviewer = Reviewer::new(indexer.assembler_for("demo"), gateway);
    let review =
        reviewer.review_file(&review_command(target, false), &CancelToken::new()).await.unwrap();

    assert!(review.findings.is_empty());
    assert!(review.completed_at.is_some());
}

#[tokio::test]
async fn validation_pass_replaces_findings() {
    let project = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let target = project.path().join("t.py");
    std::fs::write(&target, "import pickle\npickle.loads(data)\n").unwrap();

    let gateway = Arc::new(MockGateway::with_analysis(
        r#"{"reviews":[{"issue":"Deserialization","severity":"high","confidence":0.9},
                       {"issue":"False alarm","severity":"low","confidence":0.4}]}"#,
    ));
    *gateway.validation_response.lock().unwrap() =
        r#"{"reviews":[{"issue":"Deserialization","severity":"high","confidence":0.9}]}"#.into();

    let indexer = test_indexer(data.path(), Arc::clone(&gateway));
    let reviewer = Reviewer::new(indexer.assembler_for("demo"), gateway);
    let review =
        reviewer.review_file(&review_command(target, true), &CancelToken::new()).await.unwrap();

    assert_eq!(review.findings.len(), 1);
    assert_eq!(review.findings[0].issue, "Deserialization");
}

#[tokio::test]
async fn codebase_review_aggregates_findings_across_files() {
    let project = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("a.py"), "eval(input())\n").unwrap();
    std::fs::write(project.path().join("b.py"), "print('fine')\n").unwrap();

    // The same canned response for every file: one finding each.
    let gateway = Arc::new(MockGateway::with_analysis(
        r#"{"reviews":[{"issue":"Something","severity":"medium","confidence":0.6}]}"#,
    ));
    let indexer = test_indexer(data.path(), Arc::clone(&gateway));
    let reviewer = Reviewer::new(indexer.assembler_for("demo"), gateway);

    let command = falconeye_core::ReviewCodebaseCommand {
        codebase_path: project.path().to_path_buf(),
        language: "python".into(),
        system_prompt: SYSTEM_PROMPT.into(),
        excluded_patterns: Vec::new(),
        validate_findings: false,
        top_k_context: 5,
    };
    let review = reviewer.review_codebase(&command, &CancelToken::new()).await.unwrap();

    assert_eq!(review.files_analyzed, 2);
    assert_eq!(review.findings.len(), 2);
    assert!(review.completed_at.is_some());
}

#[tokio::test]
async fn review_surfaces_related_code_from_the_index() {
    let project = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("db.py"), "def query(sql):\n    return run(sql)\n").unwrap();
    std::fs::write(project.path().join("api.py"), "def handle(q):\n    return query(q)\n").unwrap();

    let gateway = Arc::new(MockGateway::new());
    let indexer = test_indexer(data.path(), Arc::clone(&gateway));
    let command = IndexCommand::new(project.path().to_path_buf(), &helpers::test_config(data.path()));
    let report = indexer.index(&command, &CancelToken::new()).await.unwrap();

    let assembler = indexer.assembler_for(&report.project_id);
    let context = assembler
        .assemble("api.py", "def handle(q):\n    return query(q)\n", "python", 5, 3, None, "review")
        .await;

    // The target file itself is excluded from its own related-code block.
    let related = context.related_code.expect("related code present");
    assert!(related.contains("[Related Code 1] From db.py:"));
    assert!(!related.contains("From api.py"));
}
