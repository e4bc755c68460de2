//! End-to-end scenarios exercising the full session façade: adapter,
//! orchestrator, sandbox/DSL, and the handle/binding data model wired
//! together exactly as the CLI wires them.

use async_trait::async_trait;
use rlm::adapter::{JsAdapter, LispAdapter, SynthesisFirstJsAdapter};
use rlm::llm_client::{LlmClient, LlmError};
use rlm::orchestrator::{LoopOutcome, Orchestrator, TurnLoopConfig};
use rlm::sandbox::SandboxConfig;
use rlm::session::Session;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct ScriptedLlm {
    replies: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        replies
            .pop()
            .ok_or_else(|| LlmError::ApiError("scripted replies exhausted".to_string()))
    }
}

const ACCESS_LOG: &str = "2024-01-01T00:00:01 ERROR db timeout on host a\n\
2024-01-01T00:00:02 INFO request served host b\n\
2024-01-01T00:00:03 ERROR db timeout on host a\n\
2024-01-01T00:00:04 WARN retrying host c\n\
2024-01-01T00:00:05 ERROR connection refused host a\n\
2024-01-01T00:00:06 INFO request served host b";

/// Scenario 1: grep the error lines, count them, return the count.
#[tokio::test]
async fn scenario_grep_and_count_errors() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "```javascript\nconsole.log(grep('ERROR').length)\n```",
        "<<<FINAL>>>3<<<END>>>",
    ]));
    let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 5 });
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("how many error lines are there?", &mut session).await.unwrap();
    assert_eq!(outcome, LoopOutcome::Final("3".to_string()));
}

/// Scenario 2: chain a grep into a filter, returning the surviving
/// handle's full text rather than a literal final answer.
#[tokio::test]
async fn scenario_chained_filter_resolves_through_final_var() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "```javascript\nconsole.log(JSON.stringify(grep('host a')));\n```",
        "FINAL_VAR(RESULTS)",
    ]));
    let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 5 });
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("which lines mention host a?", &mut session).await.unwrap();
    match outcome {
        LoopOutcome::Final(text) => {
            assert!(text.contains("db timeout on host a"));
            assert!(text.contains("connection refused host a"));
            assert!(!text.contains("host b"));
        }
        other => panic!("expected Final, got {other:?}"),
    }
}

/// Scenario 3: numeric extraction via the Lisp/DSL adapter, parsing a
/// field out of a matched line.
#[tokio::test]
async fn scenario_numeric_extraction_via_dsl() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        r#"```lisp
(parseInt (match "retry attempt 5 for host c" "[0-9]+" 0))
```"#,
        "FINAL_VAR(_1)",
    ]));
    let orchestrator = Orchestrator::new(Box::new(LispAdapter), llm, TurnLoopConfig { max_turns: 5 });
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("what retry count is logged?", &mut session).await.unwrap();
    match outcome {
        LoopOutcome::Final(text) => assert_eq!(text, "5"),
        other => panic!("expected Final, got {other:?}"),
    }
}

/// Scenario 4: a fragment that tries to escape the sandbox is rejected
/// before execution, and the loop recovers on the next turn.
#[tokio::test]
async fn scenario_predicate_safety_rejects_host_escape() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "```javascript\nrequire('fs').readFileSync('/etc/passwd')\n```",
        "<<<FINAL>>>blocked<<<END>>>",
    ]));
    let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 5 });
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("try to escape", &mut session).await.unwrap();
    assert_eq!(outcome, LoopOutcome::Final("blocked".to_string()));
    assert!(session.bindings.get("RESULTS").is_none());
}

/// Scenario 5: the synthesis-first adapter forces use of
/// `synthesize_extractor`/`synthesize_regex` instead of raw string methods.
#[tokio::test]
async fn scenario_synthesis_first_bans_raw_string_methods() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "```javascript\nconsole.log('x'.split(' '))\n```",
        "```javascript\nconsole.log(synthesize_regex([{input:'a=1', output:'1'}]))\n```",
        "<<<FINAL>>>done<<<END>>>",
    ]));
    let orchestrator = Orchestrator::new(
        Box::new(SynthesisFirstJsAdapter),
        llm.clone(),
        TurnLoopConfig { max_turns: 5 },
    );
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("extract a value", &mut session).await.unwrap();
    assert_eq!(outcome, LoopOutcome::Final("done".to_string()));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
}

/// Scenario 6: the loop is capped at max_turns and surfaces the last
/// bindings snapshot rather than hanging indefinitely.
#[tokio::test]
async fn scenario_turn_bound_caps_an_unproductive_session() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        "```javascript\nconsole.log(1)\n```",
        "```javascript\nconsole.log(2)\n```",
    ]));
    let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 2 });
    let mut session = Session::new(SandboxConfig::default());
    session.load(ACCESS_LOG);

    let outcome = orchestrator.run("never converges", &mut session).await.unwrap();
    assert!(matches!(outcome, LoopOutcome::MaxTurnsReached(_)));
}
