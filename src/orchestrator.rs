//! Turn Loop: drives the adapter / LLM / executor cycle described in
//! spec §4.8. Composes an [`Adapter`], an [`LlmClient`], and a [`Session`]
//! with bounded retries, error feedback, and repetition breaking. The
//! loop itself holds no document or binding state — that lives in the
//! `Session` it is handed, so a host can inspect bindings mid-run or
//! resume a session across separate `run` calls.

use crate::adapter::{Adapter, FinalAnswer};
use crate::error::RlmError;
use crate::llm_client::LlmClient;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TurnLoopConfig {
    pub max_turns: u32,
}

impl Default for TurnLoopConfig {
    fn default() -> Self {
        Self { max_turns: 10 }
    }
}

/// How the loop ended. `MaxTurnsReached`/`NoProgress` carry the last
/// bindings snapshot per spec §4.8's output contract.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Final(String),
    MaxTurnsReached(HashMap<String, String>),
    NoProgress(HashMap<String, String>),
}

const JS_TOOLS: &str = "grep(pattern) -> [{match, line, lineNum, index}]; \
fuzzy_search(query) -> [{lineNum, content}]; locate_line(n) -> {lineNum, content} | null; \
synthesize_extractor(pairs) -> extractor program string | null; \
synthesize_regex(pairs) -> extractor program string | null; \
console.log(...) is captured as your next observation; memory[] persists across turns.";

const LISP_TOOLS: &str = "(grep pattern), (filter coll lambda), (map coll lambda), \
(match str pattern group), (replace str from to), (split str delim index), \
(parseInt str), (parseFloat str), (if cond then else), \
(classify value (case1 result1) (case2 result2) ... default), (lambda (x) body), \
(constrained op term) where op is one of Sigma-mu (simplify), inf/0 (null-guard), eps-phi (reserved).";

/// Drives one session through the multi-turn loop to either a final
/// answer or a capped/aborted termination. Stateless across calls beyond
/// what it's given — all mutable state lives in `session`.
pub struct Orchestrator {
    adapter: Box<dyn Adapter>,
    llm: Arc<dyn LlmClient>,
    config: TurnLoopConfig,
}

impl Orchestrator {
    pub fn new(adapter: Box<dyn Adapter>, llm: Arc<dyn LlmClient>, config: TurnLoopConfig) -> Self {
        Self { adapter, llm, config }
    }

    pub async fn run(&self, query: &str, session: &mut Session) -> Result<LoopOutcome, RlmError> {
        let is_lisp = self.adapter.name() == "lisp";
        let synthesis_first = self.adapter.name() == "javascript-synthesis-first";
        let tool_interfaces = if is_lisp { LISP_TOOLS } else { JS_TOOLS };

        let mut feedback: Option<String> = None;
        let mut prev_code: Option<String> = None;
        let mut repeat_count: u32 = 0;
        let mut prior_count: Option<usize> = None;

        for turn in 1..=self.config.max_turns {
            let system_prompt = self.adapter.build_system_prompt(
                session.line_store.get_line_count(),
                tool_interfaces,
                None,
            );
            let prompt = build_user_prompt(query, feedback.as_deref(), &session.bindings.render_short());

            let response = self.call_llm(&system_prompt, &prompt).await?;

            if let Some(answer) = self.adapter.extract_final_answer(&response) {
                match answer {
                    FinalAnswer::Text(text) => return Ok(LoopOutcome::Final(text)),
                    FinalAnswer::Var(name) => match session.resolve_name(&name) {
                        Some(resolved) => return Ok(LoopOutcome::Final(resolved)),
                        None => {
                            feedback = Some(format!(
                                "FINAL_VAR({name}) does not refer to a known binding. Current bindings: {}",
                                session.bindings.render_short()
                            ));
                            continue;
                        }
                    },
                }
            }

            let Some(code) = self.adapter.extract_code(&response) else {
                // Open Question (i): counts as a turn, for determinism.
                feedback = Some(self.adapter.get_no_code_feedback());
                continue;
            };

            if prev_code.as_deref() == Some(code.as_str()) {
                repeat_count += 1;
                if repeat_count >= 2 {
                    return Ok(LoopOutcome::NoProgress(session.bindings_snapshot()));
                }
                feedback = Some(self.adapter.get_repeated_code_feedback(prior_count));
                continue;
            }
            repeat_count = 0;
            prev_code = Some(code.clone());

            if !is_lisp {
                if let Err(e) = crate::validator::validate(&code, synthesis_first) {
                    feedback = Some(self.adapter.get_error_feedback(&e.to_string(), Some(&code)));
                    continue;
                }
            }

            let exec_result = if is_lisp {
                session.execute_dsl(&code)
            } else {
                session.execute_js(&code).await
            };

            match exec_result {
                Ok(outcome) => {
                    let observation = outcome.observation.clone();
                    let (_stub, count) = session.bind_turn_result(turn, outcome.value);
                    session.checkpoint_save(turn, unix_now());
                    let success_feedback = self.adapter.get_success_feedback(count, prior_count);
                    feedback = Some(if observation.trim().is_empty() {
                        success_feedback
                    } else {
                        format!("Observation:\n{observation}\n\n{success_feedback}")
                    });
                    prior_count = Some(count);
                }
                Err(e) => {
                    feedback = Some(self.adapter.get_error_feedback(&e.to_string(), Some(&code)));
                }
            }
        }

        Ok(LoopOutcome::MaxTurnsReached(session.bindings_snapshot()))
    }

    /// One retry on transport error, then fatal, per spec §4.8 step 2.
    async fn call_llm(&self, system_prompt: &str, prompt: &str) -> Result<String, RlmError> {
        match self.llm.complete(system_prompt, prompt).await {
            Ok(r) => Ok(r),
            Err(first_err) => self
                .llm
                .complete(system_prompt, prompt)
                .await
                .map_err(|second_err| {
                    RlmError::TransportError(format!(
                        "request failed twice: {first_err}; retry also failed: {second_err}"
                    ))
                }),
        }
    }
}

fn build_user_prompt(query: &str, feedback: Option<&str>, bindings_render: &str) -> String {
    let mut prompt = format!("Query: {query}\n");
    if !bindings_render.is_empty() {
        prompt.push_str(&format!("Current bindings: {bindings_render}\n"));
    }
    if let Some(f) = feedback {
        prompt.push_str(&format!("\nFeedback from the previous turn:\n{f}\n"));
    }
    prompt
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::JsAdapter;
    use crate::sandbox::SandboxConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

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
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, crate::llm_client::LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().unwrap();
            Ok(replies.pop().unwrap_or_else(|| "```javascript\nconsole.log('noop')\n```".into()))
        }
    }

    fn session() -> Session {
        let mut s = Session::new(SandboxConfig::default());
        s.load("2024-01-01 ERROR timeout\n2024-01-02 INFO ok\n2024-01-03 ERROR retry");
        s
    }

    #[tokio::test]
    async fn terminates_on_delimited_final_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec!["<<<FINAL>>>42<<<END>>>"]));
        let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 5 });
        let mut sess = session();
        let outcome = orchestrator.run("how many errors?", &mut sess).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Final("42".to_string()));
    }

    #[tokio::test]
    async fn final_var_resolves_through_bindings() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "```javascript\nconsole.log(JSON.stringify(grep('ERROR')));\n```",
            "FINAL_VAR(RESULTS)",
        ]));
        let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 5 });
        let mut sess = session();
        let outcome = orchestrator.run("find errors", &mut sess).await.unwrap();
        match outcome {
            LoopOutcome::Final(text) => assert!(text.contains("ERROR")),
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn three_identical_fragments_terminate_no_progress() {
        let same = "```javascript\nconsole.log(1)\n```";
        let llm = Arc::new(ScriptedLlm::new(vec![same, same, same]));
        let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 10 });
        let mut sess = session();
        let outcome = orchestrator.run("noop", &mut sess).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::NoProgress(_)));
    }

    #[tokio::test]
    async fn max_turns_reached_caps_the_loop() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "```javascript\nconsole.log(1)\n```",
            "```javascript\nconsole.log(2)\n```",
            "```javascript\nconsole.log(3)\n```",
        ]));
        let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm, TurnLoopConfig { max_turns: 3 });
        let mut sess = session();
        let outcome = orchestrator.run("noop", &mut sess).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::MaxTurnsReached(_)));
    }

    #[tokio::test]
    async fn no_code_response_counts_as_a_turn() {
        let llm = Arc::new(ScriptedLlm::new(vec!["just some commentary, no fence"]));
        let orchestrator = Orchestrator::new(Box::new(JsAdapter), llm.clone(), TurnLoopConfig { max_turns: 1 });
        let mut sess = session();
        let outcome = orchestrator.run("noop", &mut sess).await.unwrap();
        assert!(matches!(outcome, LoopOutcome::MaxTurnsReached(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lisp_adapter_drives_the_dsl_evaluator() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"```lisp
(grep "ERROR")
```"#,
            "FINAL_VAR(RESULTS)",
        ]));
        let orchestrator = Orchestrator::new(
            Box::new(crate::adapter::LispAdapter),
            llm,
            TurnLoopConfig { max_turns: 5 },
        );
        let mut sess = session();
        let outcome = orchestrator.run("find errors", &mut sess).await.unwrap();
        match outcome {
            LoopOutcome::Final(text) => assert!(text.contains("ERROR")),
            other => panic!("expected Final, got {other:?}"),
        }
    }
}
