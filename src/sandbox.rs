//! Runs an untrusted source fragment once inside a QuickJS context with a
//! restricted global environment, a wall-clock deadline, and a memory cap.
//! Grounded on the resource-limited single-shot execution model; unlike a
//! long-lived agent loop there is no persistent process to sandbox, just
//! one fragment per turn sharing a `memory` array across turns.

use crate::extractor::{self, synthesize, Example, ExtractorValue};
use crate::line_store::LineStore;
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value as JsValue};
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("execution timed out after {0}ms")]
    Timeout(u64),
    #[error("memory limit exceeded ({0} MiB)")]
    MemoryExceeded(u64),
    #[error("sub-call limit exceeded ({0})")]
    SubCallLimit(u32),
    #[error("{0}")]
    Runtime(String),
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub timeout: Duration,
    pub memory_limit_mb: u64,
    pub max_sub_calls: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_limit_mb: 128,
            max_sub_calls: 64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SandboxRun {
    pub stdout: String,
    /// `JSON.stringify` of the evaluated fragment's completion value, when
    /// it serializes cleanly; informational only, callers key off `stdout`.
    pub value: Option<JsonValue>,
}

/// Owns the `memory` array that survives across calls within one session.
pub struct Sandbox {
    config: SandboxConfig,
    memory: Mutex<Vec<JsonValue>>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(Vec::new()),
        }
    }

    pub async fn run(&self, source: &str, line_store: &LineStore) -> Result<SandboxRun, SandboxError> {
        let source = source.to_string();
        let doc_text = line_store.full_text();
        let count = line_store.get_line_count();
        let lines: Vec<String> = line_store
            .get_lines(1, count)
            .into_iter()
            .map(|l| l.content)
            .collect();
        let memory_snapshot = self.memory.lock().unwrap().clone();
        let config = self.config.clone();
        let timeout = config.timeout;

        let interrupt = Arc::new(AtomicBool::new(false));
        let interrupt_for_timer = interrupt.clone();

        let blocking = tokio::task::spawn_blocking(move || {
            execute(&source, &doc_text, &lines, memory_snapshot, config, interrupt)
        });

        tokio::select! {
            joined = blocking => {
                match joined {
                    Ok(inner) => {
                        let (run, memory) = inner?;
                        *self.memory.lock().unwrap() = memory;
                        Ok(run)
                    }
                    Err(e) => Err(SandboxError::Runtime(format!("sandbox task panicked: {e}"))),
                }
            }
            _ = tokio::time::sleep(timeout) => {
                interrupt_for_timer.store(true, Ordering::SeqCst);
                Err(SandboxError::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}

fn execute(
    source: &str,
    doc_text: &str,
    lines: &[String],
    memory: Vec<JsonValue>,
    config: SandboxConfig,
    interrupt: Arc<AtomicBool>,
) -> Result<(SandboxRun, Vec<JsonValue>), SandboxError> {
    let runtime = Runtime::new().map_err(|e| SandboxError::Runtime(e.to_string()))?;
    runtime
        .set_memory_limit((config.memory_limit_mb as usize) * 1024 * 1024);
    runtime.set_interrupt_handler(Some(Box::new(move || interrupt.load(Ordering::SeqCst))));

    let context = Context::full(&runtime).map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let stdout = Rc::new(RefCell::new(String::new()));
    let sub_calls = Rc::new(Cell::new(0u32));
    let memory_cell = Rc::new(RefCell::new(memory));
    let max_sub_calls = config.max_sub_calls;

    let result = context.with(|ctx| -> Result<SandboxRun, SandboxError> {
        install_bootstrap(&ctx, doc_text, lines, &stdout, &sub_calls, max_sub_calls, &memory_cell)
            .map_err(|e| SandboxError::Runtime(js_error_to_string(&ctx, e)))?;

        let memory_json = serde_json::to_string(&*memory_cell.borrow()).unwrap_or_else(|_| "[]".into());
        let seed = format!("globalThis.memory = {memory_json};");
        ctx.eval::<(), _>(seed)
            .map_err(|e| SandboxError::Runtime(js_error_to_string(&ctx, e)))?;

        let eval_outcome: Result<JsValue, rquickjs::Error> = ctx.eval(source);
        let value = match eval_outcome {
            Ok(v) => stringify(&ctx, v).ok(),
            Err(e) => {
                let message = js_error_to_string(&ctx, e);
                if sub_calls.get() > max_sub_calls {
                    return Err(SandboxError::SubCallLimit(max_sub_calls));
                }
                return Err(classify_runtime_error(&message, &config));
            }
        };

        if sub_calls.get() > max_sub_calls {
            return Err(SandboxError::SubCallLimit(max_sub_calls));
        }

        let memory_after: JsValue = ctx
            .eval("JSON.stringify(globalThis.memory)")
            .map_err(|e| SandboxError::Runtime(js_error_to_string(&ctx, e)))?;
        if let Some(s) = memory_after.as_string() {
            if let Ok(s) = s.to_string() {
                if let Ok(parsed) = serde_json::from_str::<Vec<JsonValue>>(&s) {
                    *memory_cell.borrow_mut() = parsed;
                }
            }
        }

        Ok(SandboxRun {
            stdout: stdout.borrow().clone(),
            value,
        })
    });

    let memory_out = memory_cell.borrow().clone();
    result.map(|run| (run, memory_out))
}

fn classify_runtime_error(message: &str, config: &SandboxConfig) -> SandboxError {
    let lower = message.to_lowercase();
    if lower.contains("interrupt") {
        SandboxError::Timeout(config.timeout.as_millis() as u64)
    } else if lower.contains("out of memory") || lower.contains("allocation failed") {
        SandboxError::MemoryExceeded(config.memory_limit_mb)
    } else {
        SandboxError::Runtime(message.to_string())
    }
}

fn js_error_to_string(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        let exc: JsValue = ctx.catch();
        if let Some(s) = exc.as_string() {
            if let Ok(s) = s.to_string() {
                return s;
            }
        }
        return format!("{exc:?}");
    }
    err.to_string()
}

fn stringify(ctx: &Ctx<'_>, value: JsValue) -> Result<JsonValue, rquickjs::Error> {
    if value.is_undefined() {
        return Ok(JsonValue::Null);
    }
    let json_global: Object = ctx.globals().get("JSON")?;
    let stringify_fn: Function = json_global.get("stringify")?;
    let text: JsValue = stringify_fn.call((value,))?;
    let text = text.as_string().map(|s| s.to_string()).transpose()?.unwrap_or_default();
    Ok(serde_json::from_str(&text).unwrap_or(JsonValue::Null))
}

#[allow(clippy::too_many_arguments)]
fn install_bootstrap<'js>(
    ctx: &Ctx<'js>,
    doc_text: &str,
    lines: &[String],
    stdout: &Rc<RefCell<String>>,
    sub_calls: &Rc<Cell<u32>>,
    max_sub_calls: u32,
    memory_cell: &Rc<RefCell<Vec<JsonValue>>>,
) -> Result<(), rquickjs::Error> {
    let globals = ctx.globals();
    globals.set("context", doc_text.to_string())?;

    let arr = rquickjs::Array::new(ctx.clone())?;
    for (i, line) in lines.iter().enumerate() {
        arr.set(i, line.clone())?;
    }
    globals.set("__linesArray", arr)?;

    let console = Object::new(ctx.clone())?;
    let stdout_for_log = stdout.clone();
    let log_fn = Function::new(ctx.clone(), move |msg: rquickjs::Rest<String>| {
        let mut out = stdout_for_log.borrow_mut();
        out.push_str(&msg.0.join(" "));
        out.push('\n');
    })?;
    console.set("log", log_fn)?;
    globals.set("console", console)?;

    let owned_lines = lines.to_vec();
    let sub_calls_grep = sub_calls.clone();
    let grep_fn = Function::new(ctx.clone(), move |pattern: String| -> rquickjs::Result<String> {
        sub_calls_grep.set(sub_calls_grep.get() + 1);
        if sub_calls_grep.get() > max_sub_calls {
            return Ok("[]".to_string());
        }
        let hits = grep_lines(&owned_lines, &pattern);
        Ok(serde_json::to_string(&hits).unwrap_or_else(|_| "[]".into()))
    })?;
    globals.set("__native_grep", grep_fn)?;

    let owned_lines2 = lines.to_vec();
    let sub_calls_fuzzy = sub_calls.clone();
    let fuzzy_fn = Function::new(ctx.clone(), move |query: String| -> rquickjs::Result<String> {
        sub_calls_fuzzy.set(sub_calls_fuzzy.get() + 1);
        if sub_calls_fuzzy.get() > max_sub_calls {
            return Ok("[]".to_string());
        }
        let needle = query.to_lowercase();
        let hits: Vec<JsonValue> = owned_lines2
            .iter()
            .enumerate()
            .filter(|(_, l)| l.to_lowercase().contains(&needle))
            .map(|(i, l)| {
                serde_json::json!({ "lineNum": i + 1, "content": l })
            })
            .collect();
        Ok(serde_json::to_string(&hits).unwrap_or_else(|_| "[]".into()))
    })?;
    globals.set("__native_fuzzy_search", fuzzy_fn)?;

    let owned_lines3 = lines.to_vec();
    let sub_calls_locate = sub_calls.clone();
    let locate_fn = Function::new(ctx.clone(), move |n: i64| -> rquickjs::Result<String> {
        sub_calls_locate.set(sub_calls_locate.get() + 1);
        if sub_calls_locate.get() > max_sub_calls {
            return Ok("null".to_string());
        }
        let idx = n - 1;
        if idx < 0 || idx as usize >= owned_lines3.len() {
            return Ok("null".to_string());
        }
        let content = &owned_lines3[idx as usize];
        Ok(serde_json::to_string(&serde_json::json!({ "lineNum": n, "content": content }))
            .unwrap_or_else(|_| "null".into()))
    })?;
    globals.set("__native_locate_line", locate_fn)?;

    let sub_calls_synth = sub_calls.clone();
    let synth_fn = Function::new(ctx.clone(), move |pairs_json: String| -> rquickjs::Result<String> {
        sub_calls_synth.set(sub_calls_synth.get() + 1);
        if sub_calls_synth.get() > max_sub_calls {
            return Ok("null".to_string());
        }
        Ok(run_synthesis(&pairs_json))
    })?;
    globals.set("__native_synthesize_extractor", synth_fn)?;

    let sub_calls_synth_re = sub_calls.clone();
    let synth_re_fn = Function::new(ctx.clone(), move |pairs_json: String| -> rquickjs::Result<String> {
        sub_calls_synth_re.set(sub_calls_synth_re.get() + 1);
        if sub_calls_synth_re.get() > max_sub_calls {
            return Ok("null".to_string());
        }
        Ok(run_synthesis(&pairs_json))
    })?;
    globals.set("__native_synthesize_regex", synth_re_fn)?;

    let memory_for_len = memory_cell.clone();
    let _ = memory_for_len;

    const PRELUDE: &str = r#"
        globalThis.grep = function(pattern) { return JSON.parse(__native_grep(pattern)); };
        globalThis.fuzzy_search = function(query) { return JSON.parse(__native_fuzzy_search(query)); };
        globalThis.locate_line = function(n) { return JSON.parse(__native_locate_line(n)); };
        globalThis.synthesize_extractor = function(pairs) { return JSON.parse(__native_synthesize_extractor(JSON.stringify(pairs))); };
        globalThis.synthesize_regex = function(pairs) { return JSON.parse(__native_synthesize_regex(JSON.stringify(pairs))); };
    "#;
    ctx.eval::<(), _>(PRELUDE)?;

    Ok(())
}

fn grep_lines(lines: &[String], pattern: &str) -> Vec<JsonValue> {
    let Ok(re) = regex::RegexBuilder::new(pattern).case_insensitive(true).build() else {
        return Vec::new();
    };
    let mut hits = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        for m in re.find_iter(line) {
            hits.push(serde_json::json!({
                "match": m.as_str(),
                "line": line,
                "lineNum": i + 1,
                "index": m.start(),
            }));
        }
    }
    hits
}

/// Shared native backing for `synthesize_extractor`/`synthesize_regex`:
/// both take `[{input, output}]` pairs and return the rendered extractor
/// program, or `null` when nothing within bounds satisfies every pair.
fn run_synthesis(pairs_json: &str) -> String {
    let Ok(raw) = serde_json::from_str::<Vec<JsonValue>>(pairs_json) else {
        return "null".to_string();
    };
    let mut pairs = Vec::new();
    for entry in raw {
        let Some(input) = entry.get("input").and_then(|v| v.as_str()) else {
            return "null".to_string();
        };
        let output = match entry.get("output") {
            Some(JsonValue::Number(n)) => ExtractorValue::Num(n.as_f64().unwrap_or(f64::NAN)),
            Some(JsonValue::String(s)) => ExtractorValue::Str(s.clone()),
            Some(JsonValue::Null) | None => ExtractorValue::Null,
            _ => return "null".to_string(),
        };
        pairs.push(Example {
            input: input.to_string(),
            output,
        });
    }
    match synthesize(&pairs, None, 8) {
        Some(e) => serde_json::to_string(&extractor::render(&e)).unwrap_or_else(|_| "null".into()),
        None => "null".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_store::LineStore;

    fn store(text: &str) -> LineStore {
        let mut s = LineStore::new();
        s.load(text);
        s
    }

    #[tokio::test]
    async fn console_log_is_captured_as_stdout() {
        let sandbox = Sandbox::new(SandboxConfig::default());
        let ls = store("line one\nline two");
        let run = sandbox.run("console.log('hi', 1)", &ls).await.unwrap();
        assert_eq!(run.stdout.trim(), "hi 1");
    }

    #[tokio::test]
    async fn grep_exposes_document_lines() {
        let sandbox = Sandbox::new(SandboxConfig::default());
        let ls = store("ERROR one\nINFO two\nERROR three");
        let run = sandbox
            .run("console.log(grep('ERROR').length)", &ls)
            .await
            .unwrap();
        assert_eq!(run.stdout.trim(), "2");
    }

    #[tokio::test]
    async fn host_escape_constructs_are_unreachable() {
        let sandbox = Sandbox::new(SandboxConfig::default());
        let ls = store("hello");
        let run = sandbox.run("console.log(typeof require)", &ls).await.unwrap();
        assert_eq!(run.stdout.trim(), "undefined");
    }

    #[tokio::test]
    async fn memory_persists_across_runs() {
        let sandbox = Sandbox::new(SandboxConfig::default());
        let ls = store("x");
        sandbox.run("memory.push(42);", &ls).await.unwrap();
        let run = sandbox.run("console.log(memory.length)", &ls).await.unwrap();
        assert_eq!(run.stdout.trim(), "1");
    }
}
