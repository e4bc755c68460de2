//! Session Façade: the thin API a host embeds against (spec §2's
//! "Session Façade" row) — load a document, execute one fragment,
//! inspect bindings, expand a handle. The [`crate::orchestrator`] drives
//! a `Session` through a full multi-turn loop; a host that only wants a
//! single evaluation can call `execute_js`/`execute_dsl` directly.

use crate::bindings::Bindings;
use crate::checkpoint::CheckpointManager;
use crate::dsl::{self, Value as DslValue};
use crate::error::RlmError;
use crate::handle::{Elem, ExpandFormat, HandleRegistry, HandleStub, InvalidHandle};
use crate::line_store::LineStore;
use crate::sandbox::{Sandbox, SandboxConfig};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// What one turn's execution produced, before [`Session::bind_turn_result`]
/// folds it into bindings. A collection gets a handle; a scalar bypasses
/// the registry entirely, per the data model (spec §3).
pub enum ExecValue {
    Collection(Vec<Elem>),
    Scalar(String),
}

pub struct ExecOutcome {
    pub value: ExecValue,
    /// Text fed back to the LLM as this turn's observation: sandbox
    /// stdout for the JS path, or a rendering of the evaluated term for
    /// the DSL path (which has no console).
    pub observation: String,
}

pub struct Session {
    pub line_store: LineStore,
    pub registry: HandleRegistry,
    pub bindings: Bindings,
    pub checkpoints: CheckpointManager,
    pub sandbox: Sandbox,
    /// Turn-numbered scalar results (`_N`). Scalars never get a handle,
    /// so they live in a side table rather than in `bindings`.
    scalars: HashMap<String, String>,
}

impl Session {
    pub fn new(sandbox_config: SandboxConfig) -> Self {
        Self {
            line_store: LineStore::new(),
            registry: HandleRegistry::new(),
            bindings: Bindings::new(),
            checkpoints: CheckpointManager::new(),
            sandbox: Sandbox::new(sandbox_config),
            scalars: HashMap::new(),
        }
    }

    /// Loads a new document, clearing every handle, binding, checkpoint,
    /// and scalar from the prior document. Returns the new line count.
    pub fn load(&mut self, text: &str) -> usize {
        self.registry = HandleRegistry::new();
        self.bindings = Bindings::new();
        self.checkpoints = CheckpointManager::new();
        self.scalars.clear();
        self.line_store.load(text)
    }

    pub async fn execute_js(&mut self, source: &str) -> Result<ExecOutcome, RlmError> {
        let run = self.sandbox.run(source, &self.line_store).await?;
        let value = match &run.value {
            Some(JsonValue::Array(items)) => {
                ExecValue::Collection(items.iter().map(elem_from_json).collect())
            }
            Some(other) if !other.is_null() => ExecValue::Scalar(json_scalar_text(other)),
            _ => ExecValue::Scalar(run.stdout.trim().to_string()),
        };
        let observation = crate::utils::truncate_tool_output(&run.stdout);
        Ok(ExecOutcome { value, observation })
    }

    pub fn execute_dsl(&mut self, source: &str) -> Result<ExecOutcome, RlmError> {
        let term = dsl::parse(source)?;
        let ctx = dsl::EvalCtx::new(&self.line_store, &self.registry, &self.bindings);
        let result = dsl::eval(&term, &dsl::Env::Empty, &ctx)?;
        let observation = render_dsl_scalar(&result);
        let value = match &result {
            DslValue::Array(items) => ExecValue::Collection(items.iter().map(elem_from_dsl_value).collect()),
            other => ExecValue::Scalar(render_dsl_scalar(other)),
        };
        Ok(ExecOutcome { value, observation })
    }

    /// Folds a turn's result into bindings: a collection gets a handle
    /// and repoints `RESULTS`/`_N`; a scalar is recorded only under `_N`.
    /// Returns the handle's stub (for collections) and the result count
    /// the adapter's success feedback reports.
    pub fn bind_turn_result(&mut self, turn: u32, value: ExecValue) -> (Option<HandleStub>, usize) {
        match value {
            ExecValue::Collection(elems) => {
                let count = elems.len();
                let handle = self.registry.create(elems, "array");
                self.registry.set_results(&handle);
                self.bindings.set_results(&handle);
                self.bindings.set_turn(turn, &handle);
                (self.registry.stub_for(&handle).ok(), count)
            }
            ExecValue::Scalar(text) => {
                self.scalars.insert(format!("_{turn}"), text);
                (None, 0)
            }
        }
    }

    /// Resolves a `FINAL_VAR(name)` reference: a handle-bound name
    /// expands to its full text; a scalar-bound name returns its text.
    pub fn resolve_name(&self, name: &str) -> Option<String> {
        if let Some(handle) = self.bindings.get(name) {
            return self
                .registry
                .expand(handle, ExpandFormat::default())
                .ok()
                .map(|lines| lines.join("\n"));
        }
        self.scalars.get(name).cloned()
    }

    pub fn expand_handle(&self, handle: &str, fmt: ExpandFormat) -> Result<Vec<String>, InvalidHandle> {
        self.registry.expand(handle, fmt)
    }

    pub fn stub_for(&self, handle: &str) -> Result<HandleStub, InvalidHandle> {
        self.registry.stub_for(handle)
    }

    pub fn drop_handle(&mut self, handle: &str) {
        self.registry.drop_handle(handle);
    }

    pub fn bindings_snapshot(&self) -> HashMap<String, String> {
        self.bindings.snapshot()
    }

    pub fn checkpoint_save(&mut self, turn: u32, timestamp_unix: u64) {
        self.checkpoints.save(turn, &self.bindings, timestamp_unix);
    }

    pub fn checkpoint_restore(&mut self, turn: u32) -> bool {
        self.checkpoints.restore(turn, &mut self.bindings)
    }
}

fn elem_from_json(v: &JsonValue) -> Elem {
    match v {
        JsonValue::String(s) => Elem::Str(s.clone()),
        JsonValue::Number(n) => Elem::Num(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::Bool(b) => Elem::Bool(*b),
        JsonValue::Null => Elem::Null,
        other => Elem::Str(other.to_string()),
    }
}

fn json_scalar_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn elem_from_dsl_value(v: &DslValue) -> Elem {
    match v {
        DslValue::Null => Elem::Null,
        DslValue::Bool(b) => Elem::Bool(*b),
        DslValue::Num(n) => Elem::Num(*n),
        DslValue::Line(l) => Elem::Line(l.clone()),
        DslValue::Array(_) | DslValue::Closure(_) => Elem::Str(render_dsl_scalar(v)),
        other => Elem::Str(other.coerce_str().unwrap_or_default()),
    }
}

fn render_dsl_scalar(v: &DslValue) -> String {
    match v {
        DslValue::Null => "null".to_string(),
        DslValue::Array(items) => format!("[{} item(s)]", items.len()),
        DslValue::Closure(_) => "<lambda>".to_string(),
        other => other.coerce_str().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(doc: &str) -> Session {
        let mut s = Session::new(SandboxConfig::default());
        s.load(doc);
        s
    }

    #[tokio::test]
    async fn js_execution_stores_array_completion_value_as_a_handle() {
        let mut sess = session("ERROR one\nINFO two\nERROR three");
        let outcome = sess.execute_js("grep('ERROR')").await.unwrap();
        let (stub, count) = sess.bind_turn_result(1, outcome.value);
        assert_eq!(count, 2);
        assert!(stub.is_some());
        assert_eq!(sess.bindings.get("RESULTS"), sess.bindings.get("_1"));
    }

    #[tokio::test]
    async fn js_scalar_completion_value_bypasses_the_registry() {
        let mut sess = session("a\nb");
        let outcome = sess.execute_js("grep('a').length").await.unwrap();
        let (stub, count) = sess.bind_turn_result(1, outcome.value);
        assert!(stub.is_none());
        assert_eq!(count, 0);
        assert_eq!(sess.resolve_name("_1").as_deref(), Some("1"));
    }

    #[test]
    fn dsl_execution_stores_array_result_as_a_handle() {
        let mut sess = session("ERROR one\nINFO two");
        let outcome = sess.execute_dsl(r#"(grep "ERROR")"#).unwrap();
        let (stub, count) = sess.bind_turn_result(1, outcome.value);
        assert_eq!(count, 1);
        assert!(stub.is_some());
    }

    #[test]
    fn dsl_scalar_result_is_resolvable_by_turn_name() {
        let mut sess = session("a\nb\nc");
        let outcome = sess.execute_dsl(r#"(parseInt "42")"#).unwrap();
        let (stub, _count) = sess.bind_turn_result(3, outcome.value);
        assert!(stub.is_none());
        assert_eq!(sess.resolve_name("_3").as_deref(), Some("42"));
    }

    #[test]
    fn resolve_name_expands_a_handle_bound_name_to_full_text() {
        let mut sess = session("ERROR one\nINFO two\nERROR three");
        let outcome = sess.execute_dsl(r#"(grep "ERROR")"#).unwrap();
        sess.bind_turn_result(1, outcome.value);
        let resolved = sess.resolve_name("RESULTS").unwrap();
        assert!(resolved.contains("ERROR"));
    }

    #[test]
    fn load_clears_prior_handles_and_bindings() {
        let mut sess = session("ERROR one");
        let outcome = sess.execute_dsl(r#"(grep "ERROR")"#).unwrap();
        sess.bind_turn_result(1, outcome.value);
        assert!(sess.bindings.get("RESULTS").is_some());
        sess.load("fresh document");
        assert!(sess.bindings.get("RESULTS").is_none());
        assert_eq!(sess.line_store.get_line_count(), 1);
    }
}
