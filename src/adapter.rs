//! Adapter Contract: a capability record of six functions (plus two
//! optional ones) formatting the system prompt and parsing the model's
//! replies. Variants compose by spreading a base record and overriding
//! fields rather than through inheritance; concretely, a base adapter
//! supplies default method bodies and each provider-specific adapter
//! overrides only what it needs.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum FinalAnswer {
    Text(String),
    Var(String),
}

pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn code_fence_tags(&self) -> &'static [&'static str];

    fn build_system_prompt(&self, context_length: usize, tool_interfaces: &str, hints: Option<&str>) -> String {
        default_system_prompt(self.code_fence_tags(), context_length, tool_interfaces, hints)
    }

    fn extract_code(&self, response: &str) -> Option<String> {
        extract_fenced_block(response, self.code_fence_tags())
    }

    fn extract_final_answer(&self, response: &str) -> Option<FinalAnswer> {
        extract_final_answer_protocol(response)
    }

    fn get_no_code_feedback(&self) -> String {
        "No executable fragment was found in your last response. Emit a fenced code block \
         containing the next step, or a final answer using <<<FINAL>>>...<<<END>>> or FINAL_VAR(name)."
            .to_string()
    }

    fn get_error_feedback(&self, error: &str, code: Option<&str>) -> String {
        match code {
            Some(c) => format!("The last fragment failed: {error}\n\nFragment was:\n{c}\n\nRevise and try again."),
            None => format!("The last fragment failed: {error}\n\nRevise and try again."),
        }
    }

    fn get_success_feedback(&self, result_count: usize, prior_count: Option<usize>) -> String {
        match prior_count {
            Some(prior) if result_count == 0 && prior > 0 => format!(
                "The last operation produced 0 results (down from {prior}). Consider relaxing the filter."
            ),
            _ => format!("The last operation produced {result_count} result(s)."),
        }
    }

    fn get_repeated_code_feedback(&self, result_count: Option<usize>) -> String {
        match result_count {
            Some(n) => format!(
                "You emitted the same fragment again (last produced {n} result(s)). Try a different approach."
            ),
            None => "You emitted the same fragment again. Try a different approach.".to_string(),
        }
    }
}

fn default_system_prompt(tags: &[&str], context_length: usize, tool_interfaces: &str, hints: Option<&str>) -> String {
    let fence = tags.first().copied().unwrap_or("javascript");
    let mut prompt = format!(
        "You are analysing a document of {context_length} lines. You cannot see the document \
         directly; you may only observe it by emitting short programs in a fenced ```{fence}``` \
         block. Their output is returned to you as the next observation.\n\n\
         Available tools:\n{tool_interfaces}\n\n\
         When you have the final answer, emit it between <<<FINAL>>> and <<<END>>>, or \
         FINAL_VAR(name) to return the value currently bound to `name`."
    );
    if let Some(h) = hints {
        prompt.push_str("\n\n");
        prompt.push_str(h);
    }
    prompt
}

/// Finds the first fenced block whose language tag is one of `tags`.
fn extract_fenced_block(response: &str, tags: &[&str]) -> Option<String> {
    let mut search_from = 0;
    while let Some(start) = response[search_from..].find("```") {
        let fence_start = search_from + start;
        let after_fence = fence_start + 3;
        let line_end = response[after_fence..].find('\n').map(|i| after_fence + i)?;
        let lang = response[after_fence..line_end].trim().to_lowercase();
        let body_start = line_end + 1;
        let Some(close_rel) = response[body_start..].find("```") else {
            return None;
        };
        let body_end = body_start + close_rel;
        if tags.iter().any(|t| *t == lang) {
            return Some(response[body_start..body_end].trim_end().to_string());
        }
        search_from = body_end + 3;
    }
    None
}

/// `FINAL_VAR` > `<<<FINAL>>>...<<<END>>>` > structured JSON fallback.
fn extract_final_answer_protocol(response: &str) -> Option<FinalAnswer> {
    if let Some(var) = extract_final_var(response) {
        return Some(FinalAnswer::Var(var));
    }
    if let Some(text) = extract_delimited_final(response) {
        return Some(FinalAnswer::Text(text));
    }
    extract_json_fallback(response).map(FinalAnswer::Text)
}

fn extract_final_var(response: &str) -> Option<String> {
    let start = response.find("FINAL_VAR(")?;
    let after = start + "FINAL_VAR(".len();
    let end = response[after..].find(')')? + after;
    let name = response[after..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn extract_delimited_final(response: &str) -> Option<String> {
    let start = response.find("<<<FINAL>>>")? + "<<<FINAL>>>".len();
    let end = response[start..].find("<<<END>>>")? + start;
    Some(response[start..end].trim().to_string())
}

const PRIORITY_FIELDS: &[&str] = &["summary", "response", "answer"];
const TIE_BREAK_GROUP: &[&str] = &["result", "sum", "total"];
const TAIL_FIELDS: &[&str] = &["value", "count"];

/// JSON-object fallback with case/underscore-insensitive field matching.
/// When more than one of `total`/`result`/`sum` is present, the
/// lexicographically smallest present name wins (see design note §9(iii)).
fn extract_json_fallback(response: &str) -> Option<String> {
    let trimmed = response.trim();
    let json_candidate = find_json_object(trimmed)?;
    let value: JsonValue = serde_json::from_str(&json_candidate).ok()?;
    let obj = value.as_object()?;

    let normalized: HashMap<String, &JsonValue> = obj
        .iter()
        .map(|(k, v)| (normalize_key(k), v))
        .collect();

    for field in PRIORITY_FIELDS {
        if let Some(v) = normalized.get(*field) {
            return Some(json_value_to_text(v));
        }
    }

    let mut present: Vec<&str> = TIE_BREAK_GROUP
        .iter()
        .copied()
        .filter(|f| normalized.contains_key(&normalize_key(f)))
        .collect();
    present.sort();
    if let Some(field) = present.first() {
        if let Some(v) = normalized.get(&normalize_key(field)) {
            return Some(json_value_to_text(v));
        }
    }

    for field in TAIL_FIELDS {
        if let Some(v) = normalized.get(*field) {
            return Some(json_value_to_text(v));
        }
    }
    None
}

fn normalize_key(s: &str) -> String {
    s.to_lowercase().replace('_', "")
}

fn json_value_to_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The response may carry commentary around the JSON object; scan for the
/// outermost balanced `{...}` span.
fn find_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'"' if i == 0 || bytes[i - 1] != b'\\' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

pub struct JsAdapter;

impl Adapter for JsAdapter {
    fn name(&self) -> &'static str {
        "javascript"
    }

    fn code_fence_tags(&self) -> &'static [&'static str] {
        &["javascript", "js", "typescript", "ts"]
    }
}

/// The synthesis-first JS adapter shares the code/final-answer protocol
/// but strengthens feedback to steer the model at `synthesize_extractor`
/// instead of hand-rolled `.match`/`.replace` parsing.
pub struct SynthesisFirstJsAdapter;

impl Adapter for SynthesisFirstJsAdapter {
    fn name(&self) -> &'static str {
        "javascript-synthesis-first"
    }

    fn code_fence_tags(&self) -> &'static [&'static str] {
        &["javascript", "js", "typescript", "ts"]
    }

    fn get_error_feedback(&self, error: &str, code: Option<&str>) -> String {
        if error.contains("not allowed") {
            format!(
                "{error}\n\nUse `synthesize_extractor([{{input, output}}, ...])` to build a \
                 string extractor from examples instead of hand-rolled string methods."
            )
        } else {
            match code {
                Some(c) => format!("The last fragment failed: {error}\n\nFragment was:\n{c}"),
                None => format!("The last fragment failed: {error}"),
            }
        }
    }
}

pub struct LispAdapter;

impl Adapter for LispAdapter {
    fn name(&self) -> &'static str {
        "lisp"
    }

    fn code_fence_tags(&self) -> &'static [&'static str] {
        &["lisp"]
    }
}

type AdapterFactory = fn() -> Box<dyn Adapter>;

pub struct AdapterRegistry {
    factories: HashMap<&'static str, AdapterFactory>,
    /// `(substring to match against the model name, adapter name)`, tried
    /// in order; first match wins.
    model_patterns: Vec<(&'static str, &'static str)>,
}

impl AdapterRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            model_patterns: Vec::new(),
        };
        registry.register("javascript", || Box::new(JsAdapter));
        registry.register("javascript-synthesis-first", || Box::new(SynthesisFirstJsAdapter));
        registry.register("lisp", || Box::new(LispAdapter));
        registry.add_model_pattern("claude", "javascript");
        registry.add_model_pattern("gemini", "javascript");
        registry.add_model_pattern("gpt", "javascript");
        registry.add_model_pattern("lisp", "lisp");
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: AdapterFactory) {
        self.factories.insert(name, factory);
    }

    pub fn add_model_pattern(&mut self, pattern: &'static str, adapter_name: &'static str) {
        self.model_patterns.push((pattern, adapter_name));
    }

    pub fn get(&self, name: &str) -> Option<Box<dyn Adapter>> {
        self.factories.get(name).map(|f| f())
    }

    /// Resolves an explicit `--adapter` choice first; falls back to
    /// pattern-matching the model name; falls back to the base JS adapter
    /// with a warning.
    pub fn resolve(&self, explicit: Option<&str>, model_name: &str) -> Box<dyn Adapter> {
        if let Some(name) = explicit {
            if let Some(adapter) = self.get(name) {
                return adapter;
            }
            tracing::warn!("unknown adapter '{}', falling back to auto-detection", name);
        }

        let lower = model_name.to_lowercase();
        for (pattern, adapter_name) in &self.model_patterns {
            if lower.contains(pattern) {
                if let Some(adapter) = self.get(adapter_name) {
                    return adapter;
                }
            }
        }

        tracing::warn!(
            "no adapter matched model '{}', falling back to base javascript adapter",
            model_name
        );
        Box::new(JsAdapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_code_round_trips_canonical_fragment() {
        let adapter = JsAdapter;
        let prompt = adapter.build_system_prompt(10, "grep, fuzzy_search", None);
        let fragment = "console.log(grep('ERROR').length);";
        let response = format!("{prompt}\n\n```javascript\n{fragment}\n```\n");
        assert_eq!(adapter.extract_code(&response).as_deref(), Some(fragment));
    }

    #[test]
    fn final_var_takes_precedence_over_delimited_text() {
        let adapter = JsAdapter;
        let response = "FINAL_VAR(RESULTS) <<<FINAL>>>ignored<<<END>>>";
        assert_eq!(
            adapter.extract_final_answer(response),
            Some(FinalAnswer::Var("RESULTS".to_string()))
        );
    }

    #[test]
    fn delimited_final_answer_is_extracted() {
        let adapter = JsAdapter;
        let response = "some commentary <<<FINAL>>>the answer is 42<<<END>>> trailing";
        assert_eq!(
            adapter.extract_final_answer(response),
            Some(FinalAnswer::Text("the answer is 42".to_string()))
        );
    }

    #[test]
    fn json_fallback_prefers_summary_over_tie_break_group() {
        let adapter = JsAdapter;
        let response = r#"{"summary": "done", "total": 5}"#;
        assert_eq!(
            adapter.extract_final_answer(response),
            Some(FinalAnswer::Text("done".to_string()))
        );
    }

    #[test]
    fn json_fallback_tie_break_is_lexicographic_among_result_sum_total() {
        let adapter = JsAdapter;
        let response = r#"{"total": 5, "sum": 7}"#;
        assert_eq!(
            adapter.extract_final_answer(response),
            Some(FinalAnswer::Text("7".to_string()))
        );
    }

    #[test]
    fn lisp_adapter_only_matches_lisp_fence() {
        let adapter = LispAdapter;
        let response = "```lisp\n(grep \"ERROR\")\n```";
        assert_eq!(adapter.extract_code(response).as_deref(), Some("(grep \"ERROR\")"));
        assert!(adapter.extract_code("```javascript\nfoo()\n```").is_none());
    }

    #[test]
    fn registry_falls_back_to_base_adapter_for_unknown_model() {
        let registry = AdapterRegistry::with_builtins();
        let adapter = registry.resolve(None, "some-unrecognized-model");
        assert_eq!(adapter.name(), "javascript");
    }

    #[test]
    fn registry_honors_explicit_adapter_choice() {
        let registry = AdapterRegistry::with_builtins();
        let adapter = registry.resolve(Some("lisp"), "gemini-3.1-pro");
        assert_eq!(adapter.name(), "lisp");
    }
}
