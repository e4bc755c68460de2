//! Handle Registry: maps opaque `$res<N>` handles to stored arrays and
//! produces compact, token-efficient stubs in their place.

use crate::line_store::Line;
use std::collections::HashMap;
use std::fmt;

/// A value the registry can hold. Lines keep their line number so
/// `expand(..., format: "lines")` can render `"[<lineNum>] <content>"`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Elem {
    Line(Line),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl Elem {
    fn preview_text(&self) -> String {
        match self {
            Elem::Line(l) => l.content.clone(),
            Elem::Str(s) => s.clone(),
            Elem::Num(n) => n.to_string(),
            Elem::Bool(b) => b.to_string(),
            Elem::Null => "null".to_string(),
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            Elem::Line(_) => "line",
            Elem::Str(_) => "string",
            Elem::Num(_) => "number",
            Elem::Bool(_) => "boolean",
            Elem::Null => "null",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HandleStub {
    pub handle: String,
    pub type_descriptor: String,
    pub count: usize,
    pub preview: String,
}

#[derive(Debug, Clone)]
pub struct ExpandFormat {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub as_lines: bool,
}

impl Default for ExpandFormat {
    fn default() -> Self {
        Self {
            offset: None,
            limit: None,
            as_lines: false,
        }
    }
}

pub struct InvalidHandle(pub String);

impl fmt::Display for InvalidHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid handle: {}", self.0)
    }
}

struct Entry {
    type_name: String,
    data: Vec<Elem>,
}

/// Owns every stored array for one session. Bindings hold weak-style
/// name references into this registry; dropping a handle here is the
/// only way data ever goes away.
pub struct HandleRegistry {
    next_id: u64,
    entries: HashMap<String, Entry>,
    results: Option<String>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            results: None,
        }
    }

    pub fn create(&mut self, data: Vec<Elem>, type_name: impl Into<String>) -> String {
        let handle = format!("$res{}", self.next_id);
        self.next_id += 1;
        self.entries.insert(
            handle.clone(),
            Entry {
                type_name: type_name.into(),
                data,
            },
        );
        handle
    }

    pub fn stub_for(&self, handle: &str) -> Result<HandleStub, InvalidHandle> {
        let entry = self
            .entries
            .get(handle)
            .ok_or_else(|| InvalidHandle(handle.to_string()))?;
        let count = entry.data.len();
        let preview = entry
            .data
            .first()
            .map(|e| truncate_preview(&e.preview_text()))
            .unwrap_or_default();
        let type_descriptor = if entry.type_name == "array" {
            match entry.data.first() {
                Some(e) => format!("array<{}>", e.type_tag()),
                None => "array".to_string(),
            }
        } else {
            entry.type_name.clone()
        };
        Ok(HandleStub {
            handle: handle.to_string(),
            type_descriptor,
            count,
            preview,
        })
    }

    pub fn expand(
        &self,
        handle: &str,
        fmt: ExpandFormat,
    ) -> Result<Vec<String>, InvalidHandle> {
        let entry = self
            .entries
            .get(handle)
            .ok_or_else(|| InvalidHandle(handle.to_string()))?;
        let offset = fmt.offset.unwrap_or(0);
        let slice: &[Elem] = if offset >= entry.data.len() {
            &[]
        } else {
            let end = match fmt.limit {
                Some(limit) => (offset + limit).min(entry.data.len()),
                None => entry.data.len(),
            };
            &entry.data[offset..end]
        };
        Ok(slice
            .iter()
            .map(|e| render_elem(e, fmt.as_lines))
            .collect())
    }

    pub fn elements(&self, handle: &str) -> Result<&[Elem], InvalidHandle> {
        self.entries
            .get(handle)
            .map(|e| e.data.as_slice())
            .ok_or_else(|| InvalidHandle(handle.to_string()))
    }

    pub fn drop_handle(&mut self, handle: &str) {
        self.entries.remove(handle);
        if self.results.as_deref() == Some(handle) {
            self.results = None;
        }
    }

    pub fn list(&self) -> Vec<String> {
        let mut v: Vec<String> = self.entries.keys().cloned().collect();
        v.sort_by_key(|h| h[4..].parse::<u64>().unwrap_or(0));
        v
    }

    pub fn set_results(&mut self, handle: &str) {
        self.results = Some(handle.to_string());
    }

    pub fn get_results(&self) -> Option<&str> {
        self.results.as_deref()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.entries.contains_key(handle)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn render_elem(e: &Elem, as_lines: bool) -> String {
    if as_lines {
        if let Elem::Line(l) = e {
            return format!("[{}] {}", l.line_num, l.content);
        }
    }
    e.preview_text()
}

fn truncate_preview(s: &str) -> String {
    const MAX: usize = 80;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX - 1).collect();
        format!("{}…", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_stub_reports_count_and_preview() {
        let mut reg = HandleRegistry::new();
        let h = reg.create(
            vec![Elem::Str("hello".into()), Elem::Str("world".into())],
            "array",
        );
        let stub = reg.stub_for(&h).unwrap();
        assert_eq!(stub.count, 2);
        assert_eq!(stub.preview, "hello");
        assert!(stub.handle.starts_with("$res"));
        let full_repr = format!(
            "{}{}{}{}",
            stub.handle, stub.type_descriptor, stub.count, stub.preview
        );
        assert!(full_repr.len() <= 100);
    }

    #[test]
    fn expand_with_no_bounds_returns_all() {
        let mut reg = HandleRegistry::new();
        let h = reg.create(
            vec![Elem::Num(1.0), Elem::Num(2.0), Elem::Num(3.0)],
            "array",
        );
        let all = reg.expand(&h, ExpandFormat::default()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn expand_with_offset_and_limit_slices() {
        let mut reg = HandleRegistry::new();
        let h = reg.create(
            vec![Elem::Num(1.0), Elem::Num(2.0), Elem::Num(3.0)],
            "array",
        );
        let slice = reg
            .expand(
                &h,
                ExpandFormat {
                    offset: Some(1),
                    limit: Some(1),
                    as_lines: false,
                },
            )
            .unwrap();
        assert_eq!(slice, vec!["2".to_string()]);
    }

    #[test]
    fn drop_then_expand_fails_invalid_handle() {
        let mut reg = HandleRegistry::new();
        let h = reg.create(vec![Elem::Num(1.0)], "array");
        reg.drop_handle(&h);
        assert!(reg.expand(&h, ExpandFormat::default()).is_err());
    }

    #[test]
    fn unknown_handle_fails_invalid_handle() {
        let reg = HandleRegistry::new();
        assert!(reg.stub_for("$res999").is_err());
    }
}
