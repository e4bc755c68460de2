//! Bindings: a map from name to handle. `RESULTS` always points at the
//! most recent collection-producing turn; `_1..._N` point at turn N's
//! result. Scalar turn results bypass the registry entirely and are
//! never represented here — there is nothing to point a name at.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Bindings {
    map: HashMap<String, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, handle: impl Into<String>) {
        self.map.insert(name.into(), handle.into());
    }

    pub fn set_results(&mut self, handle: impl Into<String>) {
        self.set("RESULTS", handle);
    }

    pub fn set_turn(&mut self, turn: u32, handle: impl Into<String>) {
        self.set(format!("_{}", turn), handle);
    }

    pub fn names(&self) -> Vec<&str> {
        self.map.keys().map(String::as_str).collect()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.map.clone()
    }

    pub fn restore(&mut self, snapshot: HashMap<String, String>) {
        self.map = snapshot;
    }

    /// A short rendering of current bindings for inclusion in the next
    /// prompt, e.g. `RESULTS=$res3, _1=$res1, _2=$res3`.
    pub fn render_short(&self) -> String {
        let mut names: Vec<&String> = self.map.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| format!("{}={}", n, self.map[n]))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
