//! Indexed line storage with full-text search.
//!
//! Lines are kept in an in-memory `Vec` for ordered access and mirrored
//! into an in-memory SQLite FTS5 table for `search`, the same
//! external-content-plus-triggers pattern used for the vector store's
//! keyword half, minus the embedding column.

use rusqlite::Connection;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Line {
    pub line_num: usize,
    pub content: String,
}

pub struct LineStore {
    lines: Vec<Line>,
    conn: Connection,
}

impl LineStore {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite connection");
        conn.execute_batch(
            "CREATE VIRTUAL TABLE lines_fts USING fts5(content, tokenize = 'unicode61 remove_diacritics 2');",
        )
        .expect("create lines_fts table");
        Self {
            lines: Vec::new(),
            conn,
        }
    }

    /// Splits `text` on `\n`, assigns dense 1-based line numbers, and
    /// atomically replaces any previously loaded content. Returns the
    /// new line count. Empty input yields 0 lines.
    pub fn load(&mut self, text: &str) -> usize {
        self.clear();
        if text.is_empty() {
            return 0;
        }
        let tx = self.conn.transaction().expect("begin transaction");
        {
            let mut stmt = tx
                .prepare("INSERT INTO lines_fts(rowid, content) VALUES (?1, ?2)")
                .expect("prepare insert");
            for (i, content) in text.split('\n').enumerate() {
                let line_num = i + 1;
                stmt.execute(rusqlite::params![line_num as i64, content])
                    .expect("insert line into fts index");
                self.lines.push(Line {
                    line_num,
                    content: content.to_string(),
                });
            }
        }
        tx.commit().expect("commit transaction");
        self.lines.len()
    }

    pub fn get_line_count(&self) -> usize {
        self.lines.len()
    }

    /// Returns lines `[lo, hi]` inclusive, 1-based, clamped to the
    /// valid range. `lo > hi` (after clamping) yields an empty slice.
    pub fn get_lines(&self, lo: usize, hi: usize) -> Vec<Line> {
        let count = self.lines.len();
        if count == 0 {
            return Vec::new();
        }
        let lo = lo.max(1);
        let hi = hi.min(count);
        if lo > hi {
            return Vec::new();
        }
        self.lines[(lo - 1)..hi].to_vec()
    }

    /// Token-level, word-aware, diacritic-folded, case-insensitive
    /// search over line content. A malformed FTS query (bad operator
    /// syntax) returns an empty set rather than erroring.
    pub fn search(&self, query: &str) -> Vec<Line> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let mut stmt = match self
            .conn
            .prepare("SELECT rowid FROM lines_fts WHERE lines_fts MATCH ?1 ORDER BY rowid")
        {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let rowids: Vec<i64> = match stmt.query_map(rusqlite::params![query], |row| row.get(0)) {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(_) => return Vec::new(),
        };
        rowids
            .into_iter()
            .filter_map(|rowid| self.lines.get((rowid as usize).saturating_sub(1)).cloned())
            .collect()
    }

    /// Reassembles the original document text by rejoining loaded lines
    /// with `\n`; the DSL's `input` term reads from this.
    pub fn full_text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.conn
            .execute("DELETE FROM lines_fts", [])
            .expect("clear fts index");
    }
}

impl Default for LineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_counts_lines_by_newlines() {
        let mut store = LineStore::new();
        let n = store.load("a\nb\nc");
        assert_eq!(n, 3);
        assert_eq!(store.get_line_count(), 3);
        assert_eq!(store.get_lines(1, 1)[0].line_num, 1);
    }

    #[test]
    fn empty_text_yields_zero_lines() {
        let mut store = LineStore::new();
        assert_eq!(store.load(""), 0);
    }

    #[test]
    fn get_lines_clamps_out_of_range_bounds() {
        let mut store = LineStore::new();
        store.load("a\nb\nc");
        assert!(store.get_lines(1, 0).is_empty());
        assert_eq!(store.get_lines(0, 10).len(), 3);
    }

    #[test]
    fn search_finds_token_matches_case_insensitively() {
        let mut store = LineStore::new();
        store.load("an ERROR occurred\nall good\nanother error here");
        let hits = store.search("error");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn search_with_malformed_query_returns_empty() {
        let mut store = LineStore::new();
        store.load("a\nb");
        let hits = store.search("\"unterminated");
        assert!(hits.is_empty());
    }

    #[test]
    fn reload_replaces_prior_content_atomically() {
        let mut store = LineStore::new();
        store.load("");
        store.load("x\ny");
        assert_eq!(store.get_line_count(), 2);
    }
}
