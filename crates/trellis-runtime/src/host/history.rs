use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub path: String,
    pub state: Value,
}

/// Session history: a list of entries and a cursor.
///
/// Pushing drops every entry ahead of the cursor. Traversal only moves the
/// cursor; notifying listeners is the document's job.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    index: usize,
}

impl History {
    pub fn new(initial_path: &str) -> Self {
        Self {
            entries: vec![HistoryEntry {
                path: initial_path.to_string(),
                state: Value::Null,
            }],
            index: 0,
        }
    }

    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, path: &str, state: Value) {
        self.entries.truncate(self.index + 1);
        self.entries.push(HistoryEntry {
            path: path.to_string(),
            state,
        });
        self.index = self.entries.len() - 1;
    }

    pub fn replace(&mut self, path: &str, state: Value) {
        self.entries[self.index] = HistoryEntry {
            path: path.to_string(),
            state,
        };
    }

    /// Move the cursor by `delta`. Returns the new entry, or `None` if the
    /// target is out of range (the cursor does not move).
    pub fn go(&mut self, delta: isize) -> Option<&HistoryEntry> {
        let target = self.index.checked_add_signed(delta)?;
        if delta == 0 || target >= self.entries.len() {
            return None;
        }
        self.index = target;
        Some(&self.entries[target])
    }
}
