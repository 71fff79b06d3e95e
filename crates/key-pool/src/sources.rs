//! Raw key sources gathered from the deployment environment
//!
//! Keys arrive from three places: a freeform alias list, bulk comma-separated
//! lists, and legacy per-task numbered variables. Any of them may be missing.
//! `KeyPool::load` merges and deduplicates them.

use std::collections::HashMap;
use std::fmt;

use crate::task::TaskType;

/// Freeform alias variable holding a comma-separated list.
const ALIAS_VAR: &str = "keys";

/// Bulk list variables; each may hold one key or a comma-separated list.
const BULK_VARS: &[&str] = &["GEMINI_API_KEYS", "GEMINI_API_KEY"];

/// Legacy numbered variables and the task each one is dedicated to.
const LEGACY_VARS: &[(&str, TaskType)] = &[
    ("1_GEMINI_API_KEY", TaskType::Notes),
    ("2_GEMINI_API_KEY", TaskType::Flashcards),
    ("3_GEMINI_API_KEY", TaskType::MindMap),
    ("4_GEMINI_API_KEY", TaskType::Quiz),
];

/// Unmerged key material. Values may contain commas and whitespace; splitting
/// and trimming happens in `KeyPool::load`.
#[derive(Default, Clone)]
pub struct KeySources {
    /// Freeform alias list
    pub alias: Option<String>,
    /// Bulk lists, in priority order
    pub bulk: Vec<String>,
    /// Legacy single keys
    pub legacy: Vec<String>,
    /// Preferred key per task
    pub affinity: HashMap<TaskType, String>,
}

impl KeySources {
    /// Read all sources from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read all sources through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let alias = present(ALIAS_VAR);
        let bulk = BULK_VARS.iter().filter_map(|name| present(name)).collect();

        let mut legacy = Vec::new();
        let mut affinity = HashMap::new();
        for (name, task) in LEGACY_VARS {
            if let Some(value) = present(name) {
                affinity.insert(*task, value.trim().to_string());
                legacy.push(value);
            }
        }

        Self {
            alias,
            bulk,
            legacy,
            affinity,
        }
    }

    /// Append another bulk list (e.g. the contents of a keys file).
    pub fn push_bulk(&mut self, list: impl Into<String>) {
        self.bulk.push(list.into());
    }

    /// Every key string in load order: alias, bulk, legacy. Lists are split
    /// on commas and newlines, entries trimmed, empties dropped. Duplicates
    /// are kept; the pool removes them.
    pub fn entries(&self) -> Vec<String> {
        self.alias
            .iter()
            .chain(self.bulk.iter())
            .chain(self.legacy.iter())
            .flat_map(|list| split_list(list))
            .collect()
    }
}

impl fmt::Debug for KeySources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tasks: Vec<&str> = self.affinity.keys().map(TaskType::label).collect();
        tasks.sort_unstable();
        f.debug_struct("KeySources")
            .field("entries", &self.entries().len())
            .field("affinity", &tasks)
            .finish()
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split([',', '\n'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
