//! Rule table gating normalization.
//!
//! Maps `operationName -> (eventType -> action label)`. Keys are lower-cased on
//! load and on lookup. The whole table is swapped in one pointer store, so a
//! concurrent lookup sees either the old or the new table, never a mix.

use crate::traits::RuleStore;
use anyhow::Result;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A single `(operation, eventType) -> label` rule.
///
/// Accepts the legacy store field names (`actionName`, `eventType`, `status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEntry {
    #[serde(alias = "actionName")]
    pub operation_key: String,
    #[serde(alias = "eventType")]
    pub event_type_key: String,
    #[serde(alias = "status")]
    pub label: String,
}

impl RuleEntry {
    pub fn new(
        operation_key: impl Into<String>,
        event_type_key: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            operation_key: operation_key.into(),
            event_type_key: event_type_key.into(),
            label: label.into(),
        }
    }
}

type RuleMap = HashMap<String, HashMap<String, String>>;

/// In-memory two-level rule table.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: ArcSwap<RuleMap>,
}

impl RuleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table populated from `entries`.
    pub fn from_entries(entries: impl IntoIterator<Item = RuleEntry>) -> Self {
        let table = Self::new();
        table.load(entries);
        table
    }

    /// Replace the table contents. Later duplicates win.
    pub fn load(&self, entries: impl IntoIterator<Item = RuleEntry>) {
        let mut map: RuleMap = HashMap::new();
        for entry in entries {
            map.entry(entry.operation_key.to_lowercase())
                .or_default()
                .insert(entry.event_type_key.to_lowercase(), entry.label);
        }
        self.rules.store(Arc::new(map));
    }

    /// Reload from a rule store, returning the number of rules loaded.
    pub async fn reload_from(&self, store: &dyn RuleStore) -> Result<usize> {
        let entries = store.load_all().await?;
        let count = entries.len();
        self.load(entries);
        info!("Rule table reloaded with {} rules", count);
        Ok(count)
    }

    /// Resolve the action label for an `(operation, eventType)` pair.
    ///
    /// `None` means no rule. `Some("")` is a rule with an empty label.
    pub fn lookup(&self, operation_key: &str, event_type_key: &str) -> Option<String> {
        let rules = self.rules.load();
        rules
            .get(&operation_key.to_lowercase())?
            .get(&event_type_key.to_lowercase())
            .cloned()
    }

    /// Number of `(operation, eventType)` pairs in the table.
    pub fn len(&self) -> usize {
        self.rules.load().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
