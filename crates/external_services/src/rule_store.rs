//! JSON file backed rule store.
//!
//! The file holds a pretty-printed array of records:
//!
//! ```json
//! [
//!   { "id": 1, "operationKey": "Microsoft.Sql/servers/failoverGroups/failover/action",
//!     "eventTypeKey": "Microsoft.Resources.ResourceActionSuccess", "label": "Failover" }
//! ]
//! ```
//!
//! Records written by older tooling use `actionName`/`eventType`/`status`;
//! those are accepted on read.

use crate::error::Result;
use async_trait::async_trait;
use normalizer::{RuleEntry, RuleStore};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A rule entry as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRule {
    #[serde(default)]
    pub id: u64,
    #[serde(alias = "actionName")]
    pub operation_key: String,
    #[serde(alias = "eventType")]
    pub event_type_key: String,
    #[serde(alias = "status")]
    pub label: String,
}

impl StoredRule {
    fn new(id: u64, entry: RuleEntry) -> Self {
        Self {
            id,
            operation_key: entry.operation_key,
            event_type_key: entry.event_type_key,
            label: entry.label,
        }
    }
}

impl From<StoredRule> for RuleEntry {
    fn from(rule: StoredRule) -> Self {
        RuleEntry::new(rule.operation_key, rule.event_type_key, rule.label)
    }
}

/// Rule store persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonRuleStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonRuleStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };

        let count = store.read_records().await?.len();
        info!("Opened rule store {} ({} rules)", store.path.display(), count);

        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records with their identifiers.
    pub async fn records(&self) -> Result<Vec<StoredRule>> {
        self.read_records().await
    }

    async fn read_records(&self) -> Result<Vec<StoredRule>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Rule file {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    async fn write_records(&self, records: &[StoredRule]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Append `entry` with the next free identifier.
    pub async fn insert(&self, entry: RuleEntry) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_records().await?;
        let id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        records.push(StoredRule::new(id, entry));
        self.write_records(&records).await?;

        debug!("Stored rule {} in {}", id, self.path.display());
        Ok(id)
    }
}

#[async_trait]
impl RuleStore for JsonRuleStore {
    async fn load_all(&self) -> anyhow::Result<Vec<RuleEntry>> {
        Ok(self
            .read_records()
            .await?
            .into_iter()
            .map(RuleEntry::from)
            .collect())
    }

    async fn append(&self, entry: RuleEntry) -> anyhow::Result<u64> {
        Ok(self.insert(entry).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normalizer::RuleTable;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        let store = JsonRuleStore::open(&path).await.unwrap();

        let first = store
            .append(RuleEntry::new("op/a", "Evt.A", "Started"))
            .await
            .unwrap();
        let second = store
            .append(RuleEntry::new("op/b", "Evt.B", "Stopped"))
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let reopened = JsonRuleStore::open(&path).await.unwrap();
        let entries = reopened.load_all().await.unwrap();
        assert_eq!(
            entries,
            vec![
                RuleEntry::new("op/a", "Evt.A", "Started"),
                RuleEntry::new("op/b", "Evt.B", "Stopped"),
            ]
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  {"));
        assert!(contents.contains("\"operationKey\""));
    }

    #[tokio::test]
    async fn test_reads_legacy_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eventslist.json");
        std::fs::write(
            &path,
            r#"[
                {"id": 7, "actionName": "Microsoft.Compute/virtualMachines/start/action",
                 "eventType": "Microsoft.Resources.ResourceActionSuccess", "status": "Started"}
            ]"#,
        )
        .unwrap();

        let store = JsonRuleStore::open(&path).await.unwrap();
        let records = store.records().await.unwrap();
        assert_eq!(records[0].id, 7);
        assert_eq!(records[0].label, "Started");

        let next = store.append(RuleEntry::new("x", "y", "z")).await.unwrap();
        assert_eq!(next, 8);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(JsonRuleStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_rule_table_reload_sees_appended_rules() {
        let dir = TempDir::new().unwrap();
        let store = JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap();
        let table = RuleTable::new();

        assert_eq!(table.reload_from(&store).await.unwrap(), 0);

        store
            .append(RuleEntry::new("Op/Restart", "Evt.Success", "Restarted"))
            .await
            .unwrap();
        assert_eq!(table.reload_from(&store).await.unwrap(), 1);
        assert_eq!(
            table.lookup("op/restart", "evt.success").as_deref(),
            Some("Restarted")
        );
    }
}
