//! Collaborator interfaces the normalizer depends on.
//!
//! The normalizer never talks to a concrete cloud client or storage backend;
//! it only sees these narrow contracts. `external_services` provides the
//! production implementations.

use crate::rules::RuleEntry;
use crate::schema::{FailoverGroupRef, FailoverTopology};
use anyhow::Result;
use async_trait::async_trait;

/// Source of live failover-group topology.
#[async_trait]
pub trait TopologyProvider: Send + Sync + 'static {
    /// Fetch the current topology of a failover group.
    ///
    /// `Ok(None)` means the group does not exist.
    async fn get_failover_group(&self, group: &FailoverGroupRef) -> Result<Option<FailoverTopology>>;
}

/// Persistent store of rule entries.
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// All stored entries, in store order.
    async fn load_all(&self) -> Result<Vec<RuleEntry>>;

    /// Persist a new entry and return its identifier.
    async fn append(&self, entry: RuleEntry) -> Result<u64>;
}

/// Provider used when no cloud credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTopology;

#[async_trait]
impl TopologyProvider for NoTopology {
    async fn get_failover_group(&self, _group: &FailoverGroupRef) -> Result<Option<FailoverTopology>> {
        Ok(None)
    }
}
