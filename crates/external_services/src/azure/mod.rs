//! Azure Resource Manager REST client.
//!
//! Provides live SQL failover-group topology to the normalizer and the SQL
//! server inventory served by the gateway.

pub mod client;
pub mod types;

pub use client::{ArmClient, DEFAULT_MANAGEMENT_URL};
pub use types::{FailoverGroupSummary, PartnerServerInfo, SqlServerSummary};

use crate::error::Result;
use async_trait::async_trait;

/// Inventory of SQL servers and their failover groups.
#[async_trait]
pub trait SqlInventory: Send + Sync + 'static {
    /// SQL servers in a resource group, each with its failover groups.
    async fn list_sql_servers(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<Vec<SqlServerSummary>>;
}
