//! Concrete collaborators for the normalizer and gateway.
//!
//! - [`JsonRuleStore`]: rule entries persisted as a JSON file
//! - [`azure::ArmClient`]: Azure Resource Manager REST client, used as the
//!   live failover topology source and for the SQL server inventory
//!
//! # Example
//!
//! ```ignore
//! use external_services::azure::ArmClient;
//! use external_services::JsonRuleStore;
//!
//! let store = JsonRuleStore::open("eventslist.json").await?;
//! let client = ArmClient::new("https://management.azure.com").with_access_token(token);
//! let servers = client.list_sql_servers("sub-1", "rg-1").await?;
//! ```

pub mod azure;
pub mod error;
pub mod rule_store;

pub use error::{Error, Result};
pub use rule_store::{JsonRuleStore, StoredRule};
