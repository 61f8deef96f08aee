//! Event normalization for resource-change notifications.
//!
//! A raw batch is checked against the [`RuleTable`]. When its first element
//! has a rule, every element is rewritten into a [`CanonicalEvent`]; SQL
//! failover events are additionally enriched with live replica topology from
//! a [`TopologyProvider`]. Otherwise the batch passes through unchanged.
//!
//! # Architecture
//!
//! ```text
//! RawEvent[] --> RuleTable gate --> per-event transform --> NormalizedBatch
//!                                     |
//!                                     +--> UriTemplate --> TopologyProvider
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use normalizer::{NoTopology, Normalizer, NormalizerConfig, RuleTable};
//!
//! let rules = Arc::new(RuleTable::new());
//! rules.reload_from(&store).await?;
//!
//! let normalizer = Normalizer::new(rules, Arc::new(NoTopology), NormalizerConfig::default());
//! let batch = normalizer.normalize(events).await;
//! ```

pub mod azure_monitor;
pub mod rules;
pub mod schema;
pub mod service;
pub mod traits;
pub mod uri_template;

// Re-export core types
pub use rules::{RuleEntry, RuleTable};
pub use schema::{
    AppEventTypeDetail, CanonicalEvent, CanonicalEventData, CanonicalSlot, FailoverCustomData,
    FailoverGroupRef, FailoverTopology, HttpRequestInfo, NormalizedBatch, PartnerServer, RawEvent,
};
pub use service::{Normalizer, NormalizerConfig, SQL_FAILOVER_GROUP_TEMPLATE, SQL_FAILOVER_OPERATION};
pub use traits::{NoTopology, RuleStore, TopologyProvider};
pub use uri_template::{TemplateError, UriTemplate};

pub use azure_monitor::{AlertAdapter, AlertError};
