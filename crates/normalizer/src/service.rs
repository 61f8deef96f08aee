//! Batch normalizer.
//!
//! The first element of a batch decides whether the batch is transformed at
//! all. When it is, every element is transformed on its own with its own rule
//! lookup, concurrently, and results keep input order.
//!
//! NOTE: a batch that mixes unrelated operations is gated by its first
//! element only. This is kept as observed; see DESIGN.md.

use crate::rules::RuleTable;
use crate::schema::{
    AppEventTypeDetail, CanonicalEvent, CanonicalEventData, CanonicalSlot, FailoverCustomData,
    FailoverGroupRef, FailoverTopology, NormalizedBatch, RawEvent,
};
use crate::traits::TopologyProvider;
use crate::uri_template::UriTemplate;
use futures::future::join_all;
use metrics::counter;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Operation that triggers topology enrichment.
pub const SQL_FAILOVER_OPERATION: &str = "Microsoft.Sql/servers/failoverGroups/failover/action";

/// Shape of a failover-group subject.
pub const SQL_FAILOVER_GROUP_TEMPLATE: &str = "/subscriptions/{subscriptionId}/resourceGroups/{resourceGroup}/providers/Microsoft.Sql/servers/{server}/failoverGroups/{failoverGroup}";

/// Suffix appended to a server id to address its master database.
const MASTER_DATABASE_SUFFIX: &str = "/databases/master";

/// Default version stamped on canonical events when the input has none.
const DEFAULT_VERSION: &str = "1";

static FAILOVER_GROUP_MATCHER: LazyLock<UriTemplate> = LazyLock::new(|| {
    UriTemplate::compile(SQL_FAILOVER_GROUP_TEMPLATE).expect("failover-group template is valid")
});

/// Normalizer configuration.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Upper bound on a single topology lookup.
    pub topology_timeout: Duration,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            topology_timeout: Duration::from_secs(5),
        }
    }
}

/// Rewrites raw event batches into canonical envelopes.
pub struct Normalizer {
    rules: Arc<RuleTable>,
    topology: Arc<dyn TopologyProvider>,
    config: NormalizerConfig,
}

impl Normalizer {
    /// Create a new normalizer.
    pub fn new(
        rules: Arc<RuleTable>,
        topology: Arc<dyn TopologyProvider>,
        config: NormalizerConfig,
    ) -> Self {
        Self {
            rules,
            topology,
            config,
        }
    }

    /// The rule table this normalizer reads.
    pub fn rules(&self) -> &Arc<RuleTable> {
        &self.rules
    }

    /// Normalize a batch.
    ///
    /// Never fails: missing rules pass the batch through, and enrichment
    /// problems only drop `customData`.
    pub async fn normalize(&self, batch: Vec<RawEvent>) -> NormalizedBatch {
        let Some(first) = batch.first() else {
            return NormalizedBatch::PassThrough(batch);
        };

        if self
            .rules
            .lookup(first.operation_name(), first.event_type())
            .is_none()
        {
            debug!(
                "No rule for ({}, {}), passing batch of {} through",
                first.operation_name(),
                first.event_type(),
                batch.len()
            );
            counter!("normalizer_batches_total", "outcome" => "pass_through").increment(1);
            return NormalizedBatch::PassThrough(batch);
        }

        let slots = join_all(batch.iter().map(|event| self.transform_event(event))).await;

        info!("Normalized batch of {} events", slots.len());
        counter!("normalizer_batches_total", "outcome" => "transformed").increment(1);

        NormalizedBatch::Canonical(slots)
    }

    /// Transform a single element using its own rule.
    async fn transform_event(&self, event: &RawEvent) -> CanonicalSlot {
        let operation = event.operation_name();
        let Some(action) = self.rules.lookup(operation, event.event_type()) else {
            counter!("normalizer_events_total", "outcome" => "hole").increment(1);
            return CanonicalSlot::Hole;
        };

        let custom_data = if operation.eq_ignore_ascii_case(SQL_FAILOVER_OPERATION) {
            self.enrich_failover(event.subject()).await
        } else {
            None
        };

        counter!("normalizer_events_total", "outcome" => "transformed").increment(1);

        CanonicalSlot::Event(Box::new(build_canonical(event, action, custom_data)))
    }

    /// Look up the failover group named by `subject` and derive replica topics.
    async fn enrich_failover(&self, subject: &str) -> Option<FailoverCustomData> {
        let Some(group) = parse_failover_group(subject) else {
            warn!("Subject does not name a failover group: {}", subject);
            counter!("normalizer_enrichment_failures_total", "reason" => "malformed_subject")
                .increment(1);
            return None;
        };

        let lookup = self.topology.get_failover_group(&group);
        let topology = match tokio::time::timeout(self.config.topology_timeout, lookup).await {
            Ok(Ok(Some(topology))) => topology,
            Ok(Ok(None)) => {
                warn!("Failover group {} not found", group.failover_group);
                counter!("normalizer_enrichment_failures_total", "reason" => "not_found")
                    .increment(1);
                return None;
            }
            Ok(Err(e)) => {
                warn!(
                    "Topology lookup for {} failed: {:?}",
                    group.failover_group, e
                );
                counter!("normalizer_enrichment_failures_total", "reason" => "provider_error")
                    .increment(1);
                return None;
            }
            Err(_) => {
                warn!(
                    "Topology lookup for {} timed out after {:?}",
                    group.failover_group, self.config.topology_timeout
                );
                counter!("normalizer_enrichment_failures_total", "reason" => "timeout")
                    .increment(1);
                return None;
            }
        };

        let custom_data = failover_custom_data(&topology);
        if custom_data.is_none() {
            warn!(
                "Topology for {} is missing partner data",
                group.failover_group
            );
            counter!("normalizer_enrichment_failures_total", "reason" => "incomplete").increment(1);
        }
        custom_data
    }
}

/// Extract failover-group coordinates from an event subject.
pub fn parse_failover_group(subject: &str) -> Option<FailoverGroupRef> {
    let mut params = FAILOVER_GROUP_MATCHER.matches(subject)?;
    Some(FailoverGroupRef {
        subscription_id: params.remove("subscriptionId")?,
        resource_group: params.remove("resourceGroup")?,
        server: params.remove("server")?,
        failover_group: params.remove("failoverGroup")?,
    })
}

/// Derive both replica topics from a topology.
///
/// `None` when either the group id or the first partner lacks a server scope.
pub fn failover_custom_data(topology: &FailoverTopology) -> Option<FailoverCustomData> {
    let partner = topology.partner_servers.first()?;
    let own_server = server_scope(&topology.group_id)?;
    let partner_server = server_scope(&partner.id)?;

    Some(FailoverCustomData {
        topic1: format!("{}{}", own_server, MASTER_DATABASE_SUFFIX),
        topic1_status: topology.replication_role.clone(),
        topic2: format!("{}{}", partner_server, MASTER_DATABASE_SUFFIX),
        topic2_status: partner.replication_role.clone(),
    })
}

/// Truncate a SQL resource id just after its
/// `/providers/Microsoft.Sql/servers/{name}` segment.
pub fn server_scope(resource_id: &str) -> Option<&str> {
    const MARKER: &str = "/providers/microsoft.sql/servers/";

    // ASCII lower-casing keeps byte offsets.
    let start = resource_id.to_ascii_lowercase().find(MARKER)? + MARKER.len();
    let name_len = resource_id[start..]
        .find('/')
        .unwrap_or(resource_id.len() - start);

    if name_len == 0 {
        return None;
    }
    Some(&resource_id[..start + name_len])
}

/// Last `/`-delimited segment of a path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}

fn build_canonical(
    event: &RawEvent,
    action: String,
    custom_data: Option<FailoverCustomData>,
) -> CanonicalEvent {
    let http = event.http_request().unwrap_or_default();
    let owned = |value: Option<&str>| value.unwrap_or_default().to_string();

    let subject = event.subject().to_string();
    let topic = event
        .resource_uri()
        .map(str::to_string)
        .unwrap_or_else(|| subject.clone());

    CanonicalEvent {
        id: owned(event.id()),
        event_type: event.event_type().to_string(),
        data: CanonicalEventData {
            app_event_type_detail: AppEventTypeDetail {
                action,
                custom_data,
            },
            name: last_segment(&subject).to_string(),
            client_request_id: http.client_request_id.unwrap_or_default(),
            correlation_id: owned(event.correlation_id()),
            request_id: owned(event.request_id()),
            address: http.url.unwrap_or_default(),
            verb: http.method.unwrap_or_default(),
        },
        topic,
        subject,
        data_version: event
            .data_version()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        metadata_version: event
            .metadata_version()
            .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        event_time: owned(event.event_time()),
    }
}
