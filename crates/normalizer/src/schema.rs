//! Event envelope schema definitions.
//!
//! `RawEvent` holds an element exactly as the notification source posted it.
//! Fields are read through accessors that treat a missing or mistyped field
//! as absent, so any JSON element is accepted and a batch that is passed
//! through serializes back to the same JSON.
//!
//! `CanonicalEvent` is the normalized shape pushed to subscribers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Accept either an object or a JSON-encoded string holding an object.
pub(crate) fn object_or_json_string<'de, D>(deserializer: D) -> Result<Option<HttpRequestInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// One resource-change notification as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Value);

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl RawEvent {
    /// The element as posted.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Top-level field, whatever its type.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `data` payload, whatever its type.
    pub fn data(&self) -> Option<&Value> {
        self.get("data")
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn data_text(&self, key: &str) -> Option<&str> {
        self.data().and_then(|d| d.get(key)).and_then(Value::as_str)
    }

    /// Version fields are strings on the wire but some sources send numbers.
    fn version(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.text("id")
    }

    /// Event type, or empty when absent.
    pub fn event_type(&self) -> &str {
        self.text("eventType").unwrap_or_default()
    }

    /// Subject path, or empty when absent.
    pub fn subject(&self) -> &str {
        self.text("subject").unwrap_or_default()
    }

    pub fn event_time(&self) -> Option<&str> {
        self.text("eventTime")
    }

    pub fn data_version(&self) -> Option<String> {
        self.version("dataVersion")
    }

    pub fn metadata_version(&self) -> Option<String> {
        self.version("metadataVersion")
    }

    /// `data.operationName`, or empty when absent.
    pub fn operation_name(&self) -> &str {
        self.data_text("operationName").unwrap_or_default()
    }

    /// `data.validationCode` if the source sent one.
    pub fn validation_code(&self) -> Option<&str> {
        self.data_text("validationCode")
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.data_text("correlationId")
    }

    pub fn request_id(&self) -> Option<&str> {
        self.data_text("requestId")
    }

    pub fn resource_uri(&self) -> Option<&str> {
        self.data_text("resourceUri")
    }

    /// `data.httpRequest`, sent either as an object or as a JSON string.
    pub fn http_request(&self) -> Option<HttpRequestInfo> {
        HttpRequestInfo::from_value(self.data()?.get("httpRequest")?)
    }
}

/// The management-plane request that caused the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl HttpRequestInfo {
    /// Decode an object or a JSON string holding one. Anything else is `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let decoded;
        let object = match value {
            Value::String(s) => {
                decoded = serde_json::from_str::<Value>(s).ok()?;
                decoded.as_object()?
            }
            other => other.as_object()?,
        };
        let field = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        Some(Self {
            client_request_id: field("clientRequestId"),
            client_ip_address: field("clientIpAddress"),
            method: field("method"),
            url: field("url"),
        })
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Normalized event pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    pub subject: String,
    pub event_type: String,
    pub data: CanonicalEventData,
    pub topic: String,
    pub data_version: String,
    pub metadata_version: String,
    pub event_time: String,
}

/// Payload of a [`CanonicalEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEventData {
    pub app_event_type_detail: AppEventTypeDetail,
    /// Last path segment of the subject.
    pub name: String,
    pub client_request_id: String,
    pub correlation_id: String,
    pub request_id: String,
    pub address: String,
    pub verb: String,
}

/// Action label resolved from the rule table, plus optional enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEventTypeDetail {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<FailoverCustomData>,
}

/// Replica endpoints and roles after a failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverCustomData {
    pub topic1: String,
    pub topic1_status: String,
    pub topic2: String,
    pub topic2_status: String,
}

/// One position of a transformed batch.
///
/// Elements without a rule of their own stay in place as an empty object.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalSlot {
    Event(Box<CanonicalEvent>),
    Hole,
}

impl CanonicalSlot {
    /// The event in this slot, if any.
    pub fn event(&self) -> Option<&CanonicalEvent> {
        match self {
            CanonicalSlot::Event(event) => Some(event),
            CanonicalSlot::Hole => None,
        }
    }
}

impl Serialize for CanonicalSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CanonicalSlot::Event(event) => event.serialize(serializer),
            CanonicalSlot::Hole => {
                use serde::ser::SerializeMap;
                serializer.serialize_map(Some(0))?.end()
            }
        }
    }
}

/// Result of normalizing a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedBatch {
    /// No rule matched the first element; the input is returned as-is.
    PassThrough(Vec<RawEvent>),
    /// Every element was rewritten, preserving input order.
    Canonical(Vec<CanonicalSlot>),
}

impl NormalizedBatch {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, NormalizedBatch::PassThrough(_))
    }

    pub fn len(&self) -> usize {
        match self {
            NormalizedBatch::PassThrough(events) => events.len(),
            NormalizedBatch::Canonical(slots) => slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for NormalizedBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NormalizedBatch::PassThrough(events) => events.serialize(serializer),
            NormalizedBatch::Canonical(slots) => slots.serialize(serializer),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Coordinates of a SQL failover group, extracted from an event subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailoverGroupRef {
    pub subscription_id: String,
    pub resource_group: String,
    pub server: String,
    pub failover_group: String,
}

/// Current replication topology of a failover group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverTopology {
    /// Full resource id of the failover group.
    pub group_id: String,
    /// Role of the server that owns `group_id`.
    pub replication_role: String,
    pub partner_servers: Vec<PartnerServer>,
}

/// A partner server in a failover group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerServer {
    pub id: String,
    pub replication_role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_round_trip_keeps_unknown_fields() {
        let json = serde_json::json!({
            "id": "e1",
            "eventType": "Microsoft.Resources.ResourceWriteSuccess",
            "subject": "/subscriptions/s/resourceGroups/rg",
            "data": {
                "operationName": "Microsoft.Resources/tags/write",
                "status": "Succeeded",
                "claims": { "aud": "x" }
            },
            "dataVersion": "2",
            "metadataVersion": "1",
            "eventTime": "2024-01-01T00:00:00Z",
            "topic": "/subscriptions/s"
        });

        let event: RawEvent = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(event.operation_name(), "Microsoft.Resources/tags/write");
        assert_eq!(serde_json::to_value(&event).unwrap(), json);
    }

    #[test]
    fn test_raw_event_keeps_nulls_and_encoded_http_request() {
        let json = serde_json::json!({
            "id": "x",
            "eventType": "E",
            "topic": null,
            "data": {
                "operationName": "op",
                "correlationId": null,
                "httpRequest": "{\"method\":\"GET\"}"
            }
        });

        let event: RawEvent = serde_json::from_value(json.clone()).unwrap();
        assert!(event.correlation_id().is_none());
        assert_eq!(event.http_request().unwrap().method.as_deref(), Some("GET"));
        assert_eq!(serde_json::to_value(&event).unwrap(), json);
    }

    #[test]
    fn test_mistyped_fields_read_as_absent() {
        let event: RawEvent = serde_json::from_value(serde_json::json!({
            "eventType": 7,
            "data": "plain string payload",
            "dataVersion": 1,
            "metadataVersion": true
        }))
        .unwrap();

        assert_eq!(event.event_type(), "");
        assert_eq!(event.operation_name(), "");
        assert!(event.http_request().is_none());
        assert_eq!(event.data_version().as_deref(), Some("1"));
        assert!(event.metadata_version().is_none());
    }

    #[test]
    fn test_non_object_element_is_accepted() {
        let event: RawEvent = serde_json::from_str("42").unwrap();
        assert_eq!(event.subject(), "");
        assert!(event.validation_code().is_none());
        assert_eq!(serde_json::to_string(&event).unwrap(), "42");
    }

    #[test]
    fn test_raw_event_missing_fields_default_to_empty() {
        let event: RawEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(event.event_type(), "");
        assert_eq!(event.operation_name(), "");
        assert_eq!(event.subject(), "");
        assert!(event.validation_code().is_none());
    }

    #[test]
    fn test_http_request_accepts_encoded_string() {
        let json = r#"{
            "data": {
                "httpRequest": "{\"clientRequestId\":\"c1\",\"method\":\"POST\",\"url\":\"https://x/y\"}"
            }
        }"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        let http = event.http_request().unwrap();
        assert_eq!(http.client_request_id.as_deref(), Some("c1"));
        assert_eq!(http.method.as_deref(), Some("POST"));

        let garbled = RawEvent::from(serde_json::json!({ "data": { "httpRequest": "{not json" } }));
        assert!(garbled.http_request().is_none());
    }

    #[test]
    fn test_hole_serializes_as_empty_object() {
        let batch = NormalizedBatch::Canonical(vec![CanonicalSlot::Hole]);
        assert_eq!(serde_json::to_string(&batch).unwrap(), "[{}]");
    }

    #[test]
    fn test_custom_data_field_names() {
        let data = FailoverCustomData {
            topic1: "a".to_string(),
            topic1_status: "Primary".to_string(),
            topic2: "b".to_string(),
            topic2_status: "Secondary".to_string(),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["topic1Status"], "Primary");
        assert_eq!(value["topic2Status"], "Secondary");
    }
}
