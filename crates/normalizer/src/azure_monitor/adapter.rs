//! Common alert schema → canonical event.

use crate::schema::{
    object_or_json_string, AppEventTypeDetail, CanonicalEvent, CanonicalEventData, HttpRequestInfo,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;

/// Alert rule raised when a VM is deallocated.
pub const VM_DEALLOCATE_RULE: &str = "vm-deallocate-event-rule";

/// Alert rule raised when a VM is started.
pub const VM_START_RULE: &str = "vm-start-event-rule";

static VM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)virtualMachines/([^/]+)").expect("vm name pattern is valid"));

/// Errors rewriting an alert.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("no virtual machine in request path: {0}")]
    NoVirtualMachine(String),
}

/// Adapter for Azure Monitor common alert schema payloads.
#[derive(Debug, Clone)]
pub struct AlertAdapter {
    /// Alert rule name → action label.
    actions: HashMap<String, String>,
}

impl Default for AlertAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertAdapter {
    /// Create an adapter with the VM start/deallocate rules registered.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
        .with_action(VM_DEALLOCATE_RULE, "Stopped")
        .with_action(VM_START_RULE, "Started")
    }

    /// Map an alert rule name to an action label.
    pub fn with_action(mut self, alert_rule: impl Into<String>, action: impl Into<String>) -> Self {
        self.actions.insert(alert_rule.into(), action.into());
        self
    }

    /// Whether `body` looks like a common-alert-schema notification.
    pub fn is_alert(body: &Value) -> bool {
        body.get("data")
            .and_then(|data| data.get("essentials"))
            .is_some_and(Value::is_object)
    }

    /// Rewrite an alert into a single canonical event.
    pub fn transform(&self, body: Value) -> Result<CanonicalEvent, AlertError> {
        let payload: AlertPayload = serde_json::from_value(body)?;
        let essentials = payload.data.essentials;
        let context = payload.data.alert_context;

        let http = context
            .http_request
            .ok_or(AlertError::MissingField("alertContext.httpRequest"))?;
        let address = http
            .url
            .clone()
            .ok_or(AlertError::MissingField("alertContext.httpRequest.url"))?;
        let vm_name = vm_name_from_url(&address)?;

        let subscription_id = essentials
            .alert_id
            .split('/')
            .nth(2)
            .filter(|s| !s.is_empty())
            .ok_or(AlertError::MissingField("essentials.alertId"))?;
        let alert_id = essentials
            .alert_id
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let group_scope = format!(
            "/subscriptions/{}/resourceGroups/{}/providers",
            subscription_id, essentials.target_resource_group
        );
        let action = self
            .actions
            .get(&essentials.alert_rule)
            .cloned()
            .unwrap_or_default();

        Ok(CanonicalEvent {
            id: alert_id,
            subject: format!("{}/Microsoft.Compute/virtualMachines/{}", group_scope, vm_name),
            event_type: context.operation_name,
            data: CanonicalEventData {
                app_event_type_detail: AppEventTypeDetail {
                    action,
                    custom_data: None,
                },
                name: vm_name.clone(),
                client_request_id: http.client_request_id.unwrap_or_default(),
                correlation_id: context.correlation_id,
                request_id: context.event_data_id,
                address,
                verb: http.method.unwrap_or_default(),
            },
            topic: format!(
                "{}/{}/{}",
                group_scope, essentials.target_resource_type, vm_name
            ),
            data_version: "1".to_string(),
            metadata_version: "1".to_string(),
            event_time: context.event_timestamp,
        })
    }
}

fn vm_name_from_url(address: &str) -> Result<String, AlertError> {
    let url = Url::parse(address)?;
    VM_NAME
        .captures(url.path())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| AlertError::NoVirtualMachine(url.path().to_string()))
}

// ============================================================================
// Raw alert types (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct AlertPayload {
    data: AlertData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertData {
    essentials: Essentials,
    alert_context: AlertContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Essentials {
    alert_id: String,
    #[serde(default)]
    alert_rule: String,
    #[serde(default)]
    target_resource_group: String,
    #[serde(default)]
    target_resource_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertContext {
    #[serde(default)]
    operation_name: String,
    #[serde(default)]
    correlation_id: String,
    #[serde(default)]
    event_data_id: String,
    #[serde(default)]
    event_timestamp: String,
    #[serde(default, deserialize_with = "object_or_json_string")]
    http_request: Option<HttpRequestInfo>,
}
