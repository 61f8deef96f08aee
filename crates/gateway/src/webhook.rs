//! HTTP ingest and admin handlers.
//!
//! The ingest contract with the notification source is a fast 200: once a
//! body parses, neither normalization nor delivery problems change the
//! response. Only unparsable bodies and failed GET handshakes are 400s.

use crate::error::{GatewayError, Result};
use crate::handshake::{self, ValidationQuery, ValidationResponse};
use crate::protocol::EventNotice;
use crate::ws_server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use external_services::azure::SqlServerSummary;
use metrics::counter;
use normalizer::{AlertAdapter, CanonicalSlot, NormalizedBatch, RawEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of an ingest request.
#[derive(Debug)]
enum Ingest {
    Handshake(ValidationResponse),
    Batch(NormalizedBatch),
}

/// Interpret a JSON body as a batch. A single object becomes a batch of one.
///
/// Elements are kept as posted; their field types are never a reason to
/// reject the body.
pub fn parse_batch(value: Value) -> Result<Vec<RawEvent>> {
    match value {
        Value::Array(items) => Ok(items.into_iter().map(RawEvent::from).collect()),
        Value::Object(_) => Ok(vec![RawEvent::from(value)]),
        other => Err(GatewayError::InvalidRequest(format!(
            "expected an event object or array, got {}",
            other
        ))),
    }
}

async fn ingest(state: &AppState, body: &[u8]) -> Result<Ingest> {
    let value: Value = serde_json::from_slice(body)?;

    if AlertAdapter::is_alert(&value) {
        match state.alerts.transform(value.clone()) {
            Ok(event) => {
                counter!("gateway_webhook_batches_total", "kind" => "alert").increment(1);
                return Ok(Ingest::Batch(NormalizedBatch::Canonical(vec![
                    CanonicalSlot::Event(Box::new(event)),
                ])));
            }
            Err(e) => warn!("Alert could not be rewritten, treating as event: {}", e),
        }
    }

    let batch = parse_batch(value)?;

    if let Some(response) = handshake::detect_first(&batch) {
        counter!("gateway_handshakes_total").increment(1);
        return Ok(Ingest::Handshake(response));
    }

    counter!("gateway_webhook_batches_total", "kind" => "event").increment(1);
    Ok(Ingest::Batch(state.normalizer.normalize(batch).await))
}

/// `POST /webhook`: answer handshakes, otherwise normalize and broadcast.
pub async fn post_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    match ingest(&state, &body).await? {
        Ingest::Handshake(response) => Ok(Json(response).into_response()),
        Ingest::Batch(batch) => {
            let outcome = state.hub.broadcast(&batch);
            debug!(
                "Webhook batch of {} broadcast to {} subscribers",
                batch.len(),
                outcome.delivered
            );
            Ok(StatusCode::OK.into_response())
        }
    }
}

/// `POST /webhook-local`: like `/webhook` but returns the batch instead of
/// broadcasting it.
pub async fn post_webhook_local(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    match ingest(&state, &body).await? {
        Ingest::Handshake(response) => Ok(Json(response).into_response()),
        Ingest::Batch(batch) => Ok(Json(batch).into_response()),
    }
}

/// `GET /webhook?validationCode=...`
pub async fn get_webhook(Query(query): Query<ValidationQuery>) -> Result<String> {
    handshake::echo_query(query)
}

/// `POST /eventgrid`: raw per-event delivery without normalization.
pub async fn post_eventgrid(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let batch = parse_batch(serde_json::from_slice(&body)?)?;

    if let Some(response) = handshake::detect_any(&batch) {
        counter!("gateway_handshakes_total").increment(1);
        return Ok(Json(response).into_response());
    }

    for event in &batch {
        state.hub.broadcast(&EventNotice::of(event));
    }
    counter!("gateway_webhook_batches_total", "kind" => "eventgrid").increment(1);

    Ok("Events processed".into_response())
}

#[derive(Debug, Serialize)]
pub struct RulesReloaded {
    pub rules: usize,
}

/// `POST /rules/reload`
pub async fn reload_rules(State(state): State<Arc<AppState>>) -> Result<Json<RulesReloaded>> {
    let rules = state
        .normalizer
        .rules()
        .reload_from(state.rule_store.as_ref())
        .await?;
    Ok(Json(RulesReloaded { rules }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListing {
    pub resource_group_name: String,
    pub resources: Vec<SqlServerSummary>,
}

/// `GET /resources/{subscriptionId}/{resourceGroupName}`
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Path((subscription_id, resource_group_name)): Path<(String, String)>,
) -> Result<Json<ResourceListing>> {
    let resources = state
        .inventory
        .list_sql_servers(&subscription_id, &resource_group_name)
        .await
        .map_err(|e| {
            error!("Error fetching resources: {}", e);
            GatewayError::from(e)
        })?;

    info!(
        "Resource listing for {}: {} SQL servers",
        resource_group_name,
        resources.len()
    );
    Ok(Json(ResourceListing {
        resource_group_name,
        resources,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub rules: usize,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.connection_count(),
        rules: state.normalizer.rules().len(),
    })
}
