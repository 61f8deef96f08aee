//! Subscription-validation handshake.
//!
//! Before delivering events the notification source posts a validation
//! event carrying a code; echoing it back activates the subscription.

use crate::error::{GatewayError, Result};
use normalizer::RawEvent;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Event type of a subscription-validation event.
pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Body returned to complete the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validation_response: String,
}

/// Query string of the GET variant.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationQuery {
    pub validation_code: Option<String>,
}

/// Check whether `event` is a handshake.
///
/// Either the validation event type or a `data.validationCode` marks one. A
/// handshake without a code is answered with an empty code.
pub fn detect(event: &RawEvent) -> Option<ValidationResponse> {
    let code = event.validation_code();
    let is_validation_event = event.event_type() == SUBSCRIPTION_VALIDATION_EVENT;

    if code.is_none() && !is_validation_event {
        return None;
    }

    if code.is_none() {
        warn!("Validation event without a validation code");
    }
    info!("Answering subscription validation handshake");

    Some(ValidationResponse {
        validation_response: code.unwrap_or_default().to_string(),
    })
}

/// Check the first element of a batch.
pub fn detect_first(batch: &[RawEvent]) -> Option<ValidationResponse> {
    batch.first().and_then(detect)
}

/// Check every element of a batch.
pub fn detect_any(batch: &[RawEvent]) -> Option<ValidationResponse> {
    batch.iter().find_map(detect)
}

/// GET variant: echo the code, or fail when it is missing.
pub fn echo_query(query: ValidationQuery) -> Result<String> {
    match query.validation_code {
        Some(code) if !code.is_empty() => {
            info!("Answering GET validation handshake");
            Ok(code)
        }
        _ => Err(GatewayError::InvalidRequest("Validation failed".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> RawEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_detects_validation_code() {
        let response = detect(&event(json!({ "data": { "validationCode": "abc123" } }))).unwrap();
        assert_eq!(response.validation_response, "abc123");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "validationResponse": "abc123" })
        );
    }

    #[test]
    fn test_detects_validation_event_type() {
        let response = detect(&event(json!({
            "eventType": SUBSCRIPTION_VALIDATION_EVENT,
            "data": { "validationCode": "code-1", "validationUrl": "https://x" }
        })))
        .unwrap();
        assert_eq!(response.validation_response, "code-1");

        let without_code = detect(&event(json!({ "eventType": SUBSCRIPTION_VALIDATION_EVENT }))).unwrap();
        assert_eq!(without_code.validation_response, "");
    }

    #[test]
    fn test_ordinary_event_is_not_a_handshake() {
        assert!(detect(&event(json!({
            "eventType": "Microsoft.Resources.ResourceActionSuccess",
            "data": { "operationName": "op" }
        })))
        .is_none());
    }

    #[test]
    fn test_first_versus_any() {
        let batch = vec![
            event(json!({ "eventType": "Microsoft.Resources.ResourceWriteSuccess" })),
            event(json!({ "data": { "validationCode": "late" } })),
        ];
        assert!(detect_first(&batch).is_none());
        assert_eq!(detect_any(&batch).unwrap().validation_response, "late");
        assert!(detect_first(&[]).is_none());
    }

    #[test]
    fn test_echo_query() {
        let ok = echo_query(ValidationQuery {
            validation_code: Some("xyz".to_string()),
        })
        .unwrap();
        assert_eq!(ok, "xyz");

        assert!(matches!(
            echo_query(ValidationQuery::default()),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(echo_query(ValidationQuery {
            validation_code: Some(String::new())
        })
        .is_err());
    }
}
