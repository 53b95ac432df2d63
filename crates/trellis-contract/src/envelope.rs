//! Wire format for inter-agent messages.
//!
//! An envelope is a self-describing UTF-8 JSON object carrying routing
//! metadata, a payload discriminator, and the payload itself. Field names
//! are part of the ABI. Unknown extra keys are tolerated on decode and
//! preserved on re-encode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Three-way payload discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    /// Ordinary agent input produced by an upstream `Success`.
    Normal,
    /// Upstream pipeline ended in `Failure`.
    UpstreamFailure,
    /// Upstream pipeline was blocked by a guardrail.
    UpstreamRejection,
}

/// Payload carried when `payload_type = UpstreamFailure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamFailure {
    pub from_agent: String,
    pub error: String,
}

/// Payload carried when `payload_type = UpstreamRejection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRejection {
    pub from_agent: String,
    pub guardrail_name: String,
    pub reason: String,
}

/// The inter-agent wire record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from_agent: String,
    pub to_agent: String,
    pub trace_id: String,
    pub conversation_id: String,
    pub payload_type: PayloadType,
    pub payload: Value,
    /// Keys this version of the schema does not know. Kept so that
    /// re-encoding is deterministic.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(String),
    #[error("envelope field `{0}` must be non-empty")]
    EmptyField(&'static str),
    #[error("payload does not match {expected}: {reason}")]
    Payload {
        expected: &'static str,
        reason: String,
    },
}

impl Envelope {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        trace_id: impl Into<String>,
        conversation_id: impl Into<String>,
        payload_type: PayloadType,
        payload: Value,
    ) -> Self {
        Self {
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            trace_id: trace_id.into(),
            conversation_id: conversation_id.into(),
            payload_type,
            payload,
            extra: Map::new(),
        }
    }

    /// Canonical textual form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Recover an envelope from its wire bytes, validating the routing
    /// fields are present and non-empty.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Json(e.to_string()))?;
        for (field, value) in [
            ("from_agent", &envelope.from_agent),
            ("to_agent", &envelope.to_agent),
            ("trace_id", &envelope.trace_id),
            ("conversation_id", &envelope.conversation_id),
        ] {
            if value.is_empty() {
                return Err(DecodeError::EmptyField(field));
            }
        }
        Ok(envelope)
    }
}

/// Encode a payload value structurally, falling back to its `Debug`
/// rendering as a string payload when structured encoding fails. The
/// fallback is logged.
pub fn encode_payload<T: Serialize + fmt::Debug>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(encoded) => encoded,
        Err(error) => {
            tracing::warn!(
                %error,
                "structured payload encoding failed; falling back to string payload"
            );
            Value::String(format!("{value:?}"))
        }
    }
}

/// Decode the envelope payload according to its discriminator.
pub fn decode_payload<T: DeserializeOwned>(
    envelope: &Envelope,
) -> Result<crate::inbound::Inbound<T>, DecodeError> {
    use crate::inbound::Inbound;
    match envelope.payload_type {
        PayloadType::Normal => serde_json::from_value(envelope.payload.clone())
            .map(Inbound::Normal)
            .map_err(|e| DecodeError::Payload {
                expected: "agent input payload",
                reason: e.to_string(),
            }),
        PayloadType::UpstreamFailure => serde_json::from_value(envelope.payload.clone())
            .map(Inbound::Failure)
            .map_err(|e| DecodeError::Payload {
                expected: "upstream failure payload",
                reason: e.to_string(),
            }),
        PayloadType::UpstreamRejection => serde_json::from_value(envelope.payload.clone())
            .map(Inbound::Rejection)
            .map_err(|e| DecodeError::Payload {
                expected: "upstream rejection payload",
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::Inbound;

    #[test]
    fn round_trips_a_normal_envelope() {
        let envelope = Envelope::new(
            "preprocessor",
            "codegen",
            "t-1",
            "C-42",
            PayloadType::Normal,
            serde_json::json!({ "task": "sum a list" }),
        );
        let text = envelope.encode().unwrap();
        let decoded = Envelope::decode(text.as_bytes()).unwrap();
        assert_eq!(decoded.from_agent, "preprocessor");
        assert_eq!(decoded.to_agent, "codegen");
        assert_eq!(decoded.conversation_id, "C-42");
        assert_eq!(decoded.payload_type, PayloadType::Normal);
        assert_eq!(decoded.payload["task"], "sum a list");
    }

    #[test]
    fn round_trips_an_upstream_failure() {
        let payload = encode_payload(&UpstreamFailure {
            from_agent: "A".to_string(),
            error: "boom".to_string(),
        });
        let envelope = Envelope::new(
            "A",
            "B",
            "t-1",
            "c-1",
            PayloadType::UpstreamFailure,
            payload,
        );
        let decoded = Envelope::decode(envelope.encode().unwrap().as_bytes()).unwrap();
        match decode_payload::<serde_json::Value>(&decoded).unwrap() {
            Inbound::Failure(failure) => {
                assert_eq!(failure.from_agent, "A");
                assert_eq!(failure.error, "boom");
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn tolerates_and_preserves_unknown_keys() {
        let wire = r#"{
            "from_agent": "a",
            "to_agent": "b",
            "trace_id": "t",
            "conversation_id": "c",
            "payload_type": "Normal",
            "payload": {},
            "x_custom": "kept"
        }"#;
        let decoded = Envelope::decode(wire.as_bytes()).unwrap();
        assert_eq!(decoded.extra["x_custom"], "kept");
        let reencoded = decoded.encode().unwrap();
        assert!(reencoded.contains("x_custom"));
    }

    #[test]
    fn rejects_empty_routing_fields() {
        let wire = r#"{
            "from_agent": "",
            "to_agent": "b",
            "trace_id": "t",
            "conversation_id": "c",
            "payload_type": "Normal",
            "payload": null
        }"#;
        match Envelope::decode(wire.as_bytes()) {
            Err(DecodeError::EmptyField("from_agent")) => {}
            other => panic!("expected EmptyField, got {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage_with_a_readable_reason() {
        let err = Envelope::decode(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn payload_type_mismatch_is_a_payload_error() {
        let envelope = Envelope::new(
            "a",
            "b",
            "t",
            "c",
            PayloadType::UpstreamFailure,
            serde_json::json!({ "unexpected": true }),
        );
        let err = decode_payload::<String>(&envelope).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }
}
