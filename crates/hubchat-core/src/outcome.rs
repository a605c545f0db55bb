use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PushError;

/// Which of the three mutually exclusive push outcomes arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Ok,
    Error,
    Timeout,
}

/// A settled push before it is turned into a typed result.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// Server accepted the request; carries the reply payload.
    Ok(Value),
    /// Server declined the request; carries the error payload.
    Error(Value),
    /// No answer within the channel deadline.
    Timeout,
}

impl PushOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Ok(_) => OutcomeKind::Ok,
            Self::Error(_) => OutcomeKind::Error,
            Self::Timeout => OutcomeKind::Timeout,
        }
    }
}

/// Convert an outcome into the ok payload or the matching [`PushError`].
pub fn normalize_push_outcome(outcome: PushOutcome) -> Result<Value, PushError> {
    match outcome {
        PushOutcome::Ok(payload) => Ok(payload),
        PushOutcome::Error(reason) => Err(PushError::Rejected { reason }),
        PushOutcome::Timeout => Err(PushError::Timeout),
    }
}

/// Decode a payload into a record, naming `context` on failure.
pub fn decode<T: DeserializeOwned>(context: &str, payload: Value) -> Result<T, PushError> {
    serde_json::from_value(payload).map_err(|err| PushError::malformed(context, err))
}

/// Decode a field of an object payload, treating a missing field as `null`.
pub fn decode_field<T: DeserializeOwned>(
    context: &str,
    payload: &Value,
    field: &str,
) -> Result<T, PushError> {
    let value = payload.get(field).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|err| PushError::malformed(format!("{context}.{field}"), err))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Marker;

    #[test]
    fn maps_error_outcome_to_rejection_with_payload() {
        let err = normalize_push_outcome(PushOutcome::Error(json!({"reason": "forbidden"})))
            .expect_err("error outcome must reject");
        assert_eq!(
            err,
            PushError::Rejected {
                reason: json!({"reason": "forbidden"})
            }
        );
    }

    #[test]
    fn maps_timeout_outcome() {
        assert_eq!(
            normalize_push_outcome(PushOutcome::Timeout),
            Err(PushError::Timeout)
        );
        assert_eq!(PushOutcome::Timeout.kind(), OutcomeKind::Timeout);
    }

    #[test]
    fn decode_failure_names_context() {
        let err = decode::<Marker>("move_marker", json!({"message_id": "nope"}))
            .expect_err("bad marker must fail");
        match err {
            PushError::Malformed { context, .. } => assert_eq!(context, "move_marker"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_list_field_decodes_as_error_not_panic() {
        let err = decode_field::<Vec<Marker>>("join", &json!({}), "markers")
            .expect_err("null is not a list");
        assert_eq!(err.code(), "malformed_payload");

        let markers: Option<Vec<Marker>> =
            decode_field("join", &json!({}), "markers").expect("optional field");
        assert_eq!(markers, None);
    }
}
