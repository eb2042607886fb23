//! Structured-invocation path: schema-typed args straight to the
//! normalizer, bypassing text scanning entirely.

use tracing::warn;

use crate::alert::{self, Alert, AlertCandidate};
use crate::session::wire::ToolInvocation;

/// Map an invocation's args to an [`Alert`].
///
/// The args schema mirrors the alert candidate: required
/// `{status, diagnosis, confidence, symptoms}`, optional `cpr_feedback`.
/// Args that do not deserialize, or fail validation, yield `None` — the
/// invocation is still acknowledged so the remote loop keeps going.
pub fn adapt_invocation(invocation: &ToolInvocation) -> Option<Alert> {
    let candidate: AlertCandidate = match serde_json::from_value(invocation.args.clone()) {
        Ok(candidate) => candidate,
        Err(e) => {
            warn!(
                name = %invocation.name,
                error = %e,
                "tool invocation args did not match the alert schema"
            );
            return None;
        }
    };
    alert::normalize(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertStatus;
    use serde_json::json;

    fn invocation(args: serde_json::Value) -> ToolInvocation {
        ToolInvocation {
            id: Some("call-1".into()),
            name: "report_medical_status".into(),
            args,
        }
    }

    #[test]
    fn adapts_well_formed_args() {
        let alert = adapt_invocation(&invocation(json!({
            "status": "CRITICAL",
            "diagnosis": "Cardiac Arrest",
            "confidence": 0.85,
            "symptoms": ["agonal breathing"],
            "cpr_feedback": "INSTRUCT: PUSH FASTER",
        })))
        .expect("well-formed args should adapt");

        assert_eq!(alert.status, AlertStatus::Critical);
        assert_eq!(alert.cpr_feedback.as_deref(), Some("INSTRUCT: PUSH FASTER"));
    }

    #[test]
    fn rejects_args_with_invalid_status() {
        assert!(adapt_invocation(&invocation(json!({"status": "panic"}))).is_none());
    }

    #[test]
    fn rejects_args_of_wrong_shape() {
        assert!(adapt_invocation(&invocation(json!({"confidence": "very"}))).is_none());
        assert!(adapt_invocation(&invocation(json!("not an object"))).is_none());
    }
}
