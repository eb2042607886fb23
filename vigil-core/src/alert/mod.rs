//! Canonical alert entity and the normalizer that produces it.
//!
//! Every inbound path — brace-scanned free text, structured tool
//! invocations, socket records — converges on [`normalize`]. An [`Alert`]
//! exists only after validation has passed; downstream consumers never see
//! a half-formed candidate, and an `Alert` is never mutated after creation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Severity reported by the remote model.
///
/// Wire values are the uppercase strings `"NORMAL"`, `"WARNING"`,
/// `"CRITICAL"`. Anything else fails validation and the candidate is
/// discarded before an `Alert` is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Normal,
    Warning,
    Critical,
}

impl AlertStatus {
    /// Parse a wire status string. Returns `None` for anything outside the
    /// three enumerated values (including casing mismatches).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NORMAL" => Some(Self::Normal),
            "WARNING" => Some(Self::Warning),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn is_critical(self) -> bool {
        self == Self::Critical
    }
}

/// A normalized, validated medical-status event.
///
/// Created only by [`normalize`]; `id` and `timestamp` are assigned locally
/// at normalization time so downstream ordering follows local arrival order
/// regardless of what the remote side claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Opaque unique token, generated locally.
    pub id: String,
    pub status: AlertStatus,
    pub diagnosis: String,
    /// Model confidence in [0.0, 1.0].
    pub confidence: f64,
    /// Observed symptoms, in the order the model listed them.
    pub symptoms: Vec<String>,
    /// CPR pacing instruction — present only for cardiac-arrest guidance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpr_feedback: Option<String>,
    /// Local capture time, Unix milliseconds.
    pub timestamp: i64,
}

impl Alert {
    /// Human-readable trigger description: diagnosis plus symptom list.
    pub fn reason(&self) -> String {
        if self.symptoms.is_empty() {
            self.diagnosis.clone()
        } else {
            format!("{} — symptoms: {}", self.diagnosis, self.symptoms.join(", "))
        }
    }
}

/// Raw candidate fields, straight off the wire.
///
/// Every field is optional at this stage; unknown fields (a remote-supplied
/// `id` or `timestamp`, say) are ignored by serde and never trusted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertCandidate {
    pub status: Option<String>,
    pub diagnosis: Option<String>,
    pub confidence: Option<f64>,
    pub symptoms: Option<Vec<String>>,
    pub cpr_feedback: Option<String>,
}

/// Default diagnosis when the model omitted one.
const UNKNOWN_DIAGNOSIS: &str = "Unknown Diagnosis";

/// Parse an extracted candidate span into fields.
///
/// A span that is not valid JSON (or whose fields have the wrong shape) is
/// logged and discarded — never retried.
pub fn parse_candidate(span: &str) -> Option<AlertCandidate> {
    match serde_json::from_str::<AlertCandidate>(span) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            warn!(error = %e, span_len = span.len(), "discarding unparseable candidate span");
            None
        }
    }
}

/// Validate and default candidate fields into an [`Alert`].
///
/// Rejects (returns `None`) when `status` is absent or not one of the three
/// enumerated values. Missing diagnosis defaults to `"Unknown Diagnosis"`,
/// missing confidence to `0.0`, missing symptoms to an empty list.
pub fn normalize(candidate: AlertCandidate) -> Option<Alert> {
    let status = match candidate.status.as_deref() {
        Some(raw) => match AlertStatus::parse(raw) {
            Some(status) => status,
            None => {
                warn!(status = raw, "discarding candidate with invalid status");
                return None;
            }
        },
        None => {
            warn!("discarding candidate with missing status");
            return None;
        }
    };

    Some(Alert {
        id: Uuid::new_v4().to_string(),
        status,
        diagnosis: candidate
            .diagnosis
            .unwrap_or_else(|| UNKNOWN_DIAGNOSIS.to_string()),
        confidence: candidate.confidence.unwrap_or(0.0),
        symptoms: candidate.symptoms.unwrap_or_default(),
        cpr_feedback: candidate.cpr_feedback,
        timestamp: Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_full_candidate() {
        let candidate = AlertCandidate {
            status: Some("CRITICAL".into()),
            diagnosis: Some("Stroke".into()),
            confidence: Some(0.9),
            symptoms: Some(vec!["facial droop".into(), "slurred speech".into()]),
            cpr_feedback: None,
        };

        let alert = normalize(candidate).expect("valid candidate should normalize");
        assert_eq!(alert.status, AlertStatus::Critical);
        assert_eq!(alert.diagnosis, "Stroke");
        assert!((alert.confidence - 0.9).abs() < 1e-9);
        assert_eq!(alert.symptoms.len(), 2);
        assert!(!alert.id.is_empty());
        assert!(alert.timestamp > 0);
    }

    #[test]
    fn normalize_applies_defaults() {
        let candidate = AlertCandidate {
            status: Some("WARNING".into()),
            ..Default::default()
        };

        let alert = normalize(candidate).expect("status-only candidate should normalize");
        assert_eq!(alert.diagnosis, "Unknown Diagnosis");
        assert_eq!(alert.confidence, 0.0);
        assert!(alert.symptoms.is_empty());
        assert!(alert.cpr_feedback.is_none());
    }

    #[test]
    fn normalize_rejects_missing_status() {
        let candidate = AlertCandidate {
            diagnosis: Some("Stroke".into()),
            ..Default::default()
        };
        assert!(normalize(candidate).is_none());
    }

    #[test]
    fn normalize_rejects_unknown_status() {
        for raw in ["critical", "SEVERE", "", "Normal"] {
            let candidate = AlertCandidate {
                status: Some(raw.into()),
                ..Default::default()
            };
            assert!(normalize(candidate).is_none(), "status {raw:?} must reject");
        }
    }

    #[test]
    fn normalize_ignores_remote_id_and_timestamp() {
        let span = r#"{"status":"NORMAL","diagnosis":"Clear","id":"remote-1","timestamp":42}"#;
        let candidate = parse_candidate(span).expect("span should parse");
        let alert = normalize(candidate).expect("candidate should normalize");
        assert_ne!(alert.id, "remote-1");
        assert_ne!(alert.timestamp, 42);
    }

    #[test]
    fn parse_candidate_rejects_malformed_span() {
        assert!(parse_candidate("{\"status\": CRITICAL}").is_none());
        assert!(parse_candidate("not json at all").is_none());
    }

    #[test]
    fn status_serializes_uppercase_on_the_wire() {
        let json = serde_json::to_string(&AlertStatus::Critical).unwrap();
        assert_eq!(json, r#""CRITICAL""#);
        let back: AlertStatus = serde_json::from_str(r#""WARNING""#).unwrap();
        assert_eq!(back, AlertStatus::Warning);
    }

    #[test]
    fn alert_reason_includes_symptoms() {
        let candidate = AlertCandidate {
            status: Some("CRITICAL".into()),
            diagnosis: Some("Cardiac Arrest".into()),
            symptoms: Some(vec!["agonal breathing".into(), "unresponsive".into()]),
            ..Default::default()
        };
        let alert = normalize(candidate).unwrap();
        assert_eq!(
            alert.reason(),
            "Cardiac Arrest — symptoms: agonal breathing, unresponsive"
        );
    }
}
