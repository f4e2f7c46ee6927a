//! Wire types for the voting backend. Field names follow the backend's
//! camelCase JSON contract.

use ballotguard_core::DuplicateMatch;
use serde::{Deserialize, Serialize};

/// Acknowledgement of a recorded vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    #[serde(default)]
    pub vote_id: Option<String>,
    pub award_id: String,
    pub nominee_id: String,
}

/// Backend verdict on a biometric duplicate check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub matches: Vec<DuplicateMatch>,
}

/// Outcome of a WebAuthn ceremony verification leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CeremonyVerdict {
    pub verified: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error envelope the backend wraps failures in: `{"error": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct BackendErrorBody {
    pub error: BackendErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BackendErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_verdict_parses_backend_shape() {
        let json = r#"{
            "isDuplicate": true,
            "confidence": 0.92,
            "matches": [
                {"subjectId": "m1", "confidence": 0.92, "distance": 0.08,
                 "timestamp": "2026-08-01T10:00:00Z"}
            ]
        }"#;
        let verdict: DuplicateVerdict = serde_json::from_str(json).unwrap();
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.matches.len(), 1);
        assert_eq!(verdict.matches[0].subject_id, "m1");
    }

    #[test]
    fn duplicate_verdict_defaults_optional_fields() {
        let verdict: DuplicateVerdict = serde_json::from_str(r#"{"isDuplicate": false}"#).unwrap();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.matches.is_empty());
    }

    #[test]
    fn error_body_parses_partial_detail() {
        let body: BackendErrorBody =
            serde_json::from_str(r#"{"error": {"code": "DUPLICATE_VOTE"}}"#).unwrap();
        assert_eq!(body.error.code.as_deref(), Some("DUPLICATE_VOTE"));
        assert!(body.error.message.is_none());
    }

    #[test]
    fn vote_receipt_roundtrip() {
        let receipt = VoteReceipt {
            vote_id: Some("v42".into()),
            award_id: "a1".into(),
            nominee_id: "n9".into(),
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("awardId"));
        let back: VoteReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, receipt);
    }
}
