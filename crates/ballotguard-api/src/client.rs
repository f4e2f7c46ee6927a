//! HTTP client for the voting backend.

use crate::error::ApiError;
use crate::types::{BackendErrorBody, CeremonyVerdict, DuplicateVerdict, VoteReceipt};
use ballotguard_core::FaceSignature;
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
const BIOMETRIC_VERIFIED_HEADER: &str = "Biometric-Verified";

/// Bounded-retry policy for vote submission.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first (3 → up to 4 requests).
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt, plus up to 10% jitter.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Generate a fresh idempotency key for one vote attempt.
///
/// The key is generated once per attempt and reused across automatic
/// retries — that reuse is what makes a retried request at-most-once.
pub fn new_idempotency_key(award_id: &str, nominee_id: &str) -> String {
    format!("vote-{award_id}-{nominee_id}-{}", uuid::Uuid::new_v4())
}

/// Client for the voting backend REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        headers: HeaderMap,
    ) -> Result<T, ApiError> {
        let endpoint = self.base.join(path)?;
        let response = self
            .http
            .post(endpoint)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<BackendErrorBody>(&text) {
                Ok(parsed) => (
                    parsed.error.code.unwrap_or_else(|| format!("HTTP_{}", status.as_u16())),
                    parsed.error.message.unwrap_or_default(),
                ),
                Err(_) => (format!("HTTP_{}", status.as_u16()), text),
            };
            return Err(ApiError::Backend {
                status: status.as_u16(),
                code,
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Submit one vote with the given idempotency key. The backend records
    /// at most one vote per key, so replays return the original receipt.
    pub async fn submit_vote(
        &self,
        award_id: &str,
        nominee_id: &str,
        idempotency_key: &str,
    ) -> Result<VoteReceipt, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            IDEMPOTENCY_KEY_HEADER,
            idempotency_key
                .parse()
                .map_err(|_| ApiError::InvalidResponse("idempotency key not header-safe".into()))?,
        );
        headers.insert(BIOMETRIC_VERIFIED_HEADER, "true".parse().expect("static"));

        self.post_json(
            "votes",
            &json!({ "awardId": award_id, "nomineeId": nominee_id }),
            headers,
        )
        .await
    }

    /// Submit a vote with bounded retry. One idempotency key is generated up
    /// front and reused for every retry; only transport failures and 5xx
    /// responses are retried, with exponential backoff plus jitter.
    pub async fn cast_vote(
        &self,
        award_id: &str,
        nominee_id: &str,
        policy: &RetryPolicy,
    ) -> Result<VoteReceipt, ApiError> {
        let key = new_idempotency_key(award_id, nominee_id);
        self.cast_vote_with_key(award_id, nominee_id, &key, policy)
            .await
    }

    /// Retry loop around [`submit_vote`](Self::submit_vote) with a
    /// caller-supplied key.
    pub async fn cast_vote_with_key(
        &self,
        award_id: &str,
        nominee_id: &str,
        idempotency_key: &str,
        policy: &RetryPolicy,
    ) -> Result<VoteReceipt, ApiError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.submit_vote(award_id, nominee_id, idempotency_key).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                    let backoff = policy.base_delay * 2u32.pow(attempt - 1);
                    let jitter = backoff.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
                    tracing::warn!(
                        award = award_id,
                        attempt,
                        delay_ms = (backoff + jitter).as_millis() as u64,
                        error = %e,
                        "vote submission failed, retrying"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the registry whether this face has already voted in the award.
    pub async fn check_biometric_duplicate(
        &self,
        signature: &FaceSignature,
        award_id: &str,
    ) -> Result<DuplicateVerdict, ApiError> {
        self.post_json(
            "votes/check-biometric-duplicate",
            &json!({ "faceSignature": signature, "awardId": award_id }),
            HeaderMap::new(),
        )
        .await
    }

    /// Store a signature in the registry for future duplicate checks.
    /// Best-effort from the caller's perspective; the vote does not depend
    /// on this write succeeding.
    pub async fn store_biometric_data(
        &self,
        signature: &FaceSignature,
        award_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .post_json(
                "votes/store-biometric-data",
                &json!({
                    "faceSignature": signature,
                    "awardId": award_id,
                    "userId": user_id,
                }),
                HeaderMap::new(),
            )
            .await?;
        Ok(())
    }

    // --- WebAuthn ceremony exchange -------------------------------------

    /// Fetch platform registration ceremony options.
    pub async fn webauthn_register_options(&self) -> Result<serde_json::Value, ApiError> {
        self.post_json("webauthn/register/options", &json!({}), HeaderMap::new())
            .await
    }

    /// Submit the attestation produced by the platform for verification.
    pub async fn webauthn_register_verify(
        &self,
        attestation: &serde_json::Value,
    ) -> Result<CeremonyVerdict, ApiError> {
        self.post_json("webauthn/register/verify", attestation, HeaderMap::new())
            .await
    }

    /// Fetch platform authentication ceremony options.
    pub async fn webauthn_authenticate_options(&self) -> Result<serde_json::Value, ApiError> {
        self.post_json("webauthn/authenticate/options", &json!({}), HeaderMap::new())
            .await
    }

    /// Submit the assertion produced by the platform for verification.
    pub async fn webauthn_authenticate_verify(
        &self,
        assertion: &serde_json::Value,
    ) -> Result<CeremonyVerdict, ApiError> {
        self.post_json("webauthn/authenticate/verify", assertion, HeaderMap::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoteRejection;
    use ballotguard_core::{FaceDescriptor, DESCRIPTOR_DIM};
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(Url::parse(&server.url("/")).unwrap())
    }

    fn signature() -> FaceSignature {
        FaceSignature::from_descriptor(&FaceDescriptor {
            values: vec![0.1; DESCRIPTOR_DIM],
            model_version: None,
        })
    }

    #[tokio::test]
    async fn submit_vote_sends_idempotency_and_biometric_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/votes")
                .header("Idempotency-Key", "vote-a1-n1-test")
                .header("Biometric-Verified", "true")
                .json_body(json!({"awardId": "a1", "nomineeId": "n1"}));
            then.status(201)
                .json_body(json!({"voteId": "v1", "awardId": "a1", "nomineeId": "n1"}));
        });

        let receipt = client_for(&server)
            .submit_vote("a1", "n1", "vote-a1-n1-test")
            .await
            .unwrap();

        mock.assert();
        assert_eq!(receipt.vote_id.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn resubmitting_same_key_yields_same_receipt_without_side_effect() {
        // The backend deduplicates on the key: the second call returns the
        // first call's receipt. The client must treat both as success.
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/votes")
                .header("Idempotency-Key", "vote-a1-n1-fixed");
            then.status(201)
                .json_body(json!({"voteId": "v1", "awardId": "a1", "nomineeId": "n1"}));
        });

        let client = client_for(&server);
        let first = client.submit_vote("a1", "n1", "vote-a1-n1-fixed").await.unwrap();
        let second = client.submit_vote("a1", "n1", "vote-a1-n1-fixed").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cast_vote_reuses_one_key_across_retries() {
        let server = MockServer::start_async().await;
        // Only requests carrying the fixed key match; a key change mid-retry
        // would fall through to an unmatched 404 and end the loop early.
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/votes")
                    .header("Idempotency-Key", "vote-a1-n1-stable");
                then.status(503)
                    .json_body(json!({"error": {"code": "UNAVAILABLE", "message": "try later"}}));
            })
            .await;

        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
        };
        let err = client_for(&server)
            .cast_vote_with_key("a1", "n1", "vote-a1-n1-stable", &policy)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        // Initial attempt + 2 retries, all with the same key.
        assert_eq!(mock.hits(), 3);
    }

    #[tokio::test]
    async fn vote_rejection_is_never_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/votes");
            then.status(409)
                .json_body(json!({"error": {"code": "DUPLICATE_VOTE", "message": "already voted"}}));
        });

        let err = client_for(&server)
            .cast_vote("a1", "n1", &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(mock.hits(), 1);
        assert_eq!(err.vote_rejection(), Some(VoteRejection::DuplicateVote));
    }

    #[tokio::test]
    async fn duplicate_check_posts_signature_and_award() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/votes/check-biometric-duplicate")
                .json_body_partial(r#"{"awardId": "a1"}"#);
            then.status(200).json_body(json!({
                "isDuplicate": true,
                "confidence": 0.92,
                "matches": []
            }));
        });

        let verdict = client_for(&server)
            .check_biometric_duplicate(&signature(), "a1")
            .await
            .unwrap();

        mock.assert();
        assert!(verdict.is_duplicate);
        assert!((verdict.confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn store_biometric_data_succeeds_on_ack() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/votes/store-biometric-data")
                .json_body_partial(r#"{"awardId": "a1", "userId": "m7"}"#);
            then.status(200).json_body(json!({"stored": true}));
        });

        client_for(&server)
            .store_biometric_data(&signature(), "a1", "m7")
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn webauthn_missing_credentials_is_detectable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/webauthn/authenticate/options");
            then.status(400).json_body(json!({
                "error": {"code": "NO_CREDENTIALS",
                          "message": "No WebAuthn credentials registered"}
            }));
        });

        let err = client_for(&server)
            .webauthn_authenticate_options()
            .await
            .unwrap_err();
        assert!(err.indicates_missing_credentials());
    }

    #[tokio::test]
    async fn webauthn_verify_parses_verdict() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/webauthn/register/verify");
            then.status(200)
                .json_body(json!({"verified": true, "message": "credential registered"}));
        });

        let verdict = client_for(&server)
            .webauthn_register_verify(&json!({"id": "cred-1"}))
            .await
            .unwrap();
        assert!(verdict.verified);
    }

    #[tokio::test]
    async fn unparsable_error_body_falls_back_to_status_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/votes");
            then.status(502).body("bad gateway");
        });

        let err = client_for(&server)
            .submit_vote("a1", "n1", "k")
            .await
            .unwrap_err();
        match err {
            ApiError::Backend { status, code, .. } => {
                assert_eq!(status, 502);
                assert_eq!(code, "HTTP_502");
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn idempotency_keys_are_unique_per_attempt() {
        let a = new_idempotency_key("a1", "n1");
        let b = new_idempotency_key("a1", "n1");
        assert_ne!(a, b);
        assert!(a.starts_with("vote-a1-n1-"));
    }
}
