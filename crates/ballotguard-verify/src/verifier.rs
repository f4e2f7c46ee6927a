//! Verification strategies and the verified-vote flow.
//!
//! The vote submission path depends only on [`BiometricVerifier`]; whether a
//! deployment verifies faces, platform credentials, or both is a composition
//! decision made where the components are wired together.

use crate::report::{ReportCode, VerificationReport};
use crate::session::{CaptureSession, FailureKind, SessionError};
use crate::webauthn::WebAuthnBridge;
use async_trait::async_trait;
use ballotguard_api::{ApiClient, ApiError, RetryPolicy, VoteReceipt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A verification strategy the vote flow can run before submitting.
#[async_trait]
pub trait BiometricVerifier: Send + Sync {
    async fn verify(&self) -> VerificationReport;
}

/// WebAuthn strategy: one authentication ceremony.
pub struct WebAuthnVerifier {
    bridge: WebAuthnBridge,
}

impl WebAuthnVerifier {
    pub fn new(bridge: WebAuthnBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl BiometricVerifier for WebAuthnVerifier {
    async fn verify(&self) -> VerificationReport {
        self.bridge.authenticate().await
    }
}

/// Facial strategy: drive a capture session end to end — initialize models,
/// start the camera, wait for a good-quality face, capture and verify.
pub struct FacialVerifier {
    session: Arc<CaptureSession>,
    /// How long to wait for a good-quality face before giving up.
    pub quality_deadline: Duration,
}

impl FacialVerifier {
    pub fn new(session: Arc<CaptureSession>) -> Self {
        Self {
            session,
            quality_deadline: Duration::from_secs(30),
        }
    }
}

fn report_from_session_error(error: SessionError) -> VerificationReport {
    match error {
        SessionError::Failed(failure) => {
            let code = match failure.kind {
                FailureKind::NoFace => ReportCode::NoFace,
                FailureKind::PoorQuality | FailureKind::Analysis => ReportCode::PoorQuality,
                FailureKind::DuplicateVote => ReportCode::DuplicateVote,
                FailureKind::CameraPermission
                | FailureKind::CameraInUse
                | FailureKind::CameraNotFound
                | FailureKind::Camera => ReportCode::Camera,
                FailureKind::ModelLoad => ReportCode::ModelLoad,
            };
            VerificationReport::fail(code, failure.message)
        }
        SessionError::InvalidState { .. } => VerificationReport::fail(
            ReportCode::SessionState,
            "The verification session is in an unexpected state. Start over.",
        ),
    }
}

#[async_trait]
impl BiometricVerifier for FacialVerifier {
    async fn verify(&self) -> VerificationReport {
        if let Err(e) = self.session.initialize().await {
            return report_from_session_error(e);
        }
        if let Err(e) = self.session.start().await {
            return report_from_session_error(e);
        }

        // Wait for the polling loop to report a capturable face.
        let mut quality = self.session.quality_watch();
        let deadline = tokio::time::sleep(self.quality_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.session.cancel().await;
                    return VerificationReport::fail(
                        ReportCode::QualityTimeout,
                        "Could not get a clear view of your face in time. Adjust your lighting and try again.",
                    );
                }
                changed = quality.changed() => {
                    if changed.is_err() {
                        return VerificationReport::fail(
                            ReportCode::SessionState,
                            "The verification session ended unexpectedly. Start over.",
                        );
                    }
                    let good = quality
                        .borrow()
                        .as_ref()
                        .map(|q| q.is_good_quality)
                        .unwrap_or(false);
                    if good {
                        break;
                    }
                }
            }
        }

        match self.session.capture_and_verify().await {
            Ok(outcome) => VerificationReport::ok(format!(
                "Facial verification successful ({:.0}% detection confidence).",
                outcome.confidence * 100.0
            )),
            Err(e) => report_from_session_error(e),
        }
    }
}

#[derive(Error, Debug)]
pub enum VoteFlowError {
    #[error("verification failed: {}", .0.message)]
    Verification(VerificationReport),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Verify with the given strategy, then submit the vote with a fresh
/// idempotency key. The vote write always goes to the backend — a degraded
/// duplicate check never degrades the vote itself.
pub async fn cast_verified_vote(
    verifier: &dyn BiometricVerifier,
    client: &ApiClient,
    award_id: &str,
    nominee_id: &str,
    retry: &RetryPolicy,
) -> Result<VoteReceipt, VoteFlowError> {
    let report = verifier.verify().await;
    if !report.success {
        return Err(VoteFlowError::Verification(report));
    }
    tracing::info!(award = award_id, nominee = nominee_id, "verification passed, submitting vote");

    let receipt = client.cast_vote(award_id, nominee_id, retry).await?;
    Ok(receipt)
}
