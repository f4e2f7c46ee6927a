//! WebAuthn bridge — platform-authenticator verification as an alternative
//! to the facial path.
//!
//! Each ceremony is one option/response round trip with the backend wrapped
//! around a platform prompt. Known limitation: once a ceremony is handed to
//! the platform it cannot be cancelled programmatically — only the platform
//! UI itself can abort it, which surfaces as `NotAllowed`.

use crate::report::{ReportCode, VerificationReport};
use async_trait::async_trait;
use ballotguard_api::{ApiClient, ApiError};
use std::sync::Arc;
use thiserror::Error;

/// Platform ceremony failures, adapted from platform error names at the
/// boundary so downstream code matches exhaustively.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CeremonyError {
    /// User cancelled, timed out, or the platform refused. Retryable.
    #[error("ceremony was cancelled or timed out")]
    NotAllowed,
    /// This device cannot run the ceremony at all. Fatal for the device.
    #[error("ceremony not supported on this device")]
    NotSupported,
    /// A matching credential already exists (registration only).
    #[error("credential already exists")]
    InvalidState,
    #[error("security requirements not met")]
    Security,
    #[error("ceremony aborted")]
    Aborted,
    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// Device-native authenticator seam (Face ID, Windows Hello, ...).
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Capability probe. Never fails — absence of the platform API is `false`.
    async fn is_available(&self) -> bool;

    /// Run the registration ceremony with backend-supplied options,
    /// returning the attestation response.
    async fn create_credential(
        &self,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, CeremonyError>;

    /// Run the authentication ceremony, returning the assertion response.
    async fn get_assertion(
        &self,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, CeremonyError>;
}

/// Authenticator for hosts with no platform authenticator at all. Every
/// probe answers unavailable; ceremonies never start.
pub struct UnsupportedAuthenticator;

#[async_trait]
impl PlatformAuthenticator for UnsupportedAuthenticator {
    async fn is_available(&self) -> bool {
        false
    }

    async fn create_credential(
        &self,
        _options: serde_json::Value,
    ) -> Result<serde_json::Value, CeremonyError> {
        Err(CeremonyError::NotSupported)
    }

    async fn get_assertion(
        &self,
        _options: serde_json::Value,
    ) -> Result<serde_json::Value, CeremonyError> {
        Err(CeremonyError::NotSupported)
    }
}

/// Two-leg ceremony driver: options from the backend, platform prompt,
/// verification by the backend.
pub struct WebAuthnBridge {
    client: Arc<ApiClient>,
    authenticator: Arc<dyn PlatformAuthenticator>,
}

impl WebAuthnBridge {
    pub fn new(client: Arc<ApiClient>, authenticator: Arc<dyn PlatformAuthenticator>) -> Self {
        Self {
            client,
            authenticator,
        }
    }

    /// Capability probe; never fails.
    pub async fn is_platform_authenticator_available(&self) -> bool {
        self.authenticator.is_available().await
    }

    /// Register a new platform credential.
    pub async fn register(&self) -> VerificationReport {
        if !self.authenticator.is_available().await {
            return VerificationReport::fail(
                ReportCode::AuthenticatorUnavailable,
                "A platform authenticator (Face ID, Windows Hello) is not available on this device.",
            );
        }

        let options = match self.client.webauthn_register_options().await {
            Ok(options) => options,
            Err(e) => return backend_report(&e, "registration options"),
        };

        let attestation = match self.authenticator.create_credential(options).await {
            Ok(attestation) => attestation,
            Err(e) => return registration_ceremony_report(&e),
        };

        match self.client.webauthn_register_verify(&attestation).await {
            Ok(verdict) if verdict.verified => VerificationReport::ok(
                verdict
                    .message
                    .unwrap_or_else(|| "Biometric credential registered.".into()),
            ),
            Ok(verdict) => VerificationReport::fail(
                ReportCode::BackendRejected,
                verdict
                    .message
                    .unwrap_or_else(|| "The backend rejected the new credential.".into()),
            ),
            Err(e) => backend_report(&e, "registration verification"),
        }
    }

    /// Authenticate with an existing platform credential.
    pub async fn authenticate(&self) -> VerificationReport {
        if !self.authenticator.is_available().await {
            return VerificationReport::fail(
                ReportCode::AuthenticatorUnavailable,
                "A platform authenticator (Face ID, Windows Hello) is not available on this device.",
            );
        }

        let options = match self.client.webauthn_authenticate_options().await {
            Ok(options) => options,
            Err(e) if e.indicates_missing_credentials() => {
                return VerificationReport::fail(
                    ReportCode::NoCredentials,
                    "No biometric credential is registered yet. Register your credentials first.",
                );
            }
            Err(e) => return backend_report(&e, "authentication options"),
        };

        let assertion = match self.authenticator.get_assertion(options).await {
            Ok(assertion) => assertion,
            Err(e) => return authentication_ceremony_report(&e),
        };

        match self.client.webauthn_authenticate_verify(&assertion).await {
            Ok(verdict) if verdict.verified => VerificationReport::ok(
                verdict
                    .message
                    .unwrap_or_else(|| "Biometric verification successful.".into()),
            ),
            Ok(verdict) => VerificationReport::fail(
                ReportCode::BackendRejected,
                verdict
                    .message
                    .unwrap_or_else(|| "The backend rejected the assertion.".into()),
            ),
            Err(e) => backend_report(&e, "authentication verification"),
        }
    }
}

fn backend_report(error: &ApiError, leg: &str) -> VerificationReport {
    tracing::warn!(error = %error, leg, "webauthn backend exchange failed");
    VerificationReport::fail(
        ReportCode::BackendRejected,
        format!("The verification service rejected the {leg} request. Try again shortly."),
    )
}

fn registration_ceremony_report(error: &CeremonyError) -> VerificationReport {
    match error {
        CeremonyError::NotAllowed => VerificationReport::fail(
            ReportCode::NotAllowed,
            "The registration prompt was cancelled or timed out. Try again and complete the prompt.",
        ),
        CeremonyError::NotSupported => VerificationReport::fail(
            ReportCode::NotSupported,
            "Biometric registration is not supported on this device.",
        ),
        CeremonyError::InvalidState => VerificationReport::fail(
            ReportCode::CredentialExists,
            "A credential already exists on this device. Authenticate instead of registering again.",
        ),
        CeremonyError::Security => VerificationReport::fail(
            ReportCode::SecurityError,
            "The connection does not meet the security requirements for registration.",
        ),
        CeremonyError::Aborted => VerificationReport::fail(
            ReportCode::Aborted,
            "Registration was aborted. Try again.",
        ),
        CeremonyError::Unavailable(detail) => VerificationReport::fail(
            ReportCode::AuthenticatorUnavailable,
            format!("The authenticator is unavailable: {detail}."),
        ),
    }
}

fn authentication_ceremony_report(error: &CeremonyError) -> VerificationReport {
    match error {
        CeremonyError::NotAllowed => VerificationReport::fail(
            ReportCode::NotAllowed,
            "The verification prompt was cancelled or timed out. Try again and complete the prompt.",
        ),
        CeremonyError::NotSupported => VerificationReport::fail(
            ReportCode::NotSupported,
            "Biometric verification is not supported on this device.",
        ),
        // InvalidState is a registration-time signal; during authentication
        // treat it like any other refused ceremony.
        CeremonyError::InvalidState | CeremonyError::Aborted => VerificationReport::fail(
            ReportCode::Aborted,
            "Verification was aborted. Try again.",
        ),
        CeremonyError::Security => VerificationReport::fail(
            ReportCode::SecurityError,
            "The connection does not meet the security requirements for verification.",
        ),
        CeremonyError::Unavailable(detail) => VerificationReport::fail(
            ReportCode::AuthenticatorUnavailable,
            format!("The authenticator is unavailable: {detail}."),
        ),
    }
}
