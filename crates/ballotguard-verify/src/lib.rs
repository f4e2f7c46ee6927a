//! ballotguard-verify — Duplicate-vote verification orchestration.
//!
//! Ties the face engine, camera, backend client, and WebAuthn ceremonies
//! into the capture session state machine and the two [`BiometricVerifier`]
//! strategies the vote-submission flow composes over.

pub mod analyzer;
pub mod report;
pub mod resolver;
pub mod session;
pub mod verifier;
pub mod webauthn;

pub use analyzer::{AnalyzerError, EngineAnalyzer, FaceAnalyzer};
pub use report::{ReportCode, VerificationReport};
pub use resolver::{DuplicateCheck, DuplicateResolver};
pub use session::{
    biometric_hash, CaptureSession, FailureKind, SessionConfig, SessionError, SessionFailure,
    SessionState, VerificationOutcome,
};
pub use verifier::{cast_verified_vote, BiometricVerifier, FacialVerifier, VoteFlowError, WebAuthnVerifier};
pub use webauthn::{CeremonyError, PlatformAuthenticator, UnsupportedAuthenticator, WebAuthnBridge};
