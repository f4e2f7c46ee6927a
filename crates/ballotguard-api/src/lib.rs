//! ballotguard-api — Client for the voting backend.
//!
//! Covers the four surfaces the verification core consumes: vote submission
//! (idempotency-keyed, retried with backoff), the biometric duplicate
//! registry, best-effort signature storage, and the WebAuthn ceremony
//! option/verify exchange. The backend owns all persistence; this crate
//! never stores anything.

pub mod client;
pub mod error;
pub mod types;

pub use client::{new_idempotency_key, ApiClient, RetryPolicy};
pub use error::{ApiError, VoteRejection};
pub use types::{CeremonyVerdict, DuplicateVerdict, VoteReceipt};
