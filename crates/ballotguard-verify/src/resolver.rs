//! Duplicate-match resolver: has this face already voted?
//!
//! The backend registry is the primary and only authoritative source — it
//! sees every device and session. The in-process cache is a best-effort
//! fallback used solely when the registry call fails: it only knows faces
//! stored by THIS process, so a clean fallback answer is weaker evidence
//! than a clean registry answer. The vote write itself never degrades; only
//! the duplicate check does.

use ballotguard_api::ApiClient;
use ballotguard_core::{match_confidence, DuplicateMatch, FaceDescriptor, FaceSignature};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Result of a duplicate check, whichever path produced it.
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Confidence of the best match; 0.0 when there is none.
    pub confidence: f32,
    /// Matches ordered best (lowest distance) first.
    pub matches: Vec<DuplicateMatch>,
}

impl DuplicateCheck {
    fn clean() -> Self {
        Self {
            is_duplicate: false,
            confidence: 0.0,
            matches: Vec::new(),
        }
    }
}

struct CachedDescriptor {
    descriptor: FaceDescriptor,
    stored_at: DateTime<Utc>,
}

/// Remote-first duplicate resolver with an in-memory fallback cache.
pub struct DuplicateResolver {
    client: Arc<ApiClient>,
    /// subject id → last stored descriptor. Process-wide, non-durable: a
    /// fresh process starts empty and relies on the registry.
    cache: Mutex<HashMap<String, CachedDescriptor>>,
    /// Euclidean distance below which two descriptors are the same person.
    match_threshold: f32,
}

impl DuplicateResolver {
    pub fn new(client: Arc<ApiClient>, match_threshold: f32) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            match_threshold,
        }
    }

    /// Check a descriptor against the registry, falling back to the local
    /// cache on transport failure. `exclude_subject` skips the voter's own
    /// stored descriptor in the fallback scan.
    pub async fn check_duplicate(
        &self,
        descriptor: &FaceDescriptor,
        award_id: &str,
        exclude_subject: Option<&str>,
    ) -> DuplicateCheck {
        let signature = FaceSignature::from_descriptor(descriptor);
        match self.client.check_biometric_duplicate(&signature, award_id).await {
            Ok(verdict) => DuplicateCheck {
                is_duplicate: verdict.is_duplicate,
                confidence: verdict.confidence,
                matches: verdict.matches,
            },
            Err(e) => {
                tracing::warn!(
                    award = award_id,
                    error = %e,
                    "registry duplicate check failed, degrading to local cache"
                );
                self.local_scan(descriptor, exclude_subject)
            }
        }
    }

    /// Scan the in-process cache. Award-agnostic and blind to other devices.
    fn local_scan(
        &self,
        descriptor: &FaceDescriptor,
        exclude_subject: Option<&str>,
    ) -> DuplicateCheck {
        let cache = self.cache.lock().expect("cache poisoned");
        let mut matches: Vec<DuplicateMatch> = Vec::new();

        for (subject_id, entry) in cache.iter() {
            if exclude_subject == Some(subject_id.as_str()) {
                continue;
            }
            let distance = descriptor.euclidean_distance(&entry.descriptor);
            if distance < self.match_threshold {
                matches.push(DuplicateMatch {
                    subject_id: subject_id.clone(),
                    confidence: match_confidence(distance),
                    distance,
                    timestamp: entry.stored_at,
                });
            }
        }

        if matches.is_empty() {
            return DuplicateCheck::clean();
        }

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        DuplicateCheck {
            is_duplicate: true,
            confidence: matches[0].confidence,
            matches,
        }
    }

    /// Record a verified descriptor for future checks: local cache first,
    /// then the registry. A registry write failure is logged and swallowed —
    /// verification already succeeded, storage is audit material, not a
    /// precondition of the vote.
    pub async fn store_for_future_checks(
        &self,
        descriptor: &FaceDescriptor,
        subject_id: &str,
        award_id: &str,
    ) {
        {
            let mut cache = self.cache.lock().expect("cache poisoned");
            cache.insert(
                subject_id.to_string(),
                CachedDescriptor {
                    descriptor: descriptor.clone(),
                    stored_at: Utc::now(),
                },
            );
        }

        let signature = FaceSignature::from_descriptor(descriptor);
        if let Err(e) = self
            .client
            .store_biometric_data(&signature, award_id, subject_id)
            .await
        {
            tracing::warn!(
                award = award_id,
                subject = subject_id,
                error = %e,
                "registry signature store failed; local cache retains the descriptor"
            );
        }
    }

    /// Drop every cached descriptor. Exposed for privacy controls.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("cache poisoned").clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("cache poisoned").len()
    }
}
