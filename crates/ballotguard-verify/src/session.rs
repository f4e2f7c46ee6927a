//! Capture session state machine.
//!
//! One `CaptureSession` per voting attempt:
//! `idle → initializing → capturing → processing → success | failed`, with
//! `failed → capturing` on retry and any non-terminal state `→ idle` on
//! cancel. The session owns the camera handle and the polling task and
//! guarantees both are released on success, cancellation, and drop.
//!
//! State and the latest quality assessment are published on watch channels;
//! UI code subscribes instead of polling the session.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::resolver::DuplicateResolver;
use ballotguard_core::{FaceDescriptor, QualityAssessment, QualityThresholds};
use ballotguard_hw::{CameraError, CameraProvider, FrameSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Published while a grabbed frame cannot be assessed.
const ISSUE_WAITING_FOR_CAMERA: &str = "waiting for the camera";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause between quality-assessment ticks. Kept ≥ 1 s so inference does
    /// not starve the event loop on slow devices.
    pub poll_interval: Duration,
    /// Bound on model loading; exceeding it fails the session.
    pub model_load_timeout: Duration,
    pub thresholds: QualityThresholds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            model_load_timeout: Duration::from_secs(30),
            thresholds: QualityThresholds::default(),
        }
    }
}

/// What went wrong, as a closed set the UI can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoFace,
    PoorQuality,
    DuplicateVote,
    CameraPermission,
    CameraInUse,
    CameraNotFound,
    Camera,
    ModelLoad,
    Analysis,
}

/// A failure with its one actionable user-facing sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl SessionFailure {
    pub fn no_face() -> Self {
        Self {
            kind: FailureKind::NoFace,
            message: "No face was detected. Keep your face centered in the frame and try again."
                .into(),
        }
    }

    pub fn poor_quality(issues: &[String]) -> Self {
        Self {
            kind: FailureKind::PoorQuality,
            message: format!(
                "Image quality is too low: {}. Adjust your position and lighting, then try again.",
                issues.join(", ")
            ),
        }
    }

    pub fn duplicate(confidence: f32) -> Self {
        Self {
            kind: FailureKind::DuplicateVote,
            message: format!(
                "This person has already voted. A previous vote was matched with {:.1}% confidence.",
                confidence * 100.0
            ),
        }
    }

    pub fn model_load() -> Self {
        Self {
            kind: FailureKind::ModelLoad,
            message: "Face recognition models could not be loaded. Check the model installation and retry."
                .into(),
        }
    }

    pub fn analysis() -> Self {
        Self {
            kind: FailureKind::Analysis,
            message: "Face analysis failed. Please try again.".into(),
        }
    }

    pub fn from_camera(error: &CameraError) -> Self {
        match error {
            CameraError::PermissionDenied => Self {
                kind: FailureKind::CameraPermission,
                message: "Camera access was denied. Allow camera access and try again.".into(),
            },
            CameraError::DeviceInUse => Self {
                kind: FailureKind::CameraInUse,
                message:
                    "The camera is in use by another application. Close the other application and try again."
                        .into(),
            },
            CameraError::DeviceNotFound => Self {
                kind: FailureKind::CameraNotFound,
                message: "No camera was found. Connect a camera and try again.".into(),
            },
            CameraError::Unknown(detail) => Self {
                kind: FailureKind::Camera,
                message: format!("The camera failed: {detail}. Try again."),
            },
        }
    }

    /// Retrying with the same identity cannot change a duplicate verdict, so
    /// the UI must not offer it.
    pub fn is_retryable(&self) -> bool {
        self.kind != FailureKind::DuplicateVote
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Initializing,
    Capturing,
    Processing,
    Success,
    Failed(SessionFailure),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session state: expected {expected}, session is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },
    #[error("{0}")]
    Failed(SessionFailure),
}

/// Handed to the vote-submission caller on success.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verified: bool,
    pub timestamp: DateTime<Utc>,
    /// Audit-correlation hash of the descriptor. A cheap fold, not a
    /// cryptographic digest.
    pub biometric_hash: String,
    pub confidence: f32,
    pub quality: QualityAssessment,
}

/// 32-bit shift-fold over the comma-joined descriptor values, hex-encoded.
/// Used to correlate audit records; carries no security weight.
pub fn biometric_hash(descriptor: &FaceDescriptor) -> String {
    let joined = descriptor
        .values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut hash: i32 = 0;
    for byte in joined.bytes() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(byte as i32);
    }
    format!("{:x}", hash.unsigned_abs())
}

struct PollTask {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

struct LiveCapture {
    camera: Arc<dyn FrameSource>,
    poll: Option<PollTask>,
}

/// The stateful owner of one facial-verification attempt for one award.
///
/// At most one session should be live per voting attempt; a second session
/// competing for the same camera surfaces as a device-in-use failure when it
/// starts.
pub struct CaptureSession {
    analyzer: Arc<dyn FaceAnalyzer>,
    resolver: Arc<DuplicateResolver>,
    cameras: Arc<dyn CameraProvider>,
    config: SessionConfig,
    award_id: String,
    subject_id: String,
    state_tx: Arc<watch::Sender<SessionState>>,
    quality_tx: Arc<watch::Sender<Option<QualityAssessment>>>,
    live: Mutex<Option<LiveCapture>>,
}

impl CaptureSession {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        resolver: Arc<DuplicateResolver>,
        cameras: Arc<dyn CameraProvider>,
        config: SessionConfig,
        award_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (quality_tx, _) = watch::channel(None);
        Self {
            analyzer,
            resolver,
            cameras,
            config,
            award_id: award_id.into(),
            subject_id: subject_id.into(),
            state_tx: Arc::new(state_tx),
            quality_tx: Arc::new(quality_tx),
            live: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn quality_watch(&self) -> watch::Receiver<Option<QualityAssessment>> {
        self.quality_tx.subscribe()
    }

    fn fail(&self, failure: SessionFailure) -> SessionError {
        self.state_tx
            .send_replace(SessionState::Failed(failure.clone()));
        SessionError::Failed(failure)
    }

    /// Load the face models, bounded by the configured timeout.
    /// Idempotent: models already loaded resolve immediately.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.state_tx.send_replace(SessionState::Initializing);

        match tokio::time::timeout(self.config.model_load_timeout, self.analyzer.initialize())
            .await
        {
            Ok(Ok(())) => {
                self.state_tx.send_replace(SessionState::Idle);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "model initialization failed");
                Err(self.fail(SessionFailure::model_load()))
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.model_load_timeout.as_secs(),
                    "model initialization timed out"
                );
                Err(self.fail(SessionFailure::model_load()))
            }
        }
    }

    /// Acquire the camera and start the quality polling loop.
    pub async fn start(&self) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Idle {
            return Err(SessionError::InvalidState {
                expected: "idle",
                actual: format!("{current:?}"),
            });
        }

        let camera = match self.cameras.open() {
            Ok(camera) => camera,
            Err(e) => {
                tracing::warn!(error = %e, "camera acquisition failed");
                return Err(self.fail(SessionFailure::from_camera(&e)));
            }
        };

        tracing::info!(
            award = %self.award_id,
            dimensions = ?camera.dimensions(),
            "camera acquired, polling for face quality"
        );

        let poll = self.spawn_polling(camera.clone());
        *self.live.lock().await = Some(LiveCapture {
            camera,
            poll: Some(poll),
        });
        self.state_tx.send_replace(SessionState::Capturing);
        Ok(())
    }

    /// Recurring quality tick. Ticks are serialized: the next tick cannot
    /// start while an assessment is in flight, and missed ticks are skipped
    /// rather than queued. A result arriving after cancellation is dropped.
    fn spawn_polling(&self, camera: Arc<dyn FrameSource>) -> PollTask {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let analyzer = self.analyzer.clone();
        let quality_tx = self.quality_tx.clone();
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let grabbed = {
                    let camera = camera.clone();
                    tokio::task::spawn_blocking(move || camera.grab()).await
                };

                let assessment = match grabbed {
                    Ok(Ok(frame)) => analyzer.assess(frame).await,
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "frame grab failed during polling");
                        QualityAssessment::unavailable(ISSUE_WAITING_FOR_CAMERA)
                    }
                    Err(_) => break,
                };

                if task_token.is_cancelled() {
                    break;
                }
                quality_tx.send_replace(Some(assessment));
            }
        });

        PollTask { token, handle }
    }

    /// Final capture: extract the descriptor, re-check quality, run the
    /// duplicate check, store the descriptor, and hand back the outcome.
    ///
    /// Only valid while `capturing`. The in-flight polling tick is awaited
    /// out before the final frame is grabbed, so capture never races a tick.
    pub async fn capture_and_verify(&self) -> Result<VerificationOutcome, SessionError> {
        let current = self.state();
        if current != SessionState::Capturing {
            return Err(SessionError::InvalidState {
                expected: "capturing",
                actual: format!("{current:?}"),
            });
        }

        let camera = {
            let mut live = self.live.lock().await;
            let live = live.as_mut().ok_or(SessionError::InvalidState {
                expected: "capturing",
                actual: "no live capture".into(),
            })?;
            if let Some(poll) = live.poll.take() {
                poll.token.cancel();
                let _ = poll.handle.await;
            }
            live.camera.clone()
        };

        self.state_tx.send_replace(SessionState::Processing);

        let grabbed = {
            let camera = camera.clone();
            tokio::task::spawn_blocking(move || camera.grab()).await
        };
        let frame = match grabbed {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(self.fail(SessionFailure::from_camera(&e))),
            Err(_) => return Err(self.fail(SessionFailure::analysis())),
        };

        // (a) final descriptor extraction
        let detection = match self.analyzer.extract(frame.clone()).await {
            Ok(detection) => detection,
            Err(AnalyzerError::NoFace) => return Err(self.fail(SessionFailure::no_face())),
            Err(AnalyzerError::ModelLoad(detail)) => {
                tracing::error!(error = %detail, "models unavailable at capture");
                return Err(self.fail(SessionFailure::model_load()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "descriptor extraction failed");
                return Err(self.fail(SessionFailure::analysis()));
            }
        };

        // (b) quality gate re-check — quality may have dropped since the
        // last tick
        let quality = self.analyzer.assess(frame).await;
        if !quality.is_good_quality {
            return Err(self.fail(SessionFailure::poor_quality(&quality.issues)));
        }

        // (c) duplicate check
        let check = self
            .resolver
            .check_duplicate(&detection.descriptor, &self.award_id, Some(&self.subject_id))
            .await;
        if check.is_duplicate {
            tracing::warn!(
                award = %self.award_id,
                confidence = check.confidence,
                matches = check.matches.len(),
                "duplicate vote detected"
            );
            return Err(self.fail(SessionFailure::duplicate(check.confidence)));
        }

        // (d) store for future checks — advisory, never fails the attempt
        self.resolver
            .store_for_future_checks(&detection.descriptor, &self.subject_id, &self.award_id)
            .await;

        // (e) success: stop the camera before observers hear about it
        let outcome = VerificationOutcome {
            verified: true,
            timestamp: Utc::now(),
            biometric_hash: biometric_hash(&detection.descriptor),
            confidence: detection.confidence,
            quality,
        };

        if let Some(live) = self.live.lock().await.take() {
            live.camera.stop();
        }
        self.state_tx.send_replace(SessionState::Success);

        tracing::info!(
            award = %self.award_id,
            hash = %outcome.biometric_hash,
            confidence = outcome.confidence,
            "facial verification succeeded"
        );
        Ok(outcome)
    }

    /// Return from `failed` to `capturing` (camera still held) or `idle`
    /// (camera already released).
    pub async fn retry(&self) -> Result<(), SessionError> {
        let current = self.state();
        let SessionState::Failed(_) = current else {
            return Err(SessionError::InvalidState {
                expected: "failed",
                actual: format!("{current:?}"),
            });
        };

        let mut live = self.live.lock().await;
        match live.as_mut() {
            Some(capture) => {
                if capture.poll.is_none() {
                    capture.poll = Some(self.spawn_polling(capture.camera.clone()));
                }
                self.state_tx.send_replace(SessionState::Capturing);
            }
            None => {
                self.state_tx.send_replace(SessionState::Idle);
            }
        }
        Ok(())
    }

    /// Tear down from any state: stop the camera, cancel polling, drop any
    /// in-flight assessment, return to `idle`. Safe to call repeatedly.
    pub async fn cancel(&self) {
        if let Some(live) = self.live.lock().await.take() {
            if let Some(poll) = live.poll {
                // Cancel without awaiting: a late inference result is
                // discarded by the task itself, never applied to state.
                poll.token.cancel();
            }
            live.camera.stop();
        }
        self.quality_tx.send_replace(None);
        self.state_tx.send_replace(SessionState::Idle);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // Teardown must release the camera even when cancel was never
        // called. try_lock suffices: nothing else holds the lock once the
        // session is being dropped.
        if let Ok(mut live) = self.live.try_lock() {
            if let Some(capture) = live.take() {
                if let Some(poll) = capture.poll {
                    poll.token.cancel();
                }
                capture.camera.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ballotguard_api::ApiClient;
    use ballotguard_core::{BoundingBox, FaceDetection, DESCRIPTOR_DIM};
    use ballotguard_hw::Frame;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;
    use url::Url;

    fn good_quality() -> QualityAssessment {
        QualityAssessment {
            face_detected: true,
            confidence: 0.9,
            is_good_quality: true,
            issues: vec![],
        }
    }

    fn no_face_quality() -> QualityAssessment {
        QualityAssessment::unavailable("no face detected")
    }

    fn detection() -> FaceDetection {
        FaceDetection {
            descriptor: FaceDescriptor {
                values: (0..DESCRIPTOR_DIM).map(|i| i as f32 * 0.01).collect(),
                model_version: None,
            },
            bounding_box: BoundingBox {
                x: 100.0,
                y: 100.0,
                width: 200.0,
                height: 200.0,
                confidence: 0.9,
                keypoints: None,
            },
            confidence: 0.9,
        }
    }

    struct ScriptedAnalyzer {
        assessments: StdMutex<VecDeque<QualityAssessment>>,
        extraction: StdMutex<Option<Result<FaceDetection, AnalyzerError>>>,
        init_result: Option<AnalyzerError>,
        /// When set, `assess` signals `entered` and then blocks on `gate`.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedAnalyzer {
        fn new(assessments: Vec<QualityAssessment>) -> Self {
            Self {
                assessments: StdMutex::new(assessments.into()),
                extraction: StdMutex::new(Some(Ok(detection()))),
                init_result: None,
                gate: None,
            }
        }

        fn failing_init() -> Self {
            let mut s = Self::new(vec![]);
            s.init_result = Some(AnalyzerError::ModelLoad("missing models".into()));
            s
        }

        fn gated(gate: Arc<Notify>, entered: Arc<Notify>) -> Self {
            let mut s = Self::new(vec![good_quality()]);
            s.gate = Some((gate, entered));
            s
        }

        fn with_extraction(self, result: Result<FaceDetection, AnalyzerError>) -> Self {
            *self.extraction.lock().unwrap() = Some(result);
            self
        }
    }

    #[async_trait]
    impl FaceAnalyzer for ScriptedAnalyzer {
        async fn initialize(&self) -> Result<(), AnalyzerError> {
            match &self.init_result {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn assess(&self, _frame: Frame) -> QualityAssessment {
            if let Some((gate, entered)) = &self.gate {
                entered.notify_one();
                gate.notified().await;
            }
            let mut scripted = self.assessments.lock().unwrap();
            if scripted.len() > 1 {
                scripted.pop_front().unwrap()
            } else {
                scripted
                    .front()
                    .cloned()
                    .unwrap_or_else(|| QualityAssessment::unavailable("script exhausted"))
            }
        }

        async fn extract(&self, _frame: Frame) -> Result<FaceDetection, AnalyzerError> {
            self.extraction
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Err(AnalyzerError::NoFace))
        }
    }

    struct StubCamera {
        stopped: AtomicBool,
        grabs: AtomicUsize,
    }

    impl StubCamera {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stopped: AtomicBool::new(false),
                grabs: AtomicUsize::new(0),
            })
        }
    }

    impl FrameSource for StubCamera {
        fn grab(&self) -> Result<Frame, CameraError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(Frame {
                data: vec![128u8; 64 * 64],
                width: 64,
                height: 64,
                timestamp: std::time::Instant::now(),
                sequence: 0,
            })
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }

        fn dimensions(&self) -> (u32, u32) {
            (64, 64)
        }
    }

    struct StubProvider {
        camera: Arc<StubCamera>,
        error: Option<CameraError>,
    }

    impl CameraProvider for StubProvider {
        fn open(&self) -> Result<Arc<dyn FrameSource>, CameraError> {
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(self.camera.clone()),
            }
        }
    }

    fn offline_resolver() -> Arc<DuplicateResolver> {
        let client = Arc::new(ApiClient::new(Url::parse("http://127.0.0.1:1/").unwrap()));
        Arc::new(DuplicateResolver::new(client, 0.6))
    }

    fn resolver_for(server: &MockServer) -> Arc<DuplicateResolver> {
        let client = Arc::new(ApiClient::new(Url::parse(&server.url("/")).unwrap()));
        Arc::new(DuplicateResolver::new(client, 0.6))
    }

    fn session(
        analyzer: ScriptedAnalyzer,
        resolver: Arc<DuplicateResolver>,
        camera: Arc<StubCamera>,
    ) -> CaptureSession {
        CaptureSession::new(
            Arc::new(analyzer),
            resolver,
            Arc::new(StubProvider {
                camera,
                error: None,
            }),
            SessionConfig::default(),
            "award-1",
            "member-1",
        )
    }

    fn mock_no_duplicate(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST).path("/votes/check-biometric-duplicate");
            then.status(200)
                .json_body(json!({"isDuplicate": false, "confidence": 0.0, "matches": []}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/votes/store-biometric-data");
            then.status(200).json_body(json!({"stored": true}));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_two_empty_ticks_then_capture_succeeds() {
        let server = MockServer::start_async().await;
        mock_no_duplicate(&server);

        let camera = StubCamera::new();
        let analyzer = ScriptedAnalyzer::new(vec![
            no_face_quality(),
            no_face_quality(),
            good_quality(),
        ]);
        let session = session(analyzer, resolver_for(&server), camera.clone());

        session.initialize().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Capturing);

        let mut quality = session.quality_watch();
        quality.changed().await.unwrap();
        assert!(!quality.borrow().as_ref().unwrap().face_detected);
        quality.changed().await.unwrap();
        assert!(!quality.borrow().as_ref().unwrap().face_detected);
        quality.changed().await.unwrap();
        assert!(quality.borrow().as_ref().unwrap().is_good_quality);

        let outcome = session.capture_and_verify().await.unwrap();
        assert!(outcome.verified);
        assert!(!outcome.biometric_hash.is_empty());
        assert!((outcome.confidence - 0.9).abs() < 1e-6);
        assert_eq!(session.state(), SessionState::Success);
        assert!(camera.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_verdict_fails_with_confidence_in_message() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/votes/check-biometric-duplicate");
                then.status(200).json_body(
                    json!({"isDuplicate": true, "confidence": 0.92, "matches": []}),
                );
            })
            .await;

        let camera = StubCamera::new();
        let analyzer = ScriptedAnalyzer::new(vec![good_quality()]);
        let session = session(analyzer, resolver_for(&server), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();

        let err = session.capture_and_verify().await.unwrap_err();
        let SessionError::Failed(failure) = err else {
            panic!("expected failure, got {err:?}");
        };
        assert_eq!(failure.kind, FailureKind::DuplicateVote);
        assert!(failure.message.contains("already voted"));
        assert!(failure.message.contains("92"));
        assert!(!failure.is_retryable());

        assert!(matches!(session.state(), SessionState::Failed(_)));
        // Failure keeps the camera for a retry; only success and cancel
        // release it.
        assert!(!camera.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_camera_and_halts_polling() {
        let camera = StubCamera::new();
        let analyzer = ScriptedAnalyzer::new(vec![good_quality()]);
        let session = session(analyzer, offline_resolver(), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();

        let mut quality = session.quality_watch();
        quality.changed().await.unwrap();

        session.cancel().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(camera.is_stopped());

        // No further tick fires after cancellation.
        let grabs_at_cancel = camera.grabs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(camera.grabs.load(Ordering::SeqCst), grabs_at_cancel);
        assert!(session.quality_watch().borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tick_result_is_discarded_after_cancel() {
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let camera = StubCamera::new();
        let analyzer = ScriptedAnalyzer::gated(gate.clone(), entered.clone());
        let session = session(analyzer, offline_resolver(), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();

        // Wait until the first tick's inference is in flight.
        entered.notified().await;

        session.cancel().await;
        assert_eq!(session.state(), SessionState::Idle);

        // Release the in-flight assessment after cancellation: its result
        // must be dropped, never applied to state.
        gate.notify_one();
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(session.quality_watch().borrow().is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn quality_recheck_gates_the_capture() {
        // Every assessment reports poor quality: extraction succeeds but the
        // re-check between last tick and capture fails the attempt.
        let bad = QualityAssessment {
            face_detected: true,
            confidence: 0.6,
            is_good_quality: false,
            issues: vec!["low face detection confidence".into()],
        };
        let camera = StubCamera::new();
        let analyzer = ScriptedAnalyzer::new(vec![bad]);
        let session = session(analyzer, offline_resolver(), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();

        let err = session.capture_and_verify().await.unwrap_err();
        let SessionError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::PoorQuality);
        assert!(failure.message.contains("low face detection confidence"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_face_at_capture_names_the_problem() {
        let camera = StubCamera::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![good_quality()]).with_extraction(Err(AnalyzerError::NoFace));
        let session = session(analyzer, offline_resolver(), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();

        let err = session.capture_and_verify().await.unwrap_err();
        let SessionError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::NoFace);
        assert!(failure.message.contains("No face"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_failure_resumes_capturing() {
        let camera = StubCamera::new();
        let analyzer =
            ScriptedAnalyzer::new(vec![good_quality()]).with_extraction(Err(AnalyzerError::NoFace));
        let session = session(analyzer, offline_resolver(), camera.clone());

        session.initialize().await.unwrap();
        session.start().await.unwrap();
        let _ = session.capture_and_verify().await;
        assert!(matches!(session.state(), SessionState::Failed(_)));

        session.retry().await.unwrap();
        assert_eq!(session.state(), SessionState::Capturing);

        // Polling is live again.
        let grabs_before = camera.grabs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(camera.grabs.load(Ordering::SeqCst) > grabs_before);
    }

    #[tokio::test]
    async fn camera_permission_denied_maps_to_actionable_failure() {
        let analyzer = ScriptedAnalyzer::new(vec![]);
        let session = CaptureSession::new(
            Arc::new(analyzer),
            offline_resolver(),
            Arc::new(StubProvider {
                camera: StubCamera::new(),
                error: Some(CameraError::PermissionDenied),
            }),
            SessionConfig::default(),
            "award-1",
            "member-1",
        );

        session.initialize().await.unwrap();
        let err = session.start().await.unwrap_err();
        let SessionError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::CameraPermission);
        assert!(failure.message.contains("denied"));
        assert!(failure.is_retryable());
    }

    #[tokio::test]
    async fn model_load_failure_fails_initialization() {
        let camera = StubCamera::new();
        let session = session(ScriptedAnalyzer::failing_init(), offline_resolver(), camera);

        let err = session.initialize().await.unwrap_err();
        let SessionError::Failed(failure) = err else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::ModelLoad);
        assert!(matches!(session.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn capture_outside_capturing_state_is_rejected() {
        let camera = StubCamera::new();
        let session = session(
            ScriptedAnalyzer::new(vec![good_quality()]),
            offline_resolver(),
            camera,
        );

        let err = session.capture_and_verify().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn camera_failures_map_exhaustively() {
        assert_eq!(
            SessionFailure::from_camera(&CameraError::DeviceInUse).kind,
            FailureKind::CameraInUse
        );
        assert_eq!(
            SessionFailure::from_camera(&CameraError::DeviceNotFound).kind,
            FailureKind::CameraNotFound
        );
        let unknown = SessionFailure::from_camera(&CameraError::Unknown("flaky cable".into()));
        assert_eq!(unknown.kind, FailureKind::Camera);
        assert!(unknown.message.contains("flaky cable"));
    }

    #[test]
    fn biometric_hash_is_deterministic_and_distinguishing() {
        let a = FaceDescriptor {
            values: vec![0.25; DESCRIPTOR_DIM],
            model_version: None,
        };
        let b = FaceDescriptor {
            values: vec![0.75; DESCRIPTOR_DIM],
            model_version: None,
        };
        assert_eq!(biometric_hash(&a), biometric_hash(&a));
        assert_ne!(biometric_hash(&a), biometric_hash(&b));
        assert!(biometric_hash(&a).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
