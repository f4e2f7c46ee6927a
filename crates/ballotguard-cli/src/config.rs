use ballotguard_core::QualityThresholds;
use ballotguard_verify::SessionConfig;
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from `BALLOTGUARD_*` environment variables.
/// Library crates take these values as explicit config; only the binary
/// reads the environment.
pub struct Config {
    /// Backend base URL (kept slash-terminated for endpoint joining).
    pub api_base_url: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Euclidean distance below which two faces are the same person.
    pub match_threshold: f32,
    /// Detection confidence required for a capturable face.
    pub quality_confidence: f32,
    /// Pause between face-quality polling ticks.
    pub poll_interval_ms: u64,
    /// Bound on model loading.
    pub model_load_timeout_secs: u64,
    /// Retries after a failed vote submission.
    pub vote_max_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let model_dir = std::env::var("BALLOTGUARD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/ballotguard/models"));

        let mut api_base_url = std::env::var("BALLOTGUARD_API_URL")
            .unwrap_or_else(|_| "http://localhost:4000/api/".to_string());
        if !api_base_url.ends_with('/') {
            api_base_url.push('/');
        }

        Self {
            api_base_url,
            model_dir,
            camera_device: std::env::var("BALLOTGUARD_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            match_threshold: env_f32("BALLOTGUARD_MATCH_THRESHOLD", 0.60),
            quality_confidence: env_f32("BALLOTGUARD_QUALITY_CONFIDENCE", 0.70),
            poll_interval_ms: env_u64("BALLOTGUARD_POLL_INTERVAL_MS", 2000),
            model_load_timeout_secs: env_u64("BALLOTGUARD_MODEL_TIMEOUT_SECS", 30),
            vote_max_retries: env_u32("BALLOTGUARD_VOTE_MAX_RETRIES", 3),
        }
    }

    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            good_confidence: self.quality_confidence,
            ..QualityThresholds::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            model_load_timeout: Duration::from_secs(self.model_load_timeout_secs),
            thresholds: self.thresholds(),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
