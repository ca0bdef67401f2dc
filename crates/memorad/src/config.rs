use memora_core::{ProcessorConfig, TrackerConfig};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LABEL_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Preferred V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Frames discarded after the camera opens (AGC/AE settling).
    pub warmup_frames: usize,
    /// Flip frames horizontally before processing.
    pub mirror: bool,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the JSON identity store.
    pub db_path: PathBuf,
    /// Directory that receives reference images on registration.
    pub image_dir: PathBuf,
    /// Maximum Euclidean embedding distance for a match, calibrated for
    /// the bundled ArcFace embedder.
    pub tolerance: f32,
    pub track_distance: f32,
    pub trigger_threshold: i32,
    pub save_duration: Duration,
    pub cooldown_count: i32,
    pub pending_timeout: Duration,
    /// Producer tick.
    pub tick: Duration,
    /// Consumer poll interval with no pending registration.
    pub idle_poll: Duration,
    /// Consumer poll interval while a registration is pending.
    pub pending_poll: Duration,
    pub display_width: u32,
    pub display_height: u32,
    pub detection_scale: f32,
    /// Font for name labels on the annotated frame; unset or empty for none.
    pub label_font: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `MEMORA_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("memora");

        let path_or = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        Self {
            camera_device: std::env::var("MEMORA_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_width: env_u32("MEMORA_CAPTURE_WIDTH", 640),
            capture_height: env_u32("MEMORA_CAPTURE_HEIGHT", 480),
            warmup_frames: env_usize("MEMORA_WARMUP_FRAMES", 5),
            mirror: std::env::var("MEMORA_MIRROR")
                .map(|v| v != "0")
                .unwrap_or(true),
            model_dir: path_or("MEMORA_MODEL_DIR", data_dir.join("models")),
            db_path: path_or("MEMORA_DB_PATH", data_dir.join("identities.json")),
            image_dir: path_or("MEMORA_IMAGE_DIR", data_dir.join("images")),
            tolerance: env_f32("MEMORA_TOLERANCE", memora_core::onnx::ARCFACE_TOLERANCE),
            track_distance: env_f32("MEMORA_TRACK_DISTANCE", 100.0),
            trigger_threshold: env_i32("MEMORA_TRIGGER_THRESHOLD", 8),
            save_duration: Duration::from_millis(env_u64("MEMORA_SAVE_DURATION_MS", 5000)),
            cooldown_count: env_i32("MEMORA_COOLDOWN_COUNT", -150),
            pending_timeout: Duration::from_secs(env_u64("MEMORA_PENDING_TIMEOUT_SECS", 300)),
            tick: Duration::from_millis(env_u64("MEMORA_TICK_MS", 30)),
            idle_poll: Duration::from_millis(env_u64("MEMORA_IDLE_POLL_MS", 80)),
            pending_poll: Duration::from_millis(env_u64("MEMORA_PENDING_POLL_MS", 250)),
            display_width: env_u32("MEMORA_DISPLAY_WIDTH", 800),
            display_height: env_u32("MEMORA_DISPLAY_HEIGHT", 500),
            detection_scale: env_f32("MEMORA_DETECTION_SCALE", 0.25),
            label_font: Some(
                std::env::var("MEMORA_LABEL_FONT").unwrap_or_else(|_| DEFAULT_LABEL_FONT.to_string()),
            )
            .filter(|p| !p.is_empty())
            .map(PathBuf::from),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            correlation_distance: self.track_distance,
            trigger_threshold: self.trigger_threshold,
            save_duration: self.save_duration,
            cooldown_count: self.cooldown_count,
        }
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            display_width: self.display_width,
            display_height: self.display_height,
            detection_scale: self.detection_scale,
            label_font: self.label_font.clone(),
            ..ProcessorConfig::default()
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

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
