use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite cache database file.
    pub db_path: PathBuf,
    /// Default cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Default cap on ranked results per find request (0 = unlimited).
    pub max_results: usize,
    /// External analyzer command: image bytes on stdin, face JSON on stdout.
    pub analyzer_cmd: String,
    /// Timeout in seconds for one analyzer invocation.
    pub analyzer_timeout_secs: u64,
    /// Timeout in seconds for fetching one image.
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `FACESEEK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceseek");

        let db_path = std::env::var("FACESEEK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("cache.db"));

        Self {
            db_path,
            similarity_threshold: env_f32("FACESEEK_THRESHOLD", 0.6),
            max_results: env_usize("FACESEEK_MAX_RESULTS", 0),
            analyzer_cmd: std::env::var("FACESEEK_ANALYZER_CMD")
                .unwrap_or_else(|_| "faceseek-analyzer".to_string()),
            analyzer_timeout_secs: env_u64("FACESEEK_ANALYZER_TIMEOUT_SECS", 30),
            fetch_timeout_secs: env_u64("FACESEEK_FETCH_TIMEOUT_SECS", 30),
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

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
