//! Logging helpers for migration phases
//!
//! Structured logging goes through `tracing`; the binary embedding this crate
//! installs the subscriber.

use model_description::Attributes;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Configuration keys whose values must never reach a log line
const SENSITIVE_KEYS: &[&str] = &["admin-secret", "ca-private-key", "password", "secret"];

/// RAII guard logging entry to and exit from a migration phase
///
/// ```rust
/// use model_migration::logging::PhaseTimer;
///
/// let mut timer = PhaseTimer::new("export", "deadbeef");
/// // ... phase work ...
/// timer.succeed();
/// ```
pub struct PhaseTimer {
    phase: String,
    model: String,
    start: Instant,
    succeeded: bool,
}

impl PhaseTimer {
    pub fn new(phase: impl Into<String>, model: impl Into<String>) -> Self {
        let phase = phase.into();
        let model = model.into();
        info!(phase = %phase, model = %model, "Entering migration phase");

        Self {
            phase,
            model,
            start: Instant::now(),
            succeeded: false,
        }
    }

    /// Mark the phase as completed; a timer dropped without this logs a failure
    pub fn succeed(&mut self) {
        self.succeeded = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        if self.succeeded {
            info!(phase = %self.phase, model = %self.model, elapsed = %elapsed, "Completed migration phase");
        } else {
            warn!(phase = %self.phase, model = %self.model, elapsed = %elapsed, "Migration phase did not complete");
        }
    }
}

/// Format duration in human-readable form
///
/// ```rust
/// use model_migration::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
/// assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}

/// Format a transfer size in human-readable form
///
/// ```rust
/// use model_migration::logging::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Copy of a model configuration safe to log
pub fn redact_config(config: &Attributes) -> Attributes {
    config
        .iter()
        .map(|(key, value)| {
            let sensitive = SENSITIVE_KEYS.iter().any(|s| key.contains(s));
            let value = if sensitive {
                serde_json::Value::String("[REDACTED]".into())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}
