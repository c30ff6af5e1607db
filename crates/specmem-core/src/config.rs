//! Environment-driven configuration
//!
//! Generalizes the ad hoc `std::env::var` reads a teacher crate scatters through
//! its storage/embedding layers into one typed loader, documented per spec
//! section 6. Every field has a default so a `SpecMemConfig::from_env()` call
//! never fails.

use std::path::PathBuf;
use std::time::Duration;

/// Typed view over the `SPECMEM_*` environment variables
#[derive(Debug, Clone)]
pub struct SpecMemConfig {
    /// `SPECMEM_PROJECT_PATH` - absolute path used as the project scope for every query/insert
    pub project_path: Option<PathBuf>,
    /// `SPECMEM_SYNC_CHECK_INTERVAL_MS` - periodic sync cadence
    pub sync_check_interval: Duration,
    /// `SPECMEM_RESYNC_TIMEOUT_MS` - overall resync deadline
    pub resync_timeout: Duration,
    /// `SPECMEM_SCAN_BATCH_SIZE` - disk-scan batch size (also the cooperative-yield interval)
    pub scan_batch_size: usize,
    /// `SPECMEM_SCAN_MAX_FILES` - disk-scan cap
    pub scan_max_files: usize,
    /// `SPECMEM_SCAN_MAX_HEAP_MB` - disk-scan soft heap ceiling before pausing
    pub scan_max_heap_mb: usize,
    /// `SPECMEM_SCAN_IGNORE_PATTERNS` - comma-separated extra ignore globs
    pub scan_ignore_patterns: Vec<String>,
    /// `SPECMEM_SYNC_MEMORY_LIMIT` - overall store-scan cap
    pub sync_memory_limit: usize,
    /// `SPECMEM_SYNC_MEMORY_PAGE_SIZE` - store-scan page size
    pub sync_memory_page_size: usize,
}

impl Default for SpecMemConfig {
    fn default() -> Self {
        Self {
            project_path: None,
            sync_check_interval: Duration::from_millis(3_600_000),
            resync_timeout: Duration::from_millis(600_000),
            scan_batch_size: 2_000,
            scan_max_files: 50_000,
            scan_max_heap_mb: 2_048,
            scan_ignore_patterns: Vec::new(),
            sync_memory_limit: 50_000,
            sync_memory_page_size: 5_000,
        }
    }
}

impl SpecMemConfig {
    /// Load configuration from the process environment, falling back to
    /// documented defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            project_path: std::env::var("SPECMEM_PROJECT_PATH").ok().map(PathBuf::from),
            sync_check_interval: env_millis(
                "SPECMEM_SYNC_CHECK_INTERVAL_MS",
                defaults.sync_check_interval,
            ),
            resync_timeout: env_millis("SPECMEM_RESYNC_TIMEOUT_MS", defaults.resync_timeout),
            scan_batch_size: env_usize("SPECMEM_SCAN_BATCH_SIZE", defaults.scan_batch_size),
            scan_max_files: env_usize("SPECMEM_SCAN_MAX_FILES", defaults.scan_max_files),
            scan_max_heap_mb: env_usize("SPECMEM_SCAN_MAX_HEAP_MB", defaults.scan_max_heap_mb),
            scan_ignore_patterns: std::env::var("SPECMEM_SCAN_IGNORE_PATTERNS")
                .ok()
                .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                .unwrap_or_default(),
            sync_memory_limit: env_usize("SPECMEM_SYNC_MEMORY_LIMIT", defaults.sync_memory_limit),
            sync_memory_page_size: env_usize(
                "SPECMEM_SYNC_MEMORY_PAGE_SIZE",
                defaults.sync_memory_page_size,
            ),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Install a `tracing-subscriber` `EnvFilter` subscriber for binaries/tests.
///
/// Library consumers that already have a subscriber installed should not
/// call this; it is a convenience for examples and integration tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SpecMemConfig::default();
        assert_eq!(cfg.scan_batch_size, 2_000);
        assert_eq!(cfg.sync_memory_page_size, 5_000);
        assert!(cfg.project_path.is_none());
    }

    #[test]
    fn env_usize_falls_back_on_garbage() {
        std::env::set_var("SPECMEM_TEST_USIZE", "not-a-number");
        assert_eq!(env_usize("SPECMEM_TEST_USIZE", 42), 42);
        std::env::remove_var("SPECMEM_TEST_USIZE");
    }
}
