use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{NoopLogger, UploadError, UploadLogger, UploadResult};

/// Largest number of parts a multipart upload may have
pub const MAX_PART_COUNT: u32 = 10_000;

/// Smallest part size accepted for every part but the last (5MB)
pub const MIN_PART_SIZE: u64 = 5_242_880;

/// Part size used when none, or one below the minimum, is requested (8MB)
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Default alignment unit for direct (uncached) reads
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Configuration for a single upload
#[derive(Clone)]
pub struct UploadConfig {
    /// Deadline for the whole session, from initiate through complete
    pub timeout: Duration,

    /// Upper bound on part transfers in flight at once
    pub max_concurrency: usize,

    /// Requested part size in bytes (may be replaced or enlarged by planning)
    pub part_size: u64,

    /// Provider limits used when planning parts
    pub limits: PlanLimits,

    /// How the local file is read
    pub read_mode: ReadMode,

    /// Ask the backend to discard the session when the upload fails
    pub abort_on_failure: bool,

    /// Bound on the best-effort abort call
    pub abort_timeout: Duration,

    /// Event sink; silent by default
    pub logger: Arc<dyn UploadLogger>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60), // 60 minutes
            max_concurrency: 10,
            part_size: DEFAULT_PART_SIZE,
            limits: PlanLimits::default(),
            read_mode: ReadMode::Buffered,
            abort_on_failure: true,
            abort_timeout: Duration::from_secs(30),
            logger: Arc::new(NoopLogger),
        }
    }
}

impl fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadConfig")
            .field("timeout", &self.timeout)
            .field("max_concurrency", &self.max_concurrency)
            .field("part_size", &self.part_size)
            .field("limits", &self.limits)
            .field("read_mode", &self.read_mode)
            .field("abort_on_failure", &self.abort_on_failure)
            .field("abort_timeout", &self.abort_timeout)
            .finish_non_exhaustive()
    }
}

/// Provider-imposed limits on part geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_part_count: u32,
    pub min_part_size: u64,
    pub default_part_size: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_part_count: MAX_PART_COUNT,
            min_part_size: MIN_PART_SIZE,
            default_part_size: DEFAULT_PART_SIZE,
        }
    }
}

impl PlanLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_part_count(mut self, count: u32) -> Self {
        self.max_part_count = count;
        self
    }

    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    pub fn with_default_part_size(mut self, bytes: u64) -> Self {
        self.default_part_size = bytes;
        self
    }
}

/// How part bytes are read from the local file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Ordinary buffered positioned reads
    #[default]
    Buffered,
    /// Buffered reads with the page cache advised to drop the file
    DontNeed,
    /// `O_DIRECT` reads through block-aligned buffers, falling back to buffered
    Direct { block_size: usize },
}

impl ReadMode {
    fn parse(value: &str, block_size: usize) -> UploadResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Self::Buffered),
            "dontneed" => Ok(Self::DontNeed),
            "direct" => Ok(Self::Direct { block_size }),
            other => Err(UploadError::invalid(format!(
                "Unknown read mode '{}' (expected buffered, dontneed or direct)",
                other
            ))),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults overridden by `{prefix}__*` environment variables.
    ///
    /// Recognised keys: `PART_SIZE`, `MAX_CONCURRENCY`, `TIMEOUT_SECS`,
    /// `READ_MODE`, `DIRECT_BLOCK_SIZE`, `ABORT_ON_FAILURE`.
    pub fn from_env(prefix: &str) -> UploadResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Same as [`UploadConfig::from_env`] over an explicit variable set
    pub fn from_vars<I>(prefix: &str, vars: I) -> UploadResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        let mut read_mode = None;
        let mut block_size = DEFAULT_BLOCK_SIZE;
        let prefix = format!("{}__", prefix);

        for (key, value) in vars {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            match name {
                "PART_SIZE" => config.part_size = parse_number(&key, &value)?,
                "MAX_CONCURRENCY" => config.max_concurrency = parse_number(&key, &value)?,
                "TIMEOUT_SECS" => config.timeout = Duration::from_secs(parse_number(&key, &value)?),
                "READ_MODE" => read_mode = Some(value),
                "DIRECT_BLOCK_SIZE" => block_size = parse_number(&key, &value)?,
                "ABORT_ON_FAILURE" => config.abort_on_failure = parse_bool(&key, &value)?,
                _ => {}
            }
        }

        if let Some(mode) = read_mode {
            config.read_mode = ReadMode::parse(&mode, block_size)?;
        }

        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes;
        self
    }

    pub fn with_limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    /// Leave failed sessions on the backend instead of aborting them
    pub fn keep_failed_sessions(mut self) -> Self {
        self.abort_on_failure = false;
        self
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn UploadLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Concurrency actually used; never below one
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> UploadResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::invalid(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> UploadResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(UploadError::invalid(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_provider_limits() {
        let config = UploadConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.part_size, 8 * 1024 * 1024);
        assert_eq!(config.limits.max_part_count, 10_000);
        assert_eq!(config.limits.min_part_size, 5_242_880);
        assert_eq!(config.read_mode, ReadMode::Buffered);
        assert!(config.abort_on_failure);
    }

    #[test]
    fn zero_concurrency_is_clamped_to_one() {
        let config = UploadConfig::new().with_max_concurrency(0);
        assert_eq!(config.effective_concurrency(), 1);
        assert_eq!(UploadConfig::new().with_max_concurrency(4).effective_concurrency(), 4);
    }

    #[test]
    fn env_overrides_apply_under_prefix_only() {
        let config = UploadConfig::from_vars(
            "DOGUPLOAD",
            vars(&[
                ("DOGUPLOAD__PART_SIZE", "16777216"),
                ("DOGUPLOAD__MAX_CONCURRENCY", "3"),
                ("DOGUPLOAD__TIMEOUT_SECS", "90"),
                ("DOGUPLOAD__READ_MODE", "direct"),
                ("DOGUPLOAD__DIRECT_BLOCK_SIZE", "512"),
                ("DOGUPLOAD__ABORT_ON_FAILURE", "false"),
                ("OTHER__PART_SIZE", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.part_size, 16_777_216);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.timeout, Duration::from_secs(90));
        assert_eq!(config.read_mode, ReadMode::Direct { block_size: 512 });
        assert!(!config.abort_on_failure);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = UploadConfig::from_vars("DOGUPLOAD", vars(&[("DOGUPLOAD__PART_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument { .. }));

        let err = UploadConfig::from_vars("DOGUPLOAD", vars(&[("DOGUPLOAD__READ_MODE", "mmap")]))
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument { .. }));
    }
}
