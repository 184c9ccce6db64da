use crate::error::{Error, Result};
use std::path::PathBuf;

/// Element count used when none is given on the command line.
pub const DEFAULT_ELEMENTS: usize = 100_000_000;

/// Arrays longer than this are previewed as head/tail only.
pub const DEFAULT_PREVIEW_THRESHOLD: usize = 15;

/// Kernel source loaded when no path is configured.
pub const DEFAULT_KERNEL_PATH: &str = "kernels/vector_ops.wgsl";
/// Compute entry point extracted when none is configured.
pub const DEFAULT_ENTRY_POINT: &str = "vector_add";

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    pub elements: usize,
    pub kernel_path: PathBuf,
    pub entry_point: String,
    pub preview_threshold: usize,

    /// Fall back to a general-purpose adapter when no accelerator exists.
    pub allow_fallback: bool,
    pub backends: wgpu::Backends,

    /// Compare the device output against a host-computed reference.
    pub verify: bool,
    pub seed: Option<u64>,
    pub metrics_json: Option<PathBuf>,

    /// Upper bound on the bytes one kernel argument binds. The device's own
    /// storage binding limit applies when this is unset or larger.
    pub max_binding_bytes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            preview_threshold: DEFAULT_PREVIEW_THRESHOLD,
            allow_fallback: true,
            backends: wgpu::Backends::all(),
            verify: false,
            seed: None,
            metrics_json: None,
            max_binding_bytes: None,
        }
    }
}

impl Config {
    /// Start from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults overlaid with `OFFLOAD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::new();

        if let Ok(path) = std::env::var("OFFLOAD_KERNEL_PATH") {
            builder = builder.kernel_path(path);
        }
        if let Ok(entry) = std::env::var("OFFLOAD_ENTRY") {
            builder = builder.entry_point(entry);
        }
        if env_flag("OFFLOAD_NO_FALLBACK") {
            builder = builder.allow_fallback(false);
        }
        if env_flag("OFFLOAD_VERIFY") {
            builder = builder.verify(true);
        }
        if let Ok(seed) = std::env::var("OFFLOAD_SEED") {
            let seed = seed
                .parse::<u64>()
                .map_err(|e| Error::config(format!("OFFLOAD_SEED: {}", e)))?;
            builder = builder.seed(seed);
        }
        if let Ok(path) = std::env::var("OFFLOAD_METRICS_JSON") {
            builder = builder.metrics_json(path);
        }
        if let Ok(bytes) = std::env::var("OFFLOAD_MAX_BINDING_BYTES") {
            let bytes = bytes
                .parse::<u64>()
                .map_err(|e| Error::config(format!("OFFLOAD_MAX_BINDING_BYTES: {}", e)))?;
            builder = builder.max_binding_bytes(bytes);
        }

        builder.build()
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.elements == 0 {
            return Err(Error::config("element count must be > 0"));
        }
        if self.elements > u32::MAX as usize {
            return Err(Error::config(format!(
                "element count {} does not fit the kernel's u32 count parameter",
                self.elements
            )));
        }
        if self.entry_point.is_empty() {
            return Err(Error::config("entry point name must not be empty"));
        }
        if self.backends.is_empty() {
            return Err(Error::config("at least one backend must be enabled"));
        }
        if self.max_binding_bytes == Some(0) {
            return Err(Error::config("max binding size must be > 0"));
        }

        Ok(())
    }

    /// Size in bytes of one device buffer for `elements` values of `T`.
    pub fn buffer_bytes<T>(&self) -> u64 {
        (self.elements as u64) * std::mem::size_of::<T>() as u64
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}
/// Builder for [`Config`]; `build` validates.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Builder holding the defaults.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Elements per array.
    pub fn elements(mut self, n: usize) -> Self {
        self.config.elements = n;
        self
    }

    /// Path of the WGSL kernel source.
    pub fn kernel_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.kernel_path = path.into();
        self
    }

    /// Compute entry point to extract.
    pub fn entry_point<S: Into<String>>(mut self, name: S) -> Self {
        self.config.entry_point = name.into();
        self
    }

    /// Longest array previewed in full.
    pub fn preview_threshold(mut self, threshold: usize) -> Self {
        self.config.preview_threshold = threshold;
        self
    }

    /// Whether a general-purpose adapter may stand in for an accelerator.
    pub fn allow_fallback(mut self, allow: bool) -> Self {
        self.config.allow_fallback = allow;
        self
    }

    /// Backends searched for platforms.
    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.config.backends = backends;
        self
    }

    /// Check the device output against the host reference.
    pub fn verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    /// Seed for the input arrays.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Write a JSON metrics snapshot here after the run.
    pub fn metrics_json<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.metrics_json = Some(path.into());
        self
    }

    /// Cap the bytes one kernel argument binds.
    pub fn max_binding_bytes(mut self, bytes: u64) -> Self {
        self.config.max_binding_bytes = Some(bytes);
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workload() {
        let config = Config::default();
        assert_eq!(config.elements, 100_000_000);
        assert_eq!(config.entry_point, "vector_add");
        assert_eq!(config.preview_threshold, 15);
        assert!(config.allow_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_elements_rejected() {
        let err = Config::builder().elements(0).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_oversized_count_rejected() {
        let result = Config::builder().elements(u32::MAX as usize + 1).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_entry_rejected() {
        assert!(Config::builder().entry_point("").build().is_err());
    }

    #[test]
    fn test_zero_binding_window_rejected() {
        assert!(Config::builder().max_binding_bytes(0).build().is_err());
        let config = Config::builder().max_binding_bytes(4096).build().unwrap();
        assert_eq!(config.max_binding_bytes, Some(4096));
    }

    #[test]
    fn test_buffer_bytes() {
        let config = Config::builder().elements(1000).build().unwrap();
        assert_eq!(config.buffer_bytes::<i32>(), 4000);
    }
}
