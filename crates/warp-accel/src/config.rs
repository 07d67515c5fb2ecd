//! Offload configuration
//!
//! Values come from defaults, optionally a TOML file, then `WARP_ACCEL_*`
//! environment variables. Everything here is read once at startup except
//! the disable flags, which seed the runtime [`AccelSwitch`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{AccelSwitch, SizeWindow};
use crate::software::DEFAULT_LEVEL;
use crate::types::{DEFAULT_TIMEOUT, MAX_BUF_SIZE, MIN_BUF_SIZE};

/// Configuration for the offload layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    /// Force all traffic to software
    pub disabled: bool,

    /// Force compression traffic to software
    pub compress_disabled: bool,

    /// Force encryption traffic to software
    pub encrypt_disabled: bool,

    /// Smallest request worth offloading (default: 4KB)
    pub min_buf_size: usize,

    /// Largest request worth offloading (default: 128KB)
    pub max_buf_size: usize,

    /// Completion timeout in milliseconds (default: 500)
    pub timeout_ms: u64,

    /// DMA memory budget in bytes
    pub dma_capacity: usize,

    /// Requests above this many bytes use the virtually-mapped path
    pub direct_alloc_limit: usize,

    /// Deflate level used by the device
    pub compression_level: u32,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            compress_disabled: false,
            encrypt_disabled: false,
            min_buf_size: MIN_BUF_SIZE,
            max_buf_size: MAX_BUF_SIZE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            dma_capacity: 64 * 1024 * 1024,
            direct_alloc_limit: 32 * 1024,
            compression_level: DEFAULT_LEVEL,
        }
    }
}

impl AccelConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that never offloads
    pub fn software_only() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Set the eligibility window
    pub fn with_window(mut self, min: usize, max: usize) -> Self {
        self.min_buf_size = min;
        self.max_buf_size = max;
        self
    }

    /// Set the completion timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable all acceleration
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the DMA memory budget
    pub fn with_dma_capacity(mut self, bytes: usize) -> Self {
        self.dma_capacity = bytes;
        self
    }

    /// Completion timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Eligibility window
    pub fn window(&self) -> SizeWindow {
        SizeWindow::new(self.min_buf_size, self.max_buf_size)
    }

    /// Build the runtime switch seeded from the disable flags
    pub fn switch(&self) -> AccelSwitch {
        let switch = AccelSwitch::new();
        switch.set_disabled(self.disabled);
        switch.set_compress_disabled(self.compress_disabled);
        switch.set_encrypt_disabled(self.encrypt_disabled);
        switch
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.min_buf_size == 0 {
            return Err(Error::InvalidConfig("min_buf_size must be > 0".into()));
        }
        if self.min_buf_size > self.max_buf_size {
            return Err(Error::InvalidConfig(format!(
                "min_buf_size {} exceeds max_buf_size {}",
                self.min_buf_size, self.max_buf_size
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeout_ms must be > 0".into()));
        }
        if self.dma_capacity < self.max_buf_size {
            return Err(Error::InvalidConfig(format!(
                "dma_capacity {} cannot hold a {}-byte request",
                self.dma_capacity, self.max_buf_size
            )));
        }
        if self.compression_level > 9 {
            return Err(Error::InvalidConfig(format!(
                "compression_level {} out of range 0-9",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply `WARP_ACCEL_*` overrides from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_vars(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = get("WARP_ACCEL_DISABLE") {
            self.disabled = parse_bool("WARP_ACCEL_DISABLE", &v)?;
        }
        if let Some(v) = get("WARP_ACCEL_COMPRESS_DISABLE") {
            self.compress_disabled = parse_bool("WARP_ACCEL_COMPRESS_DISABLE", &v)?;
        }
        if let Some(v) = get("WARP_ACCEL_ENCRYPT_DISABLE") {
            self.encrypt_disabled = parse_bool("WARP_ACCEL_ENCRYPT_DISABLE", &v)?;
        }
        if let Some(v) = get("WARP_ACCEL_TIMEOUT_MS") {
            self.timeout_ms = parse_num("WARP_ACCEL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("WARP_ACCEL_MIN_BUF_SIZE") {
            self.min_buf_size = parse_num("WARP_ACCEL_MIN_BUF_SIZE", &v)?;
        }
        if let Some(v) = get("WARP_ACCEL_MAX_BUF_SIZE") {
            self.max_buf_size = parse_num("WARP_ACCEL_MAX_BUF_SIZE", &v)?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{name}: not a boolean: {other}"))),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{name}: not a number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AccelConfig::default();
        assert_eq!(config.min_buf_size, 4096);
        assert_eq!(config.max_buf_size, 131_072);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
        assert!(!config.switch().is_disabled());
    }

    #[test]
    fn test_builder() {
        let config = AccelConfig::new()
            .with_window(1024, 65536)
            .with_timeout(Duration::from_millis(50))
            .with_disabled(true);
        assert_eq!(config.window(), SizeWindow::new(1024, 65536));
        assert_eq!(config.timeout_ms, 50);
        assert!(config.switch().is_disabled());
        assert!(AccelConfig::software_only().disabled);
    }

    #[test]
    fn test_validation() {
        assert!(AccelConfig::new().with_window(0, 10).validate().is_err());
        assert!(AccelConfig::new().with_window(8192, 4096).validate().is_err());
        assert!(AccelConfig::new()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(AccelConfig::new().with_dma_capacity(1024).validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = AccelConfig::from_toml_str(
            r#"
            timeout_ms = 250
            max_buf_size = 65536
            encrypt_disabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.max_buf_size, 65536);
        assert_eq!(config.min_buf_size, MIN_BUF_SIZE);
        assert!(config.switch().encrypt_disabled());
        assert!(!config.switch().compress_disabled());

        assert!(AccelConfig::from_toml_str("min_buf_size = 0").is_err());
        assert!(AccelConfig::from_toml_str("timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "disabled = true\nmin_buf_size = 8192").unwrap();
        let config = AccelConfig::from_file(file.path()).unwrap();
        assert!(config.disabled);
        assert_eq!(config.min_buf_size, 8192);

        assert!(matches!(
            AccelConfig::from_file("/nonexistent/warp-accel.toml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WARP_ACCEL_DISABLE", "yes"),
            ("WARP_ACCEL_TIMEOUT_MS", "100"),
            ("WARP_ACCEL_MIN_BUF_SIZE", "2048"),
        ]
        .into_iter()
        .collect();
        let config = AccelConfig::new()
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(config.disabled);
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.min_buf_size, 2048);

        let bad = AccelConfig::new().apply_vars(|name| {
            (name == "WARP_ACCEL_DISABLE").then(|| "maybe".to_string())
        });
        assert!(bad.is_err());
    }
}
