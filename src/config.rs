//! Configuration module.
//!
//! Handles loading, validating, and merging the `product-images.toml` file.
//! Stock defaults form the base layer; the user file is merged on top, so it
//! only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [uploads]
//! max_files = 5                 # Files accepted per batch
//! max_file_bytes = 10485760     # Per-file limit on the original upload
//! skip_duplicates = false       # Reject files already on the product
//!
//! [compression]
//! max_width = 1920
//! max_height = 1920
//! quality = 0.8                 # 0.0 - 1.0
//! # format = "avif"             # avif | jpeg | png | webp, omit to negotiate
//! background = [255, 255, 255]  # Fill for transparency in JPEG output
//! decode_timeout_secs = 30
//!
//! [thumbnails]
//! enabled = true
//! aspect_ratio = [1, 1]
//! short_edge = 300
//!
//! [local]
//! root = ".product-images"      # Draft storage directory
//! quota_bytes = 104857600
//!
//! [remote]
//! endpoint = ""                 # Object store base URL
//! bucket = "product-images"
//! public_base_url = ""          # Defaults to {endpoint}/object/public/{bucket}
//! api_key_env = "PRODUCT_IMAGES_API_KEY"
//! timeout_secs = 30
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::OutputFormat;
use crate::storage::RemoteSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "product-images.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full configuration. Every section has defaults; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Batch admission limits.
    pub uploads: UploadsConfig,
    /// Re-encoding envelope.
    pub compression: CompressionConfig,
    pub thumbnails: ThumbnailsConfig,
    /// Draft storage on this machine.
    pub local: LocalConfig,
    /// Shared object store for persisted products.
    pub remote: RemoteConfig,
}

impl ImagesConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uploads.max_files == 0 {
            return Err(ConfigError::Validation(
                "uploads.max_files must be at least 1".into(),
            ));
        }
        if self.uploads.max_file_bytes == 0 {
            return Err(ConfigError::Validation(
                "uploads.max_file_bytes must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compression.quality) {
            return Err(ConfigError::Validation(
                "compression.quality must be 0.0-1.0".into(),
            ));
        }
        if self.compression.max_width == 0 || self.compression.max_height == 0 {
            return Err(ConfigError::Validation(
                "compression.max_width and max_height must be non-zero".into(),
            ));
        }
        if self.compression.decode_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "compression.decode_timeout_secs must be non-zero".into(),
            ));
        }
        if self.thumbnails.aspect_ratio[0] == 0 || self.thumbnails.aspect_ratio[1] == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.aspect_ratio values must be non-zero".into(),
            ));
        }
        if self.thumbnails.short_edge == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.short_edge must be non-zero".into(),
            ));
        }
        if self.local.root.trim().is_empty() {
            return Err(ConfigError::Validation("local.root must not be empty".into()));
        }
        if self.remote.bucket.trim().is_empty() {
            return Err(ConfigError::Validation(
                "remote.bucket must not be empty".into(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub skip_duplicates: bool,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_bytes: 10 * 1024 * 1024,
            skip_duplicates: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Encoder quality as a fraction (0.0 = worst, 1.0 = best).
    pub quality: f32,
    /// Fixed output format. When absent the best available encoder is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    /// RGB fill behind transparent pixels for formats without alpha.
    pub background: [u8; 3],
    pub decode_timeout_secs: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1920,
            quality: 0.8,
            format: None,
            background: [255, 255, 255],
            decode_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub enabled: bool,
    /// Aspect ratio as `[width, height]`, e.g. `[1, 1]` for square thumbnails.
    pub aspect_ratio: [u32; 2],
    /// Pixel length of the shorter thumbnail edge.
    pub short_edge: u32,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            aspect_ratio: [1, 1],
            short_edge: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    pub root: String,
    /// Byte budget shared by every draft on this machine.
    pub quota_bytes: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: ".product-images".to_string(),
            quota_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub bucket: String,
    pub public_base_url: String,
    /// Name of the environment variable holding the bearer token. The token
    /// itself never lives in the config file.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: "product-images".to_string(),
            public_base_url: String::new(),
            api_key_env: "PRODUCT_IMAGES_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Resolve into backend settings, reading the API key from the
    /// environment.
    pub fn settings(&self) -> RemoteSettings {
        self.settings_with_key(std::env::var(&self.api_key_env).ok())
    }

    fn settings_with_key(&self, api_key: Option<String>) -> RemoteSettings {
        RemoteSettings {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            public_base_url: self.public_base_url.clone(),
            api_key: api_key.filter(|key| !key.is_empty()),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ImagesConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it exists but is
/// not valid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ImagesConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ImagesConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when the file is
/// absent. Unknown keys and out-of-range values are errors.
pub fn load_config(path: &Path) -> Result<ImagesConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# product-images configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Upload batches
# ---------------------------------------------------------------------------
[uploads]
# Files accepted per batch. Extra files are reported as failed.
max_files = 5

# Largest accepted original upload, in bytes (10 MiB).
max_file_bytes = 10485760

# Reject a file whose content already exists on the product.
skip_duplicates = false

# ---------------------------------------------------------------------------
# Compression
# ---------------------------------------------------------------------------
[compression]
# Images are scaled down (never up) to fit within these bounds.
max_width = 1920
max_height = 1920

# Encoder quality from 0.0 (smallest) to 1.0 (best).
quality = 0.8

# Output format: "avif", "jpeg", "png" or "webp".
# Omit to use AVIF when available, JPEG otherwise.
# format = "avif"

# Fill colour behind transparent pixels when the format has no alpha (JPEG).
background = [255, 255, 255]

# Give up on a single file after this many seconds of decoding.
decode_timeout_secs = 30

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
enabled = true

# Aspect ratio as [width, height] for thumbnail crops.
aspect_ratio = [1, 1]

# Pixel length of the shorter thumbnail edge.
short_edge = 300

# ---------------------------------------------------------------------------
# Local storage (draft products)
# ---------------------------------------------------------------------------
[local]
root = ".product-images"

# Bytes available to all drafts on this machine (100 MiB).
quota_bytes = 104857600

# ---------------------------------------------------------------------------
# Remote storage (persisted products)
# ---------------------------------------------------------------------------
[remote]
# Object store base URL, e.g. "https://example.supabase.co/storage/v1".
endpoint = ""
bucket = "product-images"

# Base for display URLs. Empty means {endpoint}/object/public/{bucket}.
public_base_url = ""

# Environment variable holding the bearer token.
api_key_env = "PRODUCT_IMAGES_API_KEY"

timeout_secs = 30
"##
}
