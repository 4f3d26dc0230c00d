//! Server configuration module.
//!
//! Handles loading, validating, and merging `gallery.toml`. Stock defaults are
//! serialized to a TOML table and the user file is merged on top of it, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! data_root = "data"            # gallery.db, documents/, screenshots/
//!
//! [tokens]
//! initial_length = 6            # Letters in a freshly minted token
//! collision_limit = 5           # Collisions in one mint before growing
//!
//! [gallery]
//! default_limit = 10            # Page size when none is requested
//! max_limit = 50                # Largest page size served
//!
//! [mail]
//! smtp_address = "localhost:25"
//! disable_tls = false
//! hello_name = "localhost"
//! public_host = "http://localhost:8000/"
//! from_name = "WebGL Playground"
//! from_address = "noreply+webgl@jessevdk.github.io"
//! batch_size = 20
//! batch_window_secs = 5
//! queue_capacity = 4096
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::mail::EmailAddress;
use crate::mail::dispatcher::BatchPolicy;
use crate::mail::smtp::DEFAULT_SMTP_PORT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "gallery.toml";

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

/// Server configuration loaded from `gallery.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryConfig {
    /// Directory holding the database and both blob stores.
    pub data_root: PathBuf,
    pub tokens: TokensConfig,
    pub gallery: GalleryLimits,
    pub mail: MailConfig,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            tokens: TokensConfig::default(),
            gallery: GalleryLimits::default(),
            mail: MailConfig::default(),
        }
    }
}

impl GalleryConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tokens.initial_length", self.tokens.initial_length),
            ("tokens.collision_limit", self.tokens.collision_limit),
            ("gallery.default_limit", self.gallery.default_limit as usize),
            ("gallery.max_limit", self.gallery.max_limit as usize),
            ("mail.batch_size", self.mail.batch_size),
            ("mail.batch_window_secs", self.mail.batch_window_secs as usize),
            ("mail.queue_capacity", self.mail.queue_capacity),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{key} must be non-zero")));
            }
        }
        if self.gallery.default_limit > self.gallery.max_limit {
            return Err(ConfigError::Validation(
                "gallery.default_limit must not exceed gallery.max_limit".into(),
            ));
        }
        if !self.mail.from_address.contains('@') {
            return Err(ConfigError::Validation(
                "mail.from_address must be an e-mail address".into(),
            ));
        }
        if self.mail.smtp_address.is_empty() {
            return Err(ConfigError::Validation(
                "mail.smtp_address must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_root.join("gallery.db")
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_root.join("documents")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.data_root.join("screenshots")
    }
}

/// Publish token minting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokensConfig {
    /// Starting token length. Grows at runtime, never shrinks.
    pub initial_length: usize,
    /// Consecutive collisions within one mint before the length grows.
    pub collision_limit: usize,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            initial_length: crate::token::DEFAULT_TOKEN_LENGTH,
            collision_limit: crate::token::DEFAULT_COLLISION_LIMIT,
        }
    }
}

/// Gallery listing page sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for GalleryLimits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
        }
    }
}

/// Outbound mail settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailConfig {
    /// `host` or `host:port` of the SMTP relay.
    pub smtp_address: String,
    /// Skip the STARTTLS upgrade even when the server offers it.
    pub disable_tls: bool,
    /// Name announced in `EHLO`.
    pub hello_name: String,
    /// Public URL of the playground, quoted in token e-mails.
    pub public_host: String,
    pub from_name: String,
    pub from_address: String,
    pub batch_size: usize,
    pub batch_window_secs: u64,
    pub queue_capacity: usize,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_address: "localhost:25".into(),
            disable_tls: false,
            hello_name: "localhost".into(),
            public_host: "http://localhost:8000/".into(),
            from_name: "WebGL Playground".into(),
            from_address: "noreply+webgl@jessevdk.github.io".into(),
            batch_size: crate::mail::dispatcher::DEFAULT_BATCH_SIZE,
            batch_window_secs: crate::mail::dispatcher::DEFAULT_BATCH_WINDOW.as_secs(),
            queue_capacity: crate::mail::dispatcher::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MailConfig {
    /// The SMTP address with the default port appended when none is given.
    pub fn normalized_smtp_address(&self) -> String {
        if self.smtp_address.contains(':') {
            self.smtp_address.clone()
        } else {
            format!("{}:{}", self.smtp_address, DEFAULT_SMTP_PORT)
        }
    }

    pub fn sender(&self) -> EmailAddress {
        EmailAddress {
            name: self.from_name.clone(),
            address: self.from_address.clone(),
        }
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            size: self.batch_size,
            window: Duration::from_secs(self.batch_window_secs),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(GalleryConfig::default())?)
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

/// Read a config file as a raw TOML value, or `None` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto `base`, deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<GalleryConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: GalleryConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config at `path`, falling back to stock defaults when absent.
pub fn load_config(path: &Path) -> Result<GalleryConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// A fully commented `gallery.toml` with every default spelled out.
pub fn stock_config_toml() -> &'static str {
    r##"# Playground Gallery Configuration
# ================================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Directory holding gallery.db and the documents/ and screenshots/ stores.
data_root = "data"

# ---------------------------------------------------------------------------
# Publish tokens
# ---------------------------------------------------------------------------
[tokens]
# Letters in a freshly minted token.
initial_length = 6

# Collisions within a single mint before new tokens get one letter longer.
collision_limit = 5

# ---------------------------------------------------------------------------
# Gallery listing
# ---------------------------------------------------------------------------
[gallery]
# Page size when the request does not name one.
default_limit = 10

# Requests for larger pages are clamped to this.
max_limit = 50

# ---------------------------------------------------------------------------
# Outbound mail
# ---------------------------------------------------------------------------
[mail]
# SMTP relay as host or host:port (port 25 when omitted).
smtp_address = "localhost:25"

# Set to true to never upgrade the connection with STARTTLS.
disable_tls = false

# Name announced in EHLO.
hello_name = "localhost"

# Public URL of the playground, linked from token e-mails.
public_host = "http://localhost:8000/"

# Sender shown on token e-mails.
from_name = "WebGL Playground"
from_address = "noreply+webgl@jessevdk.github.io"

# E-mails are sent in batches of at most batch_size, or whatever has
# arrived within batch_window_secs of the first one.
batch_size = 20
batch_window_secs = 5

# Pending e-mails held before token requests start to wait.
queue_capacity = 4096
"##
}
