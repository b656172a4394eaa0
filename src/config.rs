//! Configuration for merge jobs and the HTTP server
//!
//! Values resolve as built-in defaults, then the TOML config file, then
//! `DOCMERGE_*` environment variables. CLI flags are applied last by the binary.

use crate::merge::SectionBreak;
use crate::sequence::DEFAULT_LABELS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================
// Constants
// ============================================================

/// Output filename used when the caller supplies none
pub const DEFAULT_OUTPUT_NAME: &str = "merged_document";

/// Default upper bound for an uploaded archive (512 MiB)
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

/// Default upper bound for one decompressed member (100 MiB)
pub const DEFAULT_MAX_MEMBER_BYTES: u64 = 100 * 1024 * 1024;

/// Default upper bound for members in one archive
pub const DEFAULT_MAX_MEMBERS: usize = 2_000;

/// Scratch directories older than this are swept (1 hour)
pub const DEFAULT_STALE_SCRATCH_SECS: u64 = 3_600;

pub const ENV_BIND: &str = "DOCMERGE_BIND";
pub const ENV_SCRATCH_DIR: &str = "DOCMERGE_SCRATCH_DIR";
pub const ENV_MAX_ARCHIVE_BYTES: &str = "DOCMERGE_MAX_ARCHIVE_BYTES";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================
// Config sections
// ============================================================

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Output filename stem when the request names none
    pub default_output_name: String,
    /// Labels recognized by the filename sequence parser
    pub sequence_labels: Vec<String>,
    /// Section break used for DOCX merges unless the request overrides it
    pub section_break: SectionBreak,
    /// Worker threads for extraction and parsing (0 = one per CPU)
    pub threads: usize,
    pub limits: LimitsConfig,
    pub scratch: ScratchConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_output_name: DEFAULT_OUTPUT_NAME.to_string(),
            sequence_labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
            section_break: SectionBreak::NextPage,
            threads: 0,
            limits: LimitsConfig::default(),
            scratch: ScratchConfig::default(),
            tools: ToolsConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Size and count limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_archive_bytes: u64,
    pub max_member_bytes: u64,
    pub max_members: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_member_bytes: DEFAULT_MAX_MEMBER_BYTES,
            max_members: DEFAULT_MAX_MEMBERS,
        }
    }
}

/// Scratch directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Root under which per-job scratch directories are created
    pub root: PathBuf,
    /// Age after which leftover scratch directories are swept
    pub stale_after_secs: u64,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            stale_after_secs: DEFAULT_STALE_SCRATCH_SECS,
        }
    }
}

/// External extraction tools, tried in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub rar: Vec<String>,
    pub generic: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rar: ["unrar", "unar", "7z", "bsdtar"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            generic: ["bsdtar", "7z", "unar"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Maximum request body in bytes
    pub upload_limit: usize,
    pub request_timeout_secs: u64,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            upload_limit: DEFAULT_MAX_ARCHIVE_BYTES as usize,
            request_timeout_secs: 300,
            cors_origins: vec!["*".to_string()],
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl MergeConfig {
    /// Default config file location (`<config dir>/docmerge/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("docmerge").join("config.toml"))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file, or the default location if it exists,
    /// then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|p| p.is_file()),
        };

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), "Loaded config file");
                toml::from_str(&text)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCMERGE_*` overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(dir) = lookup(ENV_SCRATCH_DIR) {
            self.scratch.root = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_MAX_ARCHIVE_BYTES) {
            let bytes: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_MAX_ARCHIVE_BYTES, format!("'{raw}' is not a byte count")))?;
            self.limits.max_archive_bytes = bytes;
            self.server.upload_limit = usize::try_from(bytes).unwrap_or(usize::MAX);
        }
        Ok(())
    }

    /// Reject values no job could run with
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_archive_bytes == 0 {
            return Err(ConfigError::invalid("limits.max_archive_bytes", "must be positive"));
        }
        if self.limits.max_member_bytes == 0 {
            return Err(ConfigError::invalid("limits.max_member_bytes", "must be positive"));
        }
        if self.limits.max_members == 0 {
            return Err(ConfigError::invalid("limits.max_members", "must be positive"));
        }
        if self.default_output_name.trim().is_empty() {
            return Err(ConfigError::invalid("default_output_name", "must not be empty"));
        }
        for label in &self.sequence_labels {
            if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric()) {
                return Err(ConfigError::invalid(
                    "sequence_labels",
                    format!("'{label}' must be a non-empty alphanumeric word"),
                ));
            }
        }
        Ok(())
    }

    /// Effective worker thread count
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}
