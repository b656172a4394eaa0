//! Archive extraction
//!
//! Turns uploaded archive bytes into a flat, ordered list of [`ArchiveMember`]s.
//! Each supported format is an [`ExtractStrategy`]; the [`ArchiveExtractor`]
//! picks one by magic bytes (falling back to the filename hint), then filters
//! junk entries and disambiguates duplicate basenames.

mod external;
mod sevenz;
mod tar;
mod zip;

pub use self::external::ExternalToolStrategy;
pub use self::sevenz::SevenZipStrategy;
pub use self::tar::TarStrategy;
pub use self::zip::ZipStrategy;

use crate::config::MergeConfig;
use crate::error::{MergeError, Warning};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Component, Path};
use thiserror::Error;
use tracing::{debug, info};

// ============================================================
// Types
// ============================================================

/// Document type implied by a member's file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    Pdf,
    Docx,
    Unknown,
}

impl DeclaredType {
    pub fn from_name(name: &str) -> Self {
        match extension_of(name).as_deref() {
            Some("pdf") => Self::Pdf,
            Some("docx") => Self::Docx,
            _ => Self::Unknown,
        }
    }
}

/// One file extracted from an archive
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    name: String,
    original_name: String,
    source_path: String,
    bytes: Vec<u8>,
    declared_type: DeclaredType,
    archive_index: usize,
}

impl ArchiveMember {
    /// Create a member whose unique name equals its basename
    pub fn new(source_path: impl Into<String>, bytes: Vec<u8>, archive_index: usize) -> Self {
        let source_path = source_path.into();
        let original_name = basename(&source_path).to_string();
        Self::with_name(original_name.clone(), original_name, source_path, bytes, archive_index)
    }

    fn with_name(
        name: String,
        original_name: String,
        source_path: String,
        bytes: Vec<u8>,
        archive_index: usize,
    ) -> Self {
        let declared_type = DeclaredType::from_name(&original_name);
        Self {
            name,
            original_name,
            source_path,
            bytes,
            declared_type,
            archive_index,
        }
    }

    /// Job-unique name (disambiguated when basenames collide)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Basename as stored in the archive
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// Sanitized path inside the archive
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.declared_type
    }

    /// 0-based position in the archive listing
    pub fn archive_index(&self) -> usize {
        self.archive_index
    }

    /// Lowercased extension of the original basename
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.original_name)
    }
}

/// Raw file entry produced by a strategy, before filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

impl RawEntry {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            bytes,
        }
    }
}

/// Limits enforced while decompressing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_member_bytes: u64,
    pub max_members: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_member_bytes: crate::config::DEFAULT_MAX_MEMBER_BYTES,
            max_members: crate::config::DEFAULT_MAX_MEMBERS,
        }
    }
}

/// Per-job inputs shared by all strategies
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    /// Job scratch directory, removed when the job ends
    pub scratch: &'a Path,
    pub limits: ExtractLimits,
}

/// Result of a successful extraction
#[derive(Debug)]
pub struct Extraction {
    /// Strategy that decoded the archive
    pub format: &'static str,
    pub members: Vec<ArchiveMember>,
    pub warnings: Vec<Warning>,
}

// ============================================================
// Errors
// ============================================================

/// Extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unrecognized archive signature (name hint: {})", .hint.as_deref().unwrap_or("none"))]
    Unrecognized { hint: Option<String> },

    #[error("{format} archives need one of these tools on PATH: {}", .tried.join(", "))]
    ToolUnavailable {
        format: &'static str,
        tried: Vec<String>,
    },

    #[error("payload is a single {0} document, not an archive")]
    NotAnArchive(&'static str),

    #[error("corrupt {format} archive: {detail}")]
    Corrupt { format: &'static str, detail: String },

    #[error("entry '{name}' is larger than {limit} bytes")]
    MemberTooLarge { name: String, limit: u64 },

    #[error("archive holds more than {limit} members")]
    TooManyMembers { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn corrupt(format: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            format,
            detail: detail.to_string(),
        }
    }
}

impl From<ExtractError> for MergeError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Unrecognized { .. }
            | ExtractError::ToolUnavailable { .. }
            | ExtractError::NotAnArchive(_) => MergeError::UnsupportedArchiveFormat {
                detail: err.to_string(),
            },
            ExtractError::Corrupt { format, detail } => MergeError::CorruptArchive {
                format: format.to_string(),
                detail,
            },
            ExtractError::MemberTooLarge { name, limit } => MergeError::ResourceLimit {
                what: format!("member '{name}'"),
                member: Some(name),
                actual: limit.saturating_add(1),
                limit,
            },
            ExtractError::TooManyMembers { limit } => MergeError::ResourceLimit {
                member: None,
                what: "archive member count".to_string(),
                actual: limit as u64 + 1,
                limit: limit as u64,
            },
            ExtractError::Io(e) => MergeError::Io(e),
        }
    }
}

// ============================================================
// Strategy trait
// ============================================================

/// One archive format
pub trait ExtractStrategy: Send + Sync {
    /// Short format name used in logs and errors
    fn format(&self) -> &'static str;

    /// Whether the payload starts with this format's magic bytes
    fn matches_signature(&self, bytes: &[u8]) -> bool;

    /// Whether a lowercased filename extension implies this format
    fn handles_extension(&self, ext: &str) -> bool;

    /// Decode all file entries in archive listing order
    fn extract(&self, bytes: &[u8], ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError>;
}

// ============================================================
// Extractor
// ============================================================

/// Runs the strategy chain and post-processes entries
pub struct ArchiveExtractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl ArchiveExtractor {
    /// Default chain: zip, rar, 7z, tar, generic
    pub fn new(config: &MergeConfig) -> Self {
        Self::with_strategies(vec![
            Box::new(ZipStrategy),
            Box::new(ExternalToolStrategy::rar(config.tools.rar.clone())),
            Box::new(SevenZipStrategy),
            Box::new(TarStrategy),
            Box::new(ExternalToolStrategy::generic(config.tools.generic.clone())),
        ])
    }

    /// Custom chain, tried in the given order
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn formats(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.format()).collect()
    }

    fn select(&self, bytes: &[u8], hint: Option<&str>) -> Option<&dyn ExtractStrategy> {
        if let Some(strategy) = self.strategies.iter().find(|s| s.matches_signature(bytes)) {
            return Some(strategy.as_ref());
        }
        let hint = hint.and_then(hint_extensions)?;
        self.strategies
            .iter()
            .find(|s| hint.iter().any(|ext| s.handles_extension(ext)))
            .map(|s| s.as_ref())
    }

    /// Extract an archive into filtered, uniquely named members
    pub fn extract(
        &self,
        bytes: &[u8],
        hint: Option<&str>,
        ctx: &ExtractContext<'_>,
    ) -> Result<Extraction, ExtractError> {
        let strategy = self.select(bytes, hint).ok_or_else(|| ExtractError::Unrecognized {
            hint: hint.map(str::to_owned),
        })?;

        info!(format = strategy.format(), bytes = bytes.len(), "Extracting archive");
        let entries = strategy.extract(bytes, ctx)?;
        if entries.len() > ctx.limits.max_members {
            return Err(ExtractError::TooManyMembers {
                limit: ctx.limits.max_members,
            });
        }

        let mut members = Vec::with_capacity(entries.len());
        let mut warnings = Vec::new();
        let mut taken = HashSet::new();

        for entry in entries {
            if is_ignored_entry(&entry.path) {
                debug!(path = %entry.path, "Skipping ignored entry");
                continue;
            }
            let original = basename(&entry.path).to_string();
            let name = unique_name(&original, &mut taken);
            if name != original {
                warnings.push(Warning::DuplicateMemberName {
                    original: original.clone(),
                    renamed: name.clone(),
                });
            }
            debug!(member = %name, bytes = entry.bytes.len(), "Extracted member");
            let index = members.len();
            members.push(ArchiveMember::with_name(name, original, entry.path, entry.bytes, index));
        }

        info!(format = strategy.format(), members = members.len(), "Archive extracted");
        Ok(Extraction {
            format: strategy.format(),
            members,
            warnings,
        })
    }
}

// ============================================================
// Helpers
// ============================================================

/// Lowercased extension candidates of a filename hint, compound first
fn hint_extensions(hint: &str) -> Option<Vec<String>> {
    let name = basename(hint).to_lowercase();
    let mut parts: Vec<&str> = name.split('.').skip(1).collect();
    if parts.is_empty() {
        // bare extension such as "zip" or ".zip"
        let bare = name.trim_start_matches('.');
        return (!bare.is_empty()).then(|| vec![bare.to_string()]);
    }
    let mut candidates = Vec::new();
    if parts.len() >= 2 {
        let n = parts.len();
        candidates.push(format!("{}.{}", parts[n - 2], parts[n - 1]));
    }
    if let Some(last) = parts.pop() {
        candidates.push(last.to_string());
    }
    Some(candidates)
}

pub(crate) fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

pub(crate) fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Keep only normal path components; `None` when nothing remains
pub(crate) fn sanitize_entry_path(raw: &str) -> Option<String> {
    let normalized = raw.replace('\\', "/");
    let parts: Vec<String> = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Metadata and junk entries that never reach classification
fn is_ignored_entry(path: &str) -> bool {
    if path.split('/').any(|part| part == "__MACOSX") {
        return true;
    }
    let name = basename(path);
    name.starts_with('.')
        || name.starts_with("~$")
        || name.eq_ignore_ascii_case("Thumbs.db")
        || name.eq_ignore_ascii_case("desktop.ini")
}

/// `stem (2).ext`, `stem (3).ext`, ... for repeated basenames
fn unique_name(original: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(original.to_string()) {
        return original.to_string();
    }
    let (stem, ext) = match original.rfind('.') {
        Some(dot) if dot > 0 => original.split_at(dot),
        _ => (original, ""),
    };
    let mut n = 2usize;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Read at most `limit` bytes; one byte more means the entry is too large
pub(crate) fn read_limited<R: Read>(
    reader: R,
    format: &'static str,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, ExtractError> {
    let mut buf = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| ExtractError::corrupt(format, format!("{name}: {e}")))?;
    if buf.len() as u64 > limit {
        return Err(ExtractError::MemberTooLarge {
            name: name.to_string(),
            limit,
        });
    }
    Ok(buf)
}
