//! Error and warning taxonomy for merge jobs
//!
//! Every failure a caller can see maps to one [`ErrorKind`] with a stable code,
//! HTTP status and process exit code, so "fix your archive", "fix your file
//! order" and "unsupported file type" can be told apart without parsing text.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

// ============================================================
// Fatal errors
// ============================================================

/// Errors that abort a merge job
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Unsupported archive format: {detail}")]
    UnsupportedArchiveFormat { detail: String },

    #[error("Corrupt {format} archive: {detail}")]
    CorruptArchive { format: String, detail: String },

    #[error(
        "Archive mixes document types ({} PDF, {} DOCX); split it into one archive per type",
        .pdf.len(),
        .docx.len()
    )]
    MixedTypeBatch { pdf: Vec<String>, docx: Vec<String> },

    #[error("No supported members: {unsupported} of {total} members are neither PDF nor DOCX")]
    NoSupportedMembers { total: usize, unsupported: usize },

    #[error("Member '{member}' cannot be read: {reason}")]
    UnreadableMember { member: String, reason: String },

    #[error("{what} exceeds the configured limit ({actual} > {limit})")]
    ResourceLimit {
        member: Option<String>,
        what: String,
        actual: u64,
        limit: u64,
    },

    #[error("Merge job was cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    /// Build an `UnreadableMember` error from any displayable cause
    pub fn unreadable(member: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::UnreadableMember {
            member: member.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedArchiveFormat { .. } => ErrorKind::UnsupportedArchiveFormat,
            Self::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Self::MixedTypeBatch { .. } => ErrorKind::MixedTypeBatch,
            Self::NoSupportedMembers { .. } => ErrorKind::NoSupportedMembers,
            Self::UnreadableMember { .. } => ErrorKind::UnreadableMember,
            Self::ResourceLimit { .. } => ErrorKind::ResourceLimit,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Name of the member file this error blames, if any
    pub fn member(&self) -> Option<&str> {
        match self {
            Self::UnreadableMember { member, .. } => Some(member),
            Self::ResourceLimit { member, .. } => member.as_deref(),
            _ => None,
        }
    }
}

/// Stable error classification shared by the CLI and the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnsupportedArchiveFormat,
    CorruptArchive,
    MixedTypeBatch,
    NoSupportedMembers,
    UnreadableMember,
    ResourceLimit,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Machine-readable error code
    pub fn code(self) -> &'static str {
        match self {
            Self::UnsupportedArchiveFormat => "UNSUPPORTED_ARCHIVE_FORMAT",
            Self::CorruptArchive => "CORRUPT_ARCHIVE",
            Self::MixedTypeBatch => "MIXED_TYPE_BATCH",
            Self::NoSupportedMembers => "NO_SUPPORTED_MEMBERS",
            Self::UnreadableMember => "UNREADABLE_MEMBER",
            Self::ResourceLimit => "RESOURCE_LIMIT",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status used by the web layer
    pub fn http_status(self) -> u16 {
        match self {
            Self::UnsupportedArchiveFormat => 415,
            Self::CorruptArchive
            | Self::MixedTypeBatch
            | Self::NoSupportedMembers
            | Self::UnreadableMember => 422,
            Self::ResourceLimit => 413,
            Self::Cancelled => 408,
            Self::Internal => 500,
        }
    }

    /// Process exit code used by the CLI
    pub fn exit_code(self) -> u8 {
        match self {
            Self::UnsupportedArchiveFormat => 10,
            Self::CorruptArchive => 11,
            Self::MixedTypeBatch => 12,
            Self::NoSupportedMembers => 13,
            Self::UnreadableMember => 14,
            Self::ResourceLimit => 15,
            Self::Cancelled => 16,
            Self::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================
// Non-fatal warnings
// ============================================================

/// Anomaly recorded during a job that does not cause rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Several members share the same group label and part number
    DuplicateSequenceKey { key: String, members: Vec<String> },
    /// Member name carries no sequence number; appended after ordered members
    UnorderedMember { member: String },
    /// Two archive entries share a basename; the later one was renamed
    DuplicateMemberName { original: String, renamed: String },
    /// Member is neither PDF nor DOCX and was left out of the merge
    UnsupportedMemberDropped { member: String },
    /// Member parsed but contributes no pages
    EmptyMember { member: String },
    /// Note or comment anchors in an appended DOCX member had no entry to point at
    AnnotationsDropped { member: String, count: usize },
}

impl Warning {
    /// Machine-readable warning code
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateSequenceKey { .. } => "DUPLICATE_SEQUENCE_KEY",
            Self::UnorderedMember { .. } => "UNORDERED_MEMBER",
            Self::DuplicateMemberName { .. } => "DUPLICATE_MEMBER_NAME",
            Self::UnsupportedMemberDropped { .. } => "UNSUPPORTED_MEMBER_DROPPED",
            Self::EmptyMember { .. } => "EMPTY_MEMBER",
            Self::AnnotationsDropped { .. } => "ANNOTATIONS_DROPPED",
        }
    }

    /// Serializable form with code and rendered message
    pub fn to_report(&self) -> WarningReport {
        WarningReport {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSequenceKey { key, members } => write!(
                f,
                "{} members share sequence key '{}': {}; kept in archive order",
                members.len(),
                key,
                members.join(", ")
            ),
            Self::UnorderedMember { member } => write!(
                f,
                "'{member}' has no sequence number; appended after the ordered members"
            ),
            Self::DuplicateMemberName { original, renamed } => {
                write!(f, "duplicate member name '{original}' renamed to '{renamed}'")
            }
            Self::UnsupportedMemberDropped { member } => {
                write!(f, "'{member}' is not a PDF or DOCX document and was skipped")
            }
            Self::EmptyMember { member } => write!(f, "'{member}' contains no pages"),
            Self::AnnotationsDropped { member, count } => write!(
                f,
                "'{member}': {count} note or comment references point at missing entries and were removed"
            ),
        }
    }
}

/// Warning as exposed in JSON reports and HTTP responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarningReport {
    pub code: &'static str,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, MergeError>;
