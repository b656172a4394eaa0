//! Member type classification and batch policy

use crate::archive::{ArchiveMember, DeclaredType};
use crate::error::{MergeError, Warning};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use tracing::{debug, warn};

/// Extensions that say nothing about the content
const GENERIC_EXTENSIONS: &[&str] = &["bin", "dat", "tmp", "file", "download"];

/// `%PDF-` must appear within this many leading bytes
const PDF_SNIFF_WINDOW: usize = 1024;

// ============================================================
// Types
// ============================================================

/// Mergeable document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            other => Err(format!("unsupported document type '{other}' (expected pdf or docx)")),
        }
    }
}

/// Classification of a single member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberClass {
    Supported(DocumentKind),
    Unsupported,
}

/// Members that survived the batch policy
#[derive(Debug)]
pub struct ClassifiedBatch {
    pub kind: DocumentKind,
    pub members: Vec<ArchiveMember>,
    pub warnings: Vec<Warning>,
}

// ============================================================
// Classifier
// ============================================================

pub struct TypeClassifier;

impl TypeClassifier {
    /// Extension first; generic or missing extensions fall back to sniffing
    pub fn classify(member: &ArchiveMember) -> MemberClass {
        match member.declared_type() {
            DeclaredType::Pdf => MemberClass::Supported(DocumentKind::Pdf),
            DeclaredType::Docx => MemberClass::Supported(DocumentKind::Docx),
            DeclaredType::Unknown => match member.extension() {
                None => Self::sniff(member.bytes()),
                Some(ext) if GENERIC_EXTENSIONS.contains(&ext.as_str()) => Self::sniff(member.bytes()),
                Some(_) => MemberClass::Unsupported,
            },
        }
    }

    /// Content sniffing for members without a telling extension
    pub fn sniff(bytes: &[u8]) -> MemberClass {
        let window = &bytes[..bytes.len().min(PDF_SNIFF_WINDOW)];
        if window.windows(5).any(|w| w == b"%PDF-") {
            return MemberClass::Supported(DocumentKind::Pdf);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            if let Ok(archive) = zip::ZipArchive::new(Cursor::new(bytes)) {
                if archive.file_names().any(|n| n == "word/document.xml") {
                    return MemberClass::Supported(DocumentKind::Docx);
                }
            }
        }
        MemberClass::Unsupported
    }

    /// Apply the batch policy: mixed types first, then the unsupported majority rule
    pub fn classify_batch(
        members: Vec<ArchiveMember>,
        declared: Option<DocumentKind>,
    ) -> Result<ClassifiedBatch, MergeError> {
        let classes: Vec<MemberClass> = members.iter().map(Self::classify).collect();

        let names_of = |kind: DocumentKind| -> Vec<String> {
            members
                .iter()
                .zip(&classes)
                .filter(|(_, c)| **c == MemberClass::Supported(kind))
                .map(|(m, _)| m.name().to_string())
                .collect()
        };
        let pdf = names_of(DocumentKind::Pdf);
        let docx = names_of(DocumentKind::Docx);

        let conflicts_with_hint = match declared {
            Some(DocumentKind::Pdf) => !docx.is_empty(),
            Some(DocumentKind::Docx) => !pdf.is_empty(),
            None => false,
        };
        if (!pdf.is_empty() && !docx.is_empty()) || conflicts_with_hint {
            return Err(MergeError::MixedTypeBatch { pdf, docx });
        }

        let total = members.len();
        let supported = pdf.len() + docx.len();
        let unsupported = total - supported;
        if supported == 0 || unsupported > supported {
            return Err(MergeError::NoSupportedMembers { total, unsupported });
        }

        let kind = match declared {
            Some(kind) => kind,
            None if pdf.is_empty() => DocumentKind::Docx,
            None => DocumentKind::Pdf,
        };

        let mut warnings = Vec::new();
        let mut kept = Vec::with_capacity(supported);
        for (member, class) in members.into_iter().zip(classes) {
            match class {
                MemberClass::Supported(_) => {
                    debug!(member = %member.name(), kind = %kind, "Classified member");
                    kept.push(member);
                }
                MemberClass::Unsupported => {
                    warn!(member = %member.name(), "Dropping unsupported member");
                    warnings.push(Warning::UnsupportedMemberDropped {
                        member: member.name().to_string(),
                    });
                }
            }
        }

        Ok(ClassifiedBatch {
            kind,
            members: kept,
            warnings,
        })
    }
}
