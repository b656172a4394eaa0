//! Output packaging
//!
//! Serializes the merged document and gathers the job metadata returned to
//! callers: counts, size, media type and the warnings accumulated upstream.

use crate::classify::DocumentKind;
use crate::config::DEFAULT_OUTPUT_NAME;
use crate::error::{MergeError, Warning, WarningReport};
use crate::merge::MergedDocument;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

/// Final artifact with its metadata
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub artifact: Vec<u8>,
    pub file_name: String,
    pub kind: DocumentKind,
    pub member_count: usize,
    /// Set for PDF output
    pub page_count: Option<usize>,
    /// Set for DOCX output
    pub section_count: Option<usize>,
    pub warnings: Vec<Warning>,
    /// Member names in merged order
    pub members: Vec<String>,
}

impl MergeResult {
    pub fn media_type(&self) -> &'static str {
        self.kind.media_type()
    }

    pub fn byte_size(&self) -> usize {
        self.artifact.len()
    }

    pub fn sha256_hex(&self) -> String {
        format!("{:x}", Sha256::digest(&self.artifact))
    }

    /// JSON-friendly summary without the artifact bytes
    pub fn report(&self) -> MergeReport {
        MergeReport {
            file_name: self.file_name.clone(),
            media_type: self.media_type(),
            kind: self.kind,
            member_count: self.member_count,
            page_count: self.page_count,
            section_count: self.section_count,
            byte_size: self.byte_size(),
            sha256: self.sha256_hex(),
            members: self.members.clone(),
            warnings: self.warnings.iter().map(Warning::to_report).collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Serializable job report
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub file_name: String,
    pub media_type: &'static str,
    pub kind: DocumentKind,
    pub member_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_count: Option<usize>,
    pub byte_size: usize,
    pub sha256: String,
    pub members: Vec<String>,
    pub warnings: Vec<WarningReport>,
    pub created_at: String,
}

pub struct OutputPackager;

impl OutputPackager {
    /// Sanitized output file name with the target extension appended unless present
    pub fn output_file_name(requested: Option<&str>, default_name: &str, kind: DocumentKind) -> String {
        let sanitize = |raw: &str| {
            let name = sanitize_filename::sanitize(raw.trim());
            let stem = name.trim().trim_matches('.');
            (!stem.is_empty()).then(|| name.trim().to_string())
        };

        let mut name = requested
            .and_then(sanitize)
            .or_else(|| sanitize(default_name))
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());

        let suffix = format!(".{}", kind.extension());
        if !name.to_lowercase().ends_with(&suffix) {
            name.push_str(&suffix);
        }
        name
    }

    /// Serialize `document` and assemble the result
    pub fn package(
        document: MergedDocument,
        file_name: String,
        members: Vec<String>,
        warnings: Vec<Warning>,
    ) -> Result<MergeResult, MergeError> {
        let kind = document.kind();
        let (artifact, page_count, section_count) = match document {
            MergedDocument::Pdf(mut doc) => {
                let pages = doc.get_pages().len();
                let mut buf = Vec::new();
                doc.save_to(&mut buf)
                    .map_err(|e| MergeError::Internal(format!("failed to write PDF: {e}")))?;
                (buf, Some(pages), None)
            }
            MergedDocument::Docx { package, section_count } => {
                let buf = package
                    .to_bytes()
                    .map_err(|e| MergeError::Internal(format!("failed to write DOCX: {e}")))?;
                (buf, None, Some(section_count))
            }
            MergedDocument::Unchanged { kind, bytes, units } => match kind {
                DocumentKind::Pdf => (bytes, Some(units), None),
                DocumentKind::Docx => (bytes, None, Some(units)),
            },
        };

        info!(
            file = %file_name,
            kind = %kind,
            bytes = artifact.len(),
            members = members.len(),
            warnings = warnings.len(),
            "Packaged merged document"
        );

        Ok(MergeResult {
            artifact,
            file_name,
            kind,
            member_count: members.len(),
            page_count,
            section_count,
            warnings,
            members,
        })
    }
}
