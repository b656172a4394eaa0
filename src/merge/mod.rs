//! Format mergers
//!
//! [`Merger`] is the single merge contract with one variant per document kind:
//! page-stream concatenation for PDF and section-preserving structural merging
//! for DOCX.

pub mod docx;
pub mod pdf;

pub use docx::{DocxError, DocxPackage, SectionBreak, StructuralMerger};
pub use pdf::PageStreamMerger;

use crate::classify::DocumentKind;
use crate::error::{MergeError, Warning};
use crate::ordering::OrderedMember;
use rayon::prelude::*;

/// Merged document before serialization
#[derive(Debug)]
pub enum MergedDocument {
    Pdf(lopdf::Document),
    Docx { package: DocxPackage, section_count: usize },
    /// A lone member, written out byte for byte
    Unchanged {
        kind: DocumentKind,
        bytes: Vec<u8>,
        /// Pages for PDF, sections for DOCX
        units: usize,
    },
}

impl MergedDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::Pdf(_) => DocumentKind::Pdf,
            Self::Docx { .. } => DocumentKind::Docx,
            Self::Unchanged { kind, .. } => *kind,
        }
    }
}

/// Merge output with non-fatal findings
#[derive(Debug)]
pub struct MergeOutcome {
    pub document: MergedDocument,
    pub warnings: Vec<Warning>,
}

/// Merge strategy selected by the batch's document kind
#[derive(Debug, Clone)]
pub enum Merger {
    PageStream(PageStreamMerger),
    Structural(StructuralMerger),
}

impl Merger {
    pub fn for_kind(kind: DocumentKind, section_break: SectionBreak) -> Self {
        match kind {
            DocumentKind::Pdf => Self::PageStream(PageStreamMerger),
            DocumentKind::Docx => Self::Structural(StructuralMerger::new(section_break)),
        }
    }

    /// Cap on the inflated size of any one part inside a DOCX member
    pub fn with_part_limit(self, limit: u64) -> Self {
        match self {
            Self::Structural(merger) => Self::Structural(merger.with_part_limit(limit)),
            other => other,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            Self::PageStream(_) => DocumentKind::Pdf,
            Self::Structural(_) => DocumentKind::Docx,
        }
    }

    /// Merge members in the given order; the first unreadable member aborts
    pub fn merge(&self, members: &[OrderedMember]) -> Result<MergeOutcome, MergeError> {
        if members.is_empty() {
            return Err(MergeError::Internal("merge called without members".to_string()));
        }
        match self {
            Self::PageStream(merger) => merger.merge(members),
            Self::Structural(merger) => merger.merge(members),
        }
    }
}

/// Parse every member on the rayon pool, reporting the first failure in
/// resolved order once all parses have finished
pub(crate) fn parse_all<T, F>(members: &[OrderedMember], parse: F) -> Result<Vec<T>, MergeError>
where
    T: Send,
    F: Fn(&OrderedMember) -> Result<T, MergeError> + Send + Sync,
{
    let results: Vec<Result<T, MergeError>> = members.par_iter().map(parse).collect();
    results.into_iter().collect()
}
