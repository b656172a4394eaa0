//! docmerge - archive-aware PDF/DOCX merging
//!
//! Takes an uploaded archive of unordered, freely named PDF or DOCX documents,
//! orders them by the sequence numbers embedded in their filenames and merges
//! them into one document while keeping each member's own layout.
//!
//! # Pipeline
//!
//! ```text
//! archive bytes
//!   -> ArchiveExtractor   (zip, 7z, tar, tar.gz natively; rar and others via system tools)
//!   -> TypeClassifier     (extension, then content sniffing; batch policy)
//!   -> SequenceParser     (group label + part number from each filename)
//!   -> OrderingResolver   (deterministic order, warnings for gaps and collisions)
//!   -> Merger             (PDF page streams / DOCX sections)
//!   -> OutputPackager     (bytes, counts, warnings)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use docmerge::{MergeConfig, MergePipeline, MergeRequest, SilentProgress};
//!
//! let pipeline = MergePipeline::new(MergeConfig::default())?;
//! let archive = std::fs::read("chapters.zip")?;
//! let result = pipeline.run(MergeRequest::new(archive).archive_name("chapters.zip"), &SilentProgress)?;
//! std::fs::write(&result.file_name, &result.artifact)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod merge;
pub mod ordering;
pub mod package;
pub mod pipeline;
pub mod scratch;
pub mod sequence;

#[cfg(feature = "web")]
pub mod web;

#[cfg(test)]
pub(crate) mod test_utils;

pub use archive::{ArchiveExtractor, ArchiveMember, DeclaredType, ExtractError, ExtractStrategy, RawEntry};
pub use classify::{DocumentKind, TypeClassifier};
pub use config::{ConfigError, MergeConfig};
pub use error::{ErrorKind, MergeError, Warning, WarningReport};
pub use merge::{MergedDocument, Merger, SectionBreak};
pub use ordering::{OrderedMember, OrderingResolver};
pub use package::{MergeReport, MergeResult, OutputPackager};
pub use pipeline::{MergePipeline, MergePlan, MergeRequest, ProgressCallback, SilentProgress};
pub use scratch::{sweep_stale, ScratchSpace, SweepReport};
pub use sequence::{SequenceKey, SequenceParser, SequenceRule};
