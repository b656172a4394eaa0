//! Merge pipeline
//!
//! Runs one job through every stage: archive extraction, type classification,
//! sequence parsing, ordering, format merging and output packaging. The
//! pipeline is synchronous and owns all member buffers of the job; callers
//! observe progress and request cancellation through [`ProgressCallback`].

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveExtractor, ExtractContext, ExtractLimits};
use crate::classify::{DocumentKind, TypeClassifier};
use crate::config::{ConfigError, MergeConfig};
use crate::error::{MergeError, Warning};
use crate::merge::{Merger, SectionBreak};
use crate::ordering::{OrderedMember, OrderingResolver};
use crate::package::{MergeResult, OutputPackager};
use crate::scratch::ScratchSpace;
use crate::sequence::SequenceParser;

// ============================================================
// Progress reporting
// ============================================================

/// Progress and cancellation hooks polled between stages
pub trait ProgressCallback: Sync {
    /// Called when a stage starts
    fn on_step_start(&self, _step: &str) {}

    /// Called with a position inside the current stage
    fn on_step_progress(&self, _current: usize, _total: usize) {}

    /// Called when a stage completes
    fn on_step_complete(&self, _step: &str, _message: &str) {}

    /// Diagnostic detail
    fn on_debug(&self, _message: &str) {}

    /// A cancelled job stops at the next stage boundary
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {}

fn check_cancelled<P: ProgressCallback>(progress: &P) -> Result<(), MergeError> {
    if progress.is_cancelled() {
        info!("Merge job cancelled");
        return Err(MergeError::Cancelled);
    }
    Ok(())
}

// ============================================================
// Request / plan / job
// ============================================================

/// Inputs of one merge job
#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    pub archive: Vec<u8>,
    /// Upload filename or bare extension used as a format hint
    pub archive_name: Option<String>,
    pub output_name: Option<String>,
    pub declared_type: Option<DocumentKind>,
    /// Overrides the configured DOCX section break
    pub section_break: Option<SectionBreak>,
}

impl MergeRequest {
    pub fn new(archive: Vec<u8>) -> Self {
        Self {
            archive,
            ..Self::default()
        }
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = Some(name.into());
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn declared_type(mut self, kind: DocumentKind) -> Self {
        self.declared_type = Some(kind);
        self
    }

    pub fn section_break(mut self, section_break: SectionBreak) -> Self {
        self.section_break = Some(section_break);
        self
    }
}

/// Extracted, classified and ordered members, ready to merge
#[derive(Debug)]
pub struct MergePlan {
    /// Strategy that decoded the archive
    pub archive_format: &'static str,
    pub kind: DocumentKind,
    pub members: Vec<OrderedMember>,
    pub warnings: Vec<Warning>,
}

/// One row of a resolved order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub position: usize,
    pub name: String,
    pub source_path: String,
    pub group_label: Option<String>,
    pub part_number: Option<u64>,
    pub bytes: usize,
}

impl MergePlan {
    pub fn entries(&self) -> Vec<PlanEntry> {
        self.members
            .iter()
            .map(|m| PlanEntry {
                position: m.position(),
                name: m.name().to_string(),
                source_path: m.member().source_path().to_string(),
                group_label: m.key().group_label.clone(),
                part_number: m.key().part_number,
                bytes: m.bytes().len(),
            })
            .collect()
    }
}

/// Ordered members bound to a target kind; consumed by the merge stage
#[derive(Debug)]
pub struct MergeJob {
    pub members: Vec<OrderedMember>,
    pub target: DocumentKind,
    pub output_name: String,
}

// ============================================================
// Pipeline
// ============================================================

/// Archive-to-document merge pipeline
pub struct MergePipeline {
    config: MergeConfig,
    parser: SequenceParser,
    extractor: ArchiveExtractor,
    pool: Option<rayon::ThreadPool>,
}

impl MergePipeline {
    pub fn new(config: MergeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let parser = SequenceParser::new(config.sequence_labels.as_slice())
            .map_err(|e| ConfigError::invalid("sequence_labels", e.to_string()))?;

        let threads = config.effective_threads();
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("docmerge-worker-{i}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "Falling back to the global rayon pool");
                None
            }
        };
        let extractor = ArchiveExtractor::new(&config);
        debug!(threads, formats = ?extractor.formats(), "Pipeline ready");

        Ok(Self {
            config,
            parser,
            extractor,
            pool,
        })
    }

    /// Replace the archive strategies
    pub fn with_extractor(mut self, extractor: ArchiveExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Extract, classify and order without merging
    pub fn plan<P: ProgressCallback>(&self, request: &MergeRequest, progress: &P) -> Result<MergePlan, MergeError> {
        let limits = &self.config.limits;
        let size = request.archive.len() as u64;
        if size > limits.max_archive_bytes {
            return Err(MergeError::ResourceLimit {
                member: None,
                what: "archive size".to_string(),
                actual: size,
                limit: limits.max_archive_bytes,
            });
        }
        check_cancelled(progress)?;

        // Step 1: Extraction
        progress.on_step_start("Extracting archive");
        let extraction = {
            let scratch = ScratchSpace::create(&self.config.scratch.root)
                .map_err(|e| MergeError::Internal(format!("failed to create scratch directory: {e}")))?;
            let ctx = ExtractContext {
                scratch: scratch.path(),
                limits: ExtractLimits {
                    max_member_bytes: limits.max_member_bytes,
                    max_members: limits.max_members,
                },
            };
            self.install(|| {
                self.extractor
                    .extract(&request.archive, request.archive_name.as_deref(), &ctx)
            })?
        };
        progress.on_step_complete(
            "Extract",
            &format!("{} members ({})", extraction.members.len(), extraction.format),
        );
        check_cancelled(progress)?;

        // Step 2: Classification
        progress.on_step_start("Classifying members");
        let archive_format = extraction.format;
        let mut warnings = extraction.warnings;
        let batch = TypeClassifier::classify_batch(extraction.members, request.declared_type)?;
        warnings.extend(batch.warnings);
        progress.on_step_complete("Classify", &format!("{} {} members", batch.members.len(), batch.kind));
        check_cancelled(progress)?;

        // Step 3: Sequence parsing and ordering
        progress.on_step_start("Ordering members");
        let total = batch.members.len();
        let keyed = batch
            .members
            .into_iter()
            .enumerate()
            .map(|(i, member)| {
                let (key, rule) = self.parser.parse_with_rule(member.original_name());
                progress.on_step_progress(i + 1, total);
                progress.on_debug(&format!("{}: {} ({:?})", member.name(), key, rule));
                (member, key)
            })
            .collect();
        let resolution = OrderingResolver::resolve(keyed);
        warnings.extend(resolution.warnings);
        progress.on_step_complete("Order", &format!("{} members", resolution.ordered.len()));

        info!(
            format = archive_format,
            kind = %batch.kind,
            members = resolution.ordered.len(),
            warnings = warnings.len(),
            "Planned merge"
        );
        Ok(MergePlan {
            archive_format,
            kind: batch.kind,
            members: resolution.ordered,
            warnings,
        })
    }

    /// Run the full pipeline
    pub fn run<P: ProgressCallback>(&self, request: MergeRequest, progress: &P) -> Result<MergeResult, MergeError> {
        let start_time = Instant::now();
        let section_break = request.section_break.unwrap_or(self.config.section_break);

        let plan = self.plan(&request, progress)?;
        let output_name = OutputPackager::output_file_name(
            request.output_name.as_deref(),
            &self.config.default_output_name,
            plan.kind,
        );
        drop(request);

        let job = MergeJob {
            members: plan.members,
            target: plan.kind,
            output_name,
        };
        let result = self.execute(job, section_break, plan.warnings, progress)?;

        info!(
            file = %result.file_name,
            members = result.member_count,
            bytes = result.byte_size(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Merge job finished"
        );
        Ok(result)
    }

    /// Merge and package an ordered job
    pub fn execute<P: ProgressCallback>(
        &self,
        job: MergeJob,
        section_break: SectionBreak,
        mut warnings: Vec<Warning>,
        progress: &P,
    ) -> Result<MergeResult, MergeError> {
        check_cancelled(progress)?;
        let MergeJob {
            members,
            target,
            output_name,
        } = job;

        // Step 4: Merge
        progress.on_step_start(&format!("Merging {} {} members", members.len(), target));
        let merger = Merger::for_kind(target, section_break).with_part_limit(self.config.limits.max_member_bytes);
        let outcome = self.install(|| merger.merge(&members))?;
        warnings.extend(outcome.warnings);
        progress.on_step_complete("Merge", &format!("{} members", members.len()));
        check_cancelled(progress)?;

        // Step 5: Packaging
        progress.on_step_start("Packaging output");
        let names: Vec<String> = members.iter().map(|m| m.name().to_string()).collect();
        drop(members);
        let result = OutputPackager::package(outcome.document, output_name, names, warnings)?;
        progress.on_step_complete("Package", &format!("{} bytes", result.byte_size()));
        Ok(result)
    }
}
