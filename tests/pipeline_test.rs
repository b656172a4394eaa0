//! End-to-end pipeline properties through the public API

mod common;

use common::{docx, docx_document, pdf, pdf_page_labels, positions, zip_archive};
use docmerge::config::{LimitsConfig, ScratchConfig};
use docmerge::{DocumentKind, ErrorKind, MergeConfig, MergePipeline, MergeRequest, SectionBreak, SilentProgress};
use std::path::Path;

fn pipeline(scratch: &Path) -> MergePipeline {
    let config = MergeConfig {
        scratch: ScratchConfig {
            root: scratch.to_path_buf(),
            ..ScratchConfig::default()
        },
        ..MergeConfig::default()
    };
    MergePipeline::new(config).unwrap()
}

fn warning_codes(result: &docmerge::MergeResult) -> Vec<&'static str> {
    result.warnings.iter().map(|w| w.code()).collect()
}

#[test]
fn test_numeric_not_lexical_order() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[
        ("Report part10.pdf", pdf("ten", 1)),
        ("Report part2.pdf", pdf("two", 2)),
        ("Report part1.pdf", pdf("one", 1)),
    ]);

    let result = pipeline(scratch.path())
        .run(MergeRequest::new(archive).archive_name("upload.zip"), &SilentProgress)
        .unwrap();

    assert_eq!(result.kind, DocumentKind::Pdf);
    assert_eq!(result.page_count, Some(4));
    assert_eq!(
        pdf_page_labels(&result.artifact),
        vec!["one-0", "two-0", "two-1", "ten-0"]
    );
    assert!(result.warnings.is_empty());
}

#[test]
fn test_order_independent_of_archive_order() {
    let scratch = tempfile::tempdir().unwrap();
    let members = vec![
        ("scan_page3.pdf", pdf("c", 1)),
        ("scan_page1.pdf", pdf("a", 1)),
        ("scan_page2.pdf", pdf("b", 1)),
    ];
    let mut reversed = members.clone();
    reversed.reverse();

    let pipeline = pipeline(scratch.path());
    let first = pipeline
        .run(MergeRequest::new(zip_archive(&members)), &SilentProgress)
        .unwrap();
    let second = pipeline
        .run(MergeRequest::new(zip_archive(&reversed)), &SilentProgress)
        .unwrap();

    assert_eq!(pdf_page_labels(&first.artifact), vec!["a-0", "b-0", "c-0"]);
    assert_eq!(pdf_page_labels(&first.artifact), pdf_page_labels(&second.artifact));
    assert_eq!(first.members, second.members);
}

#[test]
fn test_unordered_and_unsupported_members_warn() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[
        ("appendix.pdf", pdf("appendix", 1)),
        ("notes.txt", b"not a document".to_vec()),
        ("part 1.pdf", pdf("first", 1)),
    ]);

    let result = pipeline(scratch.path())
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap();

    assert_eq!(result.member_count, 2);
    assert_eq!(pdf_page_labels(&result.artifact), vec!["first-0", "appendix-0"]);
    let codes = warning_codes(&result);
    assert!(codes.contains(&"UNSUPPORTED_MEMBER_DROPPED"));
    assert!(codes.contains(&"UNORDERED_MEMBER"));
}

#[test]
fn test_duplicate_keys_keep_archive_order() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[
        ("b/part 1.pdf", pdf("second", 1)),
        ("a/part 1.pdf", pdf("first", 1)),
    ]);

    let result = pipeline(scratch.path())
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap();

    assert_eq!(pdf_page_labels(&result.artifact), vec!["second-0", "first-0"]);
    assert!(warning_codes(&result).contains(&"DUPLICATE_SEQUENCE_KEY"));
}

#[test]
fn test_docx_sections_in_order() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[
        ("Group 3.docx", docx("GAMMA")),
        ("Group 1.docx", docx("ALPHA")),
        ("Group 2.docx", docx("BETA")),
    ]);

    let result = pipeline(scratch.path())
        .run(
            MergeRequest::new(archive)
                .output_name("columns")
                .section_break(SectionBreak::NextPage),
            &SilentProgress,
        )
        .unwrap();

    assert_eq!(result.file_name, "columns.docx");
    assert_eq!(result.section_count, Some(3));
    assert_eq!(result.page_count, None);
    let document = docx_document(&result.artifact);
    let found = positions(&document, &["ALPHA", "BETA", "GAMMA"]);
    assert!(found.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_error_kinds() {
    let scratch = tempfile::tempdir().unwrap();
    let pipeline = pipeline(scratch.path());

    let mixed = zip_archive(&[("part1.pdf", pdf("a", 1)), ("part2.docx", docx("b"))]);
    let err = pipeline.run(MergeRequest::new(mixed), &SilentProgress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MixedTypeBatch);

    let mostly_junk = zip_archive(&[
        ("part1.pdf", pdf("a", 1)),
        ("a.txt", b"x".to_vec()),
        ("b.csv", b"y".to_vec()),
    ]);
    let err = pipeline.run(MergeRequest::new(mostly_junk), &SilentProgress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSupportedMembers);

    let broken = zip_archive(&[("part1.pdf", b"%PDF-1.4 truncated".to_vec())]);
    let err = pipeline.run(MergeRequest::new(broken), &SilentProgress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnreadableMember);
    assert_eq!(err.member(), Some("part1.pdf"));

    let err = pipeline
        .run(MergeRequest::new(b"plain text, not an archive".to_vec()), &SilentProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedArchiveFormat);

    let mut corrupt = zip_archive(&[("part1.pdf", pdf("a", 1))]);
    corrupt.truncate(corrupt.len() / 2);
    let err = pipeline
        .run(MergeRequest::new(corrupt).archive_name("upload.zip"), &SilentProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptArchive);
}

#[test]
fn test_member_count_limit() {
    let scratch = tempfile::tempdir().unwrap();
    let config = MergeConfig {
        scratch: ScratchConfig {
            root: scratch.path().to_path_buf(),
            ..ScratchConfig::default()
        },
        limits: LimitsConfig {
            max_members: 2,
            ..LimitsConfig::default()
        },
        ..MergeConfig::default()
    };
    let archive = zip_archive(&[
        ("part1.pdf", pdf("a", 1)),
        ("part2.pdf", pdf("b", 1)),
        ("part3.pdf", pdf("c", 1)),
    ]);

    let err = MergePipeline::new(config)
        .unwrap()
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
}

#[test]
fn test_scratch_root_left_clean() {
    let scratch = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[("part1.pdf", pdf("a", 1))]);

    pipeline(scratch.path())
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap();

    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn test_single_pdf_member_round_trip() {
    let scratch = tempfile::tempdir().unwrap();
    let input = pdf("solo", 3);
    let archive = zip_archive(&[("scan.pdf", input.clone())]);

    let result = pipeline(scratch.path())
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap();

    assert_eq!(result.member_count, 1);
    assert_eq!(result.page_count, Some(3));
    assert!(warning_codes(&result).is_empty());
    assert_eq!(result.artifact, input);
}

#[test]
fn test_single_docx_member_round_trip() {
    let scratch = tempfile::tempdir().unwrap();
    let input = docx("thesis body");
    let archive = zip_archive(&[("thesis.docx", input.clone())]);

    let result = pipeline(scratch.path())
        .run(
            MergeRequest::new(archive).section_break(SectionBreak::Continuous),
            &SilentProgress,
        )
        .unwrap();

    assert_eq!(result.kind, DocumentKind::Docx);
    assert_eq!(result.member_count, 1);
    assert_eq!(result.section_count, Some(1));
    assert!(warning_codes(&result).is_empty());
    assert_eq!(result.artifact, input);
    assert!(docx_document(&result.artifact).contains("thesis body"));
}

#[test]
fn test_docx_inner_part_over_member_limit() {
    let scratch = tempfile::tempdir().unwrap();
    let config = MergeConfig {
        scratch: ScratchConfig {
            root: scratch.path().to_path_buf(),
            ..ScratchConfig::default()
        },
        limits: LimitsConfig {
            max_member_bytes: 64 * 1024,
            ..LimitsConfig::default()
        },
        ..MergeConfig::default()
    };
    // compresses far below the limit, inflates far above it
    let archive = zip_archive(&[
        ("part1.docx", docx("first")),
        ("part2.docx", docx(&"w".repeat(1024 * 1024))),
    ]);

    let err = MergePipeline::new(config)
        .unwrap()
        .run(MergeRequest::new(archive), &SilentProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    assert_eq!(err.member(), Some("part2.docx"));
}
