//! DOCX structural merging
//!
//! Each member's body is appended as one or more sections of the base (first)
//! document. The section properties of every member travel with its content,
//! so page size, orientation, margins, columns, headers and footers survive.
//! Styles and numbering definitions are unioned into the base package and the
//! parts an appended body references (images, headers, footers, charts) are
//! copied in under collision-free names.

mod package;
mod styles;
pub(crate) mod xml;

pub use package::{ContentTypes, DocxPackage, Relationship, Relationships};

use super::{parse_all, MergeOutcome, MergedDocument};
use crate::classify::DocumentKind;
use crate::error::{MergeError, Warning};
use crate::ordering::OrderedMember;
use package::{relative_target, rels_path_for, resolve_target, CONTENT_TYPES_PART};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};
use xml::{
    children_of, count_elements, max_attr, merge_root_tags, prefix_for, root_span, AnchorIds, FragmentRewriter, Span, XmlError,
    REL_NS,
};

/// Relationship kinds owned by the base document; appended members never add
/// a second copy of these parts
const SINGLETON_KINDS: [&str; 16] = [
    "styles",
    "numbering",
    "settings",
    "webSettings",
    "fontTable",
    "theme",
    "stylesWithEffects",
    "customXml",
    "footnotes",
    "endnotes",
    "comments",
    "commentsExtended",
    "commentsIds",
    "commentsExtensible",
    "people",
    "glossaryDocument",
];

/// Parts whose entries are renumbered into the base: (relationship kind, root, entry)
const ANNOTATION_PARTS: [(&str, &str, &[u8]); 3] = [
    ("footnotes", "w:footnotes", b"w:footnote"),
    ("endnotes", "w:endnotes", b"w:endnote"),
    ("comments", "w:comments", b"w:comment"),
];

/// Closes a section in the middle of a body
const EMPTY_SECT_PR: &[u8] = b"<w:sectPr/>";

// ============================================================
// Section break
// ============================================================

/// How an appended member's first section starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SectionBreak {
    /// Start on a new page
    #[default]
    NextPage,
    /// Continue on the same page
    Continuous,
    /// Keep whatever the member's own section says
    Preserve,
}

impl SectionBreak {
    /// `w:type` value written into the first appended section
    pub(crate) fn type_value(self) -> Option<&'static str> {
        match self {
            Self::NextPage => Some("nextPage"),
            Self::Continuous => Some("continuous"),
            Self::Preserve => None,
        }
    }
}

impl fmt::Display for SectionBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NextPage => "next-page",
            Self::Continuous => "continuous",
            Self::Preserve => "preserve",
        })
    }
}

impl FromStr for SectionBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next-page" | "nextpage" | "page" => Ok(Self::NextPage),
            "continuous" => Ok(Self::Continuous),
            "preserve" => Ok(Self::Preserve),
            other => Err(format!("unknown section break '{other}'")),
        }
    }
}

// ============================================================
// Error Types
// ============================================================

/// DOCX package errors
#[derive(Debug, Error)]
pub enum DocxError {
    #[error("invalid DOCX package: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("missing part {0}")]
    MissingPart(String),

    #[error("part {part} inflates past {limit} bytes")]
    PartTooLarge { part: String, limit: u64 },

    #[error("malformed XML in {part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: XmlError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocxError {
    pub(crate) fn xml(part: &str, source: XmlError) -> Self {
        Self::Xml {
            part: part.to_string(),
            source,
        }
    }

    /// Blame `member`; oversized parts are a resource limit, not a broken file
    fn into_merge_error(self, member: &str) -> MergeError {
        match self {
            Self::PartTooLarge { part, limit } => MergeError::ResourceLimit {
                member: Some(member.to_string()),
                what: format!("part '{part}' of member '{member}'"),
                actual: limit.saturating_add(1),
                limit,
            },
            other => MergeError::unreadable(member, other),
        }
    }
}

// ============================================================
// Parsed member
// ============================================================

/// Main document part split at its body boundaries
#[derive(Debug)]
struct DocumentXml {
    xml: Vec<u8>,
    root: Span,
    body_open: Span,
    body_close: Span,
    final_sect_pr: Option<Span>,
}

impl DocumentXml {
    fn parse(xml: Vec<u8>) -> Result<Self, XmlError> {
        let root = root_span(&xml)?;
        let body = children_of(&xml, &["w:document", "w:body"])?;
        let final_sect_pr = body.items.last().filter(|c| c.is(b"w:sectPr")).map(|c| c.span);
        Ok(Self {
            root,
            body_open: body.open,
            body_close: body.close,
            final_sect_pr,
            xml,
        })
    }

    fn head(&self) -> &[u8] {
        &self.xml[..self.root.start]
    }

    fn root_tag(&self) -> &[u8] {
        &self.xml[self.root.start..self.root.end]
    }

    /// From the end of the root tag through `<w:body>`
    fn prelude(&self) -> &[u8] {
        &self.xml[self.root.end..self.body_open.end]
    }

    /// Block content without the body-level `w:sectPr`
    fn content(&self) -> &[u8] {
        let end = self.final_sect_pr.map_or(self.body_close.start, |s| s.start);
        &self.xml[self.body_open.end..end]
    }

    fn final_sect_pr(&self) -> Option<&[u8]> {
        self.final_sect_pr.map(|s| &self.xml[s.start..s.end])
    }

    /// From `</w:body>` to the end of the part
    fn tail(&self) -> &[u8] {
        &self.xml[self.body_close.start..]
    }
}

#[derive(Debug)]
struct ParsedMember {
    package: DocxPackage,
    main_part: String,
    document: DocumentXml,
    rels: Relationships,
    content_types: ContentTypes,
}

impl ParsedMember {
    fn parse(bytes: &[u8], part_limit: u64) -> Result<Self, DocxError> {
        let package = DocxPackage::from_bytes(bytes, part_limit)?;
        let main_part = package.main_document_part()?;
        let xml = package.required_part(&main_part)?.to_vec();
        let document = DocumentXml::parse(xml).map_err(|e| DocxError::xml(&main_part, e))?;
        let rels = package.relationships_of(&main_part)?;
        let content_types = package.content_types()?;
        Ok(Self {
            package,
            main_part,
            document,
            rels,
            content_types,
        })
    }

    fn part_of_kind(&self, kind: &str) -> Option<String> {
        part_of_kind(&self.rels, &self.main_part, kind)
    }
}

fn part_of_kind(rels: &Relationships, main_part: &str, kind: &str) -> Option<String> {
    rels.iter()
        .find(|r| r.kind() == kind && !r.external)
        .map(|r| resolve_target(main_part, &r.target))
}

fn section_count(xml: &[u8]) -> Result<usize, XmlError> {
    Ok(count_elements(xml, b"w:sectPr")?.max(1))
}

// ============================================================
// Structural merger
// ============================================================

/// Merges DOCX members section by section into the first member's package
#[derive(Debug, Clone)]
pub struct StructuralMerger {
    section_break: SectionBreak,
    part_limit: u64,
}

impl Default for StructuralMerger {
    fn default() -> Self {
        Self::new(SectionBreak::default())
    }
}

impl StructuralMerger {
    pub fn new(section_break: SectionBreak) -> Self {
        Self {
            section_break,
            part_limit: u64::MAX,
        }
    }

    /// Reject members with any part inflating past `limit` bytes
    pub fn with_part_limit(mut self, limit: u64) -> Self {
        self.part_limit = limit;
        self
    }

    pub fn section_break(&self) -> SectionBreak {
        self.section_break
    }

    pub fn merge(&self, members: &[OrderedMember]) -> Result<MergeOutcome, MergeError> {
        let parsed = parse_all(members, |member| {
            ParsedMember::parse(member.bytes(), self.part_limit).map_err(|e| e.into_merge_error(member.name()))
        })?;

        let mut pairs = members.iter().zip(parsed);
        let Some((first_member, first)) = pairs.next() else {
            return Err(MergeError::Internal("merge called without members".to_string()));
        };

        if members.len() == 1 {
            let sections = section_count(&first.document.xml)
                .map_err(|e| MergeError::unreadable(first_member.name(), e))?;
            return Ok(MergeOutcome {
                document: MergedDocument::Unchanged {
                    kind: DocumentKind::Docx,
                    bytes: first_member.bytes().to_vec(),
                    units: sections,
                },
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let mut composer = Composer::new(first).map_err(|e| e.into_merge_error(first_member.name()))?;
        for (tag, (member, parsed)) in pairs.enumerate() {
            let dropped = composer
                .append(&parsed, tag + 1, self.section_break)
                .map_err(|e| e.into_merge_error(member.name()))?;
            if dropped > 0 {
                warn!(member = %member.name(), dropped, "Removed anchors to missing notes or comments");
                warnings.push(Warning::AnnotationsDropped {
                    member: member.name().to_string(),
                    count: dropped,
                });
            }
            debug!(member = %member.name(), "Appended DOCX member");
        }

        let (package, section_count) = composer
            .finish()
            .map_err(|e| MergeError::Internal(format!("failed to assemble merged document: {e}")))?;
        info!(members = members.len(), sections = section_count, "Merged DOCX members");

        Ok(MergeOutcome {
            document: MergedDocument::Docx { package, section_count },
            warnings,
        })
    }
}

// ============================================================
// Composer
// ============================================================

/// Merged document under construction
struct Composer {
    package: DocxPackage,
    main_part: String,
    rels: Relationships,
    content_types: ContentTypes,
    head: Vec<u8>,
    root_tag: Vec<u8>,
    prelude: Vec<u8>,
    body: Vec<u8>,
    final_sect_pr: Option<Vec<u8>>,
    tail: Vec<u8>,
    next_drawing_id: u32,
}

impl Composer {
    fn new(base: ParsedMember) -> Result<Self, DocxError> {
        let doc = &base.document;
        let next_drawing_id = max_attr(&doc.xml, b"docPr", b"id")
            .map_err(|e| DocxError::xml(&base.main_part, e))?
            .map_or(1, |max| max.saturating_add(1));

        Ok(Self {
            head: doc.head().to_vec(),
            root_tag: doc.root_tag().to_vec(),
            prelude: doc.prelude().to_vec(),
            body: doc.content().to_vec(),
            final_sect_pr: doc.final_sect_pr().map(<[u8]>::to_vec),
            tail: doc.tail().to_vec(),
            next_drawing_id,
            package: base.package,
            main_part: base.main_part,
            rels: base.rels,
            content_types: base.content_types,
        })
    }

    /// Append `source` as new sections; `tag` disambiguates imported part names.
    ///
    /// Returns how many note or comment anchors had no entry to point at.
    fn append(&mut self, source: &ParsedMember, tag: usize, section_break: SectionBreak) -> Result<usize, DocxError> {
        let num_ids = self.merge_numbering(source, tag)?;
        self.merge_styles(source, tag, &num_ids)?;
        let [footnotes, endnotes, comments] = ANNOTATION_PARTS;
        let anchors = AnchorIds {
            footnotes: self.merge_annotations(source, tag, footnotes, &num_ids)?,
            endnotes: self.merge_annotations(source, tag, endnotes, &num_ids)?,
            comments: self.merge_annotations(source, tag, comments, &num_ids)?,
        };
        let rel_ids = self.import_relationships(source, tag)?;

        let source_root = source.document.root_tag();
        let xml_err = |e| DocxError::xml(&source.main_part, e);
        let rel_prefix = prefix_for(source_root, REL_NS)
            .map_err(xml_err)?
            .unwrap_or_else(|| "r".to_string());
        self.root_tag = merge_root_tags(&self.root_tag, source_root).map_err(xml_err)?;

        // The previous last section now ends in a paragraph mark
        self.body.extend_from_slice(b"<w:p><w:pPr>");
        self.body
            .extend_from_slice(self.final_sect_pr.as_deref().unwrap_or(EMPTY_SECT_PR));
        self.body.extend_from_slice(b"</w:pPr></w:p>");

        let mut rewriter = FragmentRewriter::new(&rel_prefix, &rel_ids, &num_ids, self.next_drawing_id, section_break)
            .with_anchors(&anchors);
        let content = rewriter.rewrite(source.document.content()).map_err(xml_err)?;
        self.body.extend(content);
        let final_sect_pr = rewriter
            .rewrite(source.document.final_sect_pr().unwrap_or(EMPTY_SECT_PR))
            .map_err(xml_err)?;
        self.final_sect_pr = Some(final_sect_pr);
        self.next_drawing_id = rewriter.next_drawing_id();
        Ok(rewriter.dropped_anchors())
    }

    fn part_of_kind(&self, kind: &str) -> Option<String> {
        part_of_kind(&self.rels, &self.main_part, kind)
    }

    /// Union numbering definitions; returns the source's `numId` map
    fn merge_numbering(&mut self, source: &ParsedMember, tag: usize) -> Result<HashMap<u32, u32>, DocxError> {
        let Some(source_part) = source.part_of_kind("numbering") else {
            return Ok(HashMap::new());
        };
        let Some(target_part) = self.part_of_kind("numbering") else {
            self.adopt_part(source, "numbering", tag)?;
            return Ok(HashMap::new());
        };

        let source_xml = source.package.required_part(&source_part)?;
        let target_xml = self.package.required_part(&target_part)?;
        let (merged, num_ids) =
            styles::merge_numbering(target_xml, source_xml).map_err(|e| DocxError::xml(&source_part, e))?;
        self.package.set_part(target_part, merged);
        Ok(num_ids)
    }

    /// Add the source's styles whose ids the base does not define
    fn merge_styles(&mut self, source: &ParsedMember, tag: usize, num_ids: &HashMap<u32, u32>) -> Result<(), DocxError> {
        let Some(source_part) = source.part_of_kind("styles") else {
            return Ok(());
        };
        let Some(target_part) = self.part_of_kind("styles") else {
            return self.adopt_part(source, "styles", tag);
        };

        let source_xml = source.package.required_part(&source_part)?;
        let target_xml = self.package.required_part(&target_part)?;
        let merged =
            styles::merge_styles(target_xml, source_xml, num_ids).map_err(|e| DocxError::xml(&source_part, e))?;
        self.package.set_part(target_part, merged);
        Ok(())
    }

    /// Append the source's footnotes, endnotes or comments; returns the id map
    /// for the anchors in its body
    fn merge_annotations(
        &mut self,
        source: &ParsedMember,
        tag: usize,
        (kind, root, entry): (&str, &str, &[u8]),
        num_ids: &HashMap<u32, u32>,
    ) -> Result<HashMap<i64, i64>, DocxError> {
        let Some(source_part) = source.part_of_kind(kind) else {
            return Ok(HashMap::new());
        };
        let source_xml = source.package.required_part(&source_part)?;
        let xml_err = |e| DocxError::xml(&source_part, e);

        let Some(target_part) = self.part_of_kind(kind) else {
            // Adopted as is, so every id keeps its value
            self.adopt_part(source, kind, tag)?;
            let entries = children_of(source_xml, &[root]).map_err(xml_err)?;
            return Ok(entries
                .items
                .iter()
                .filter(|c| c.is(entry))
                .filter_map(|c| c.attr(b"w:id")?.parse::<i64>().ok())
                .map(|id| (id, id))
                .collect());
        };

        let source_root = root_span(source_xml).map_err(xml_err)?;
        let rel_prefix = prefix_for(&source_xml[source_root.start..source_root.end], REL_NS)
            .map_err(xml_err)?
            .unwrap_or_else(|| "r".to_string());
        let source_rels = source.package.relationships_of(&source_part)?;
        let mut target_rels = self.package.relationships_of(&target_part)?;
        let rel_ids = self.import_links(source, &source_part, &source_rels, &target_part, &mut target_rels, tag)?;

        let mut rewriter = FragmentRewriter::new(&rel_prefix, &rel_ids, num_ids, self.next_drawing_id, SectionBreak::Preserve);
        let target_xml = self.package.required_part(&target_part)?;
        let (merged, ids) =
            styles::merge_annotations(target_xml, source_xml, root, entry, &mut rewriter).map_err(xml_err)?;
        self.next_drawing_id = rewriter.next_drawing_id();

        if !target_rels.is_empty() {
            self.package.set_part(rels_path_for(&target_part), target_rels.to_xml());
        }
        self.package.set_part(target_part, merged);
        debug!(kind, imported = ids.len(), "Merged annotation entries");
        Ok(ids)
    }

    /// Copy a singleton part the base document lacks and link it from the main part
    fn adopt_part(&mut self, source: &ParsedMember, kind: &str, tag: usize) -> Result<(), DocxError> {
        let Some(rel) = source.rels.iter().find(|r| r.kind() == kind && !r.external) else {
            return Ok(());
        };
        let part = resolve_target(&source.main_part, &rel.target);
        let imported = self.import_part(source, &part, tag, &mut HashMap::new())?;
        let target = relative_target(&self.main_part, &imported);
        self.rels.add(&rel.rel_type, &target, false);
        debug!(part = %imported, kind, "Adopted part from appended member");
        Ok(())
    }

    /// Re-create the source's main-part relationships; returns old id -> new id
    fn import_relationships(&mut self, source: &ParsedMember, tag: usize) -> Result<HashMap<String, String>, DocxError> {
        let mut rels = std::mem::take(&mut self.rels);
        let main_part = self.main_part.clone();
        let ids = self.import_links(source, &source.main_part, &source.rels, &main_part, &mut rels, tag);
        self.rels = rels;
        ids
    }

    /// Copy what `source_rels` point at and link it from `target_part`
    fn import_links(
        &mut self,
        source: &ParsedMember,
        source_part: &str,
        source_rels: &Relationships,
        target_part: &str,
        target_rels: &mut Relationships,
        tag: usize,
    ) -> Result<HashMap<String, String>, DocxError> {
        let mut ids = HashMap::new();
        let mut imported_parts = HashMap::new();

        for rel in source_rels.iter() {
            if SINGLETON_KINDS.contains(&rel.kind()) {
                continue;
            }
            let new_id = if rel.external {
                target_rels.add(&rel.rel_type, &rel.target, true)
            } else {
                let part = resolve_target(source_part, &rel.target);
                if !source.package.has_part(&part) {
                    debug!(id = %rel.id, target = %rel.target, "Skipping relationship to missing part");
                    continue;
                }
                let imported = self.import_part(source, &part, tag, &mut imported_parts)?;
                let target = relative_target(target_part, &imported);
                target_rels.add(&rel.rel_type, &target, false)
            };
            ids.insert(rel.id.clone(), new_id);
        }

        Ok(ids)
    }

    /// Copy `part` and everything it links to; each source part is copied once
    fn import_part(
        &mut self,
        source: &ParsedMember,
        part: &str,
        tag: usize,
        imported: &mut HashMap<String, String>,
    ) -> Result<String, DocxError> {
        if let Some(name) = imported.get(part) {
            return Ok(name.clone());
        }

        let data = source.package.required_part(part)?.to_vec();
        let name = self.package.unique_part_name(part, tag);
        imported.insert(part.to_string(), name.clone());
        // Reserve the name before recursing so nested parts cannot take it
        self.package.set_part(name.clone(), Vec::new());

        if let Some(content_type) = source.content_types.override_for(part) {
            self.content_types.set_override(&name, content_type);
        } else if let Some((_, ext)) = part.rsplit_once('.') {
            if let Some(content_type) = source.content_types.default_for(ext) {
                self.content_types.ensure_default(ext, content_type);
            }
        }

        let mut rels = source.package.relationships_of(part)?;
        if !rels.is_empty() {
            for rel in rels.iter_mut() {
                if rel.external {
                    continue;
                }
                let child = resolve_target(part, &rel.target);
                if source.package.has_part(&child) {
                    let child_name = self.import_part(source, &child, tag, imported)?;
                    rel.target = relative_target(&name, &child_name);
                }
            }
            self.package.set_part(rels_path_for(&name), rels.to_xml());
        }

        self.package.set_part(name.clone(), data);
        Ok(name)
    }

    fn finish(mut self) -> Result<(DocxPackage, usize), DocxError> {
        let final_sect_pr = self.final_sect_pr.unwrap_or_default();
        let mut xml = Vec::with_capacity(
            self.head.len()
                + self.root_tag.len()
                + self.prelude.len()
                + self.body.len()
                + final_sect_pr.len()
                + self.tail.len(),
        );
        xml.extend_from_slice(&self.head);
        xml.extend_from_slice(&self.root_tag);
        xml.extend_from_slice(&self.prelude);
        xml.extend_from_slice(&self.body);
        xml.extend_from_slice(&final_sect_pr);
        xml.extend_from_slice(&self.tail);

        let sections = section_count(&xml).map_err(|e| DocxError::xml(&self.main_part, e))?;

        self.package.set_part(rels_path_for(&self.main_part), self.rels.to_xml());
        self.package.set_part(CONTENT_TYPES_PART, self.content_types.to_xml());
        self.package.set_part(self.main_part.clone(), xml);
        Ok((self.package, sections))
    }
}
