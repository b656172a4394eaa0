//! Byte-span XML helpers for WordprocessingML parts
//!
//! Parts are edited by splicing byte ranges located with quick-xml rather than
//! by round-tripping a DOM, so markup this crate does not understand is kept
//! exactly as written.

use super::SectionBreak;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use thiserror::Error;

pub(crate) const REL_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Body anchors pointing at footnote, endnote or comment entries by `w:id`
const ANCHORS: [&[u8]; 5] = [
    b"w:commentRangeStart",
    b"w:commentRangeEnd",
    b"w:commentReference",
    b"w:footnoteReference",
    b"w:endnoteReference",
];

/// Children of `w:sectPr` that must precede `w:type`
const SECT_PR_LEADING: [&[u8]; 4] = [
    b"w:headerReference",
    b"w:footerReference",
    b"w:footnotePr",
    b"w:endnotePr",
];

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),

    #[error(transparent)]
    Attribute(#[from] AttrError),

    #[error("missing element <{0}>")]
    Missing(String),

    #[error("unexpected empty element <{0}/>")]
    SelfClosing(String),

    #[error("element name is not valid UTF-8")]
    Utf8,
}

pub(crate) type Result<T> = std::result::Result<T, XmlError>;

/// Half-open byte range in a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

/// Direct child element of a container
#[derive(Debug, Clone)]
pub(crate) struct Child {
    pub name: Vec<u8>,
    pub span: Span,
    pub tag: BytesStart<'static>,
}

impl Child {
    pub fn is(&self, name: &[u8]) -> bool {
        self.name == name
    }

    pub fn attr(&self, key: &[u8]) -> Option<String> {
        attr(&self.tag, key)
    }
}

/// Container element located by path, with its direct children
#[derive(Debug, Clone)]
pub(crate) struct Children {
    /// Start tag of the container
    pub open: Span,
    /// End tag of the container
    pub close: Span,
    pub items: Vec<Child>,
}

pub(crate) fn attr(tag: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    tag.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Span of the root element's start tag
pub(crate) fn root_span(xml: &[u8]) -> Result<Span> {
    let mut reader = Reader::from_reader(xml);
    loop {
        let start = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(_) => {
                return Ok(Span {
                    start,
                    end: reader.buffer_position(),
                })
            }
            Event::Empty(e) => return Err(XmlError::SelfClosing(name_of(&e))),
            Event::Eof => return Err(XmlError::Missing("root".to_string())),
            _ => {}
        }
    }
}

/// Locate the element at `path` (root first) and list its direct children
pub(crate) fn children_of(xml: &[u8], path: &[&str]) -> Result<Children> {
    let mut reader = Reader::from_reader(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut open: Option<Span> = None;
    let mut current: Option<(Vec<u8>, usize, BytesStart<'static>)> = None;
    let mut items = Vec::new();

    let on_path = |stack: &[Vec<u8>], name: &[u8]| {
        let depth = stack.len();
        depth < path.len()
            && path[depth].as_bytes() == name
            && stack.iter().zip(path).all(|(s, p)| s.as_slice() == p.as_bytes())
    };

    loop {
        let start = reader.buffer_position();
        let event = reader.read_event()?;
        let end = reader.buffer_position();
        match event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if open.is_none() {
                    if on_path(&stack, &name) && stack.len() + 1 == path.len() {
                        open = Some(Span { start, end });
                    }
                } else if stack.len() == path.len() {
                    current = Some((name.clone(), start, e.into_owned()));
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = e.name().as_ref().to_vec();
                if open.is_some() && stack.len() == path.len() {
                    items.push(Child {
                        name,
                        span: Span { start, end },
                        tag: e.into_owned(),
                    });
                } else if open.is_none() && on_path(&stack, &name) && stack.len() + 1 == path.len() {
                    return Err(XmlError::SelfClosing(path.join("/")));
                }
            }
            Event::End(_) => {
                stack.pop();
                if let Some(open) = open {
                    if stack.len() == path.len() {
                        if let Some((name, child_start, tag)) = current.take() {
                            items.push(Child {
                                name,
                                span: Span { start: child_start, end },
                                tag,
                            });
                        }
                    } else if stack.len() + 1 == path.len() {
                        return Ok(Children {
                            open,
                            close: Span { start, end },
                            items,
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(XmlError::Missing(path.join("/")))
}

/// Number of start or empty tags with the given name
pub(crate) fn count_elements(xml: &[u8], name: &[u8]) -> Result<usize> {
    let mut reader = Reader::from_reader(xml);
    let mut count = 0;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == name => count += 1,
            Event::Eof => return Ok(count),
            _ => {}
        }
    }
}

/// Largest numeric value of `key` on elements whose local name is `local`
pub(crate) fn max_attr(xml: &[u8], local: &[u8], key: &[u8]) -> Result<Option<u32>> {
    let mut reader = Reader::from_reader(xml);
    let mut max = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == local => {
                if let Some(value) = attr(&e, key).and_then(|v| v.parse::<u32>().ok()) {
                    max = max.max(Some(value));
                }
            }
            Event::Eof => return Ok(max),
            _ => {}
        }
    }
}

/// Prefix bound to `namespace` on a root start tag (`xmlns:<prefix>="namespace"`)
pub(crate) fn prefix_for(root_tag: &[u8], namespace: &str) -> Result<Option<String>> {
    let tag = parse_start_tag(root_tag)?;
    for a in tag.attributes() {
        let a = a?;
        if let Some(prefix) = a.key.as_ref().strip_prefix(b"xmlns:") {
            if a.value.as_ref() == namespace.as_bytes() {
                return Ok(Some(String::from_utf8_lossy(prefix).into_owned()));
            }
        }
    }
    Ok(None)
}

/// Union of namespace declarations and `mc:Ignorable` prefixes of two root tags;
/// the result keeps the target's element name and attribute order
pub(crate) fn merge_root_tags(target: &[u8], source: &[u8]) -> Result<Vec<u8>> {
    let target_tag = parse_start_tag(target)?;
    let source_tag = parse_start_tag(source)?;

    let mut attrs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for a in target_tag.attributes() {
        let a = a?;
        attrs.push((a.key.as_ref().to_vec(), a.value.into_owned()));
    }

    let mut changed = false;
    let mut source_ignorable = None;
    for a in source_tag.attributes() {
        let a = a?;
        let key = a.key.as_ref();
        if key.ends_with(b":Ignorable") {
            source_ignorable = Some((key.to_vec(), String::from_utf8_lossy(&a.value).into_owned()));
        } else if key.starts_with(b"xmlns") && !attrs.iter().any(|(k, _)| k.as_slice() == key) {
            attrs.push((key.to_vec(), a.value.into_owned()));
            changed = true;
        }
    }

    if let Some((key, source_value)) = source_ignorable {
        match attrs.iter_mut().find(|(k, _)| k.ends_with(b":Ignorable")) {
            Some((_, value)) => {
                let mut tokens: Vec<String> = String::from_utf8_lossy(value)
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect();
                for token in source_value.split_whitespace() {
                    if !tokens.iter().any(|t| t == token) {
                        tokens.push(token.to_string());
                        changed = true;
                    }
                }
                *value = tokens.join(" ").into_bytes();
            }
            None => {
                attrs.push((key, source_value.into_bytes()));
                changed = true;
            }
        }
    }

    if !changed {
        return Ok(target.to_vec());
    }

    let name = std::str::from_utf8(target_tag.name().as_ref())
        .map_err(|_| XmlError::Utf8)?
        .to_string();
    let mut tag = BytesStart::new(name);
    for (key, value) in &attrs {
        tag.push_attribute((key.as_slice(), value.as_slice()));
    }
    write_event(Event::Start(tag))
}

fn parse_start_tag(bytes: &[u8]) -> Result<BytesStart<'static>> {
    let mut reader = Reader::from_reader(bytes);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => return Ok(e.into_owned()),
            Event::Eof => return Err(XmlError::Missing("start tag".to_string())),
            _ => {}
        }
    }
}

fn write_event(event: Event<'_>) -> Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(event)?;
    Ok(writer.into_inner())
}

fn name_of(tag: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(tag.name().as_ref()).into_owned()
}

/// Rebuild a start tag when `rewrite` changes at least one attribute value
pub(crate) fn rewrite_attrs<F>(tag: &BytesStart<'_>, mut rewrite: F) -> Result<Option<BytesStart<'static>>>
where
    F: FnMut(&[u8], &[u8]) -> Option<Vec<u8>>,
{
    let mut attrs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut changed = false;
    for a in tag.attributes() {
        let a = a?;
        let key = a.key.as_ref().to_vec();
        match rewrite(key.as_slice(), a.value.as_ref()) {
            Some(value) => {
                changed = true;
                attrs.push((key, value));
            }
            None => attrs.push((key, a.value.into_owned())),
        }
    }
    if !changed {
        return Ok(None);
    }

    let name = std::str::from_utf8(tag.name().as_ref())
        .map_err(|_| XmlError::Utf8)?
        .to_string();
    let mut out = BytesStart::new(name);
    for (key, value) in &attrs {
        out.push_attribute((key.as_slice(), value.as_slice()));
    }
    Ok(Some(out))
}

// ============================================================
// Body fragment rewriting
// ============================================================

/// Old -> new entry ids of imported footnotes, endnotes and comments
#[derive(Debug, Default)]
pub(crate) struct AnchorIds {
    pub footnotes: HashMap<i64, i64>,
    pub endnotes: HashMap<i64, i64>,
    pub comments: HashMap<i64, i64>,
}

impl AnchorIds {
    fn for_anchor(&self, name: &[u8]) -> &HashMap<i64, i64> {
        match name {
            b"w:footnoteReference" => &self.footnotes,
            b"w:endnoteReference" => &self.endnotes,
            _ => &self.comments,
        }
    }
}

/// Rewrites an appended member's body markup: relationship ids, numbering ids,
/// drawing ids, note and comment anchors and the section type of its first
/// section. Anchors whose entry was not imported are removed and counted.
pub(crate) struct FragmentRewriter<'a> {
    rel_prefix: Vec<u8>,
    rel_ids: &'a HashMap<String, String>,
    num_ids: &'a HashMap<u32, u32>,
    anchors: Option<&'a AnchorIds>,
    dropped_anchors: usize,
    next_drawing_id: u32,
    section_type: Option<&'static str>,
}

struct SectState {
    depth: usize,
    skipping: usize,
    inserted: bool,
    value: &'static str,
}

impl<'a> FragmentRewriter<'a> {
    pub fn new(
        rel_prefix: &str,
        rel_ids: &'a HashMap<String, String>,
        num_ids: &'a HashMap<u32, u32>,
        next_drawing_id: u32,
        section_break: SectionBreak,
    ) -> Self {
        Self {
            rel_prefix: format!("{rel_prefix}:").into_bytes(),
            rel_ids,
            num_ids,
            anchors: None,
            dropped_anchors: 0,
            next_drawing_id,
            section_type: section_break.type_value(),
        }
    }

    /// Renumber note and comment anchors instead of removing them
    pub fn with_anchors(mut self, anchors: &'a AnchorIds) -> Self {
        self.anchors = Some(anchors);
        self
    }

    /// Next unused drawing id after rewriting
    pub fn next_drawing_id(&self) -> u32 {
        self.next_drawing_id
    }

    /// Anchors removed so far because their entry was not imported
    pub fn dropped_anchors(&self) -> usize {
        self.dropped_anchors
    }

    /// Rewrite one fragment; the section type is applied to the first `w:sectPr`
    /// seen across all fragments passed to this rewriter
    pub fn rewrite(&mut self, fragment: &[u8]) -> Result<Vec<u8>> {
        let mut reader = Reader::from_reader(fragment);
        let mut writer = Writer::new(Vec::with_capacity(fragment.len() + 64));
        let mut sect: Option<SectState> = None;

        loop {
            let event = reader.read_event()?;
            match event {
                Event::Eof => break,
                Event::Start(e) => {
                    if let Some(state) = sect.as_mut() {
                        if state.skipping > 0 {
                            state.skipping += 1;
                            continue;
                        }
                        if state.depth == 0 {
                            if e.name().as_ref() == b"w:type" {
                                state.skipping = 1;
                                continue;
                            }
                            insert_section_type(&mut writer, state, e.name().as_ref())?;
                        }
                        state.depth += 1;
                    } else if e.name().as_ref() == b"w:sectPr" {
                        if let Some(value) = self.section_type.take() {
                            sect = Some(SectState {
                                depth: 0,
                                skipping: 0,
                                inserted: false,
                                value,
                            });
                        }
                    }
                    let tag = self.rewrite_tag(&e)?;
                    writer.write_event(Event::Start(tag.unwrap_or(e)))?;
                }
                Event::Empty(e) => {
                    if let Some(state) = sect.as_mut() {
                        if state.skipping > 0 {
                            continue;
                        }
                        if state.depth == 0 {
                            if e.name().as_ref() == b"w:type" {
                                continue;
                            }
                            insert_section_type(&mut writer, state, e.name().as_ref())?;
                        }
                    } else if ANCHORS.contains(&e.name().as_ref()) {
                        match self.remap_anchor(&e)? {
                            Some(tag) => writer.write_event(Event::Empty(tag))?,
                            None => self.dropped_anchors += 1,
                        }
                        continue;
                    } else if e.name().as_ref() == b"w:sectPr" {
                        if let Some(value) = self.section_type.take() {
                            let end = BytesEnd::new("w:sectPr");
                            writer.write_event(Event::Start(e))?;
                            writer.write_event(Event::Empty(type_element(value)))?;
                            writer.write_event(Event::End(end))?;
                            continue;
                        }
                    }
                    let tag = self.rewrite_tag(&e)?;
                    writer.write_event(Event::Empty(tag.unwrap_or(e)))?;
                }
                Event::End(e) => {
                    if let Some(state) = sect.as_mut() {
                        if state.skipping > 0 {
                            state.skipping -= 1;
                            continue;
                        }
                        if state.depth == 0 {
                            if !state.inserted {
                                writer.write_event(Event::Empty(type_element(state.value)))?;
                            }
                            sect = None;
                        } else {
                            state.depth -= 1;
                        }
                    }
                    writer.write_event(Event::End(e))?;
                }
                other => {
                    if sect.as_ref().is_some_and(|s| s.skipping > 0) {
                        continue;
                    }
                    writer.write_event(other)?;
                }
            }
        }

        Ok(writer.into_inner())
    }

    /// Anchor with its imported entry id, or `None` when the entry is missing
    fn remap_anchor(&self, tag: &BytesStart<'_>) -> Result<Option<BytesStart<'static>>> {
        let Some(anchors) = self.anchors else {
            return Ok(None);
        };
        let ids = anchors.for_anchor(tag.name().as_ref());
        let Some(new) = attr(tag, b"w:id")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|old| ids.get(&old))
        else {
            return Ok(None);
        };
        let new = new.to_string();
        rewrite_attrs(tag, |key, _| (key == b"w:id").then(|| new.as_bytes().to_vec()))
    }

    fn rewrite_tag(&mut self, tag: &BytesStart<'_>) -> Result<Option<BytesStart<'static>>> {
        let name = tag.name();
        let is_num_id = name.as_ref() == b"w:numId";
        let is_drawing = tag.local_name().as_ref() == b"docPr";
        let rel_prefix = self.rel_prefix.as_slice();
        let rel_ids = self.rel_ids;
        let num_ids = self.num_ids;
        let next_drawing_id = &mut self.next_drawing_id;

        rewrite_attrs(tag, |key, value| {
            if key.starts_with(rel_prefix) {
                let old = std::str::from_utf8(value).ok()?;
                return rel_ids.get(old).map(|new| new.clone().into_bytes());
            }
            if is_num_id && key == b"w:val" {
                let old: u32 = std::str::from_utf8(value).ok()?.parse().ok()?;
                return num_ids.get(&old).map(|new| new.to_string().into_bytes());
            }
            if is_drawing && key == b"id" {
                let id = *next_drawing_id;
                *next_drawing_id += 1;
                return Some(id.to_string().into_bytes());
            }
            None
        })
    }
}

fn type_element(value: &str) -> BytesStart<'static> {
    let mut tag = BytesStart::new("w:type");
    tag.push_attribute(("w:val", value));
    tag
}

fn insert_section_type(writer: &mut Writer<Vec<u8>>, state: &mut SectState, child: &[u8]) -> Result<()> {
    if !state.inserted && !SECT_PR_LEADING.contains(&child) {
        writer.write_event(Event::Empty(type_element(state.value)))?;
        state.inserted = true;
    }
    Ok(())
}

/// Replace `key` on the first start tag of `fragment`, keeping the rest verbatim
pub(crate) fn set_first_attr(fragment: &[u8], key: &[u8], value: &str) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(fragment);
    loop {
        let start = reader.buffer_position();
        let (tag, empty) = match reader.read_event()? {
            Event::Start(e) => (e.into_owned(), false),
            Event::Empty(e) => (e.into_owned(), true),
            Event::Eof => return Err(XmlError::Missing("start tag".to_string())),
            _ => continue,
        };
        let end = reader.buffer_position();
        let tag = rewrite_attrs(&tag, |k, _| (k == key).then(|| value.as_bytes().to_vec()))?.unwrap_or(tag);

        let mut out = Vec::with_capacity(fragment.len() + 8);
        out.extend_from_slice(&fragment[..start]);
        out.extend(write_event(if empty { Event::Empty(tag) } else { Event::Start(tag) })?);
        out.extend_from_slice(&fragment[end..]);
        return Ok(out);
    }
}

// ============================================================
// Numbering id offsets
// ============================================================

/// Shift `abstractNumId`/`numId` values inside imported numbering markup and
/// drop picture-bullet references whose definitions are not imported
pub(crate) fn offset_numbering(fragment: &[u8], abstract_offset: u32, num_offset: u32) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(fragment);
    let mut writer = Writer::new(Vec::with_capacity(fragment.len()));

    let shift = |tag: &BytesStart<'_>| -> Result<Option<BytesStart<'static>>> {
        let name = tag.name();
        let (key, offset): (&[u8], u32) = match name.as_ref() {
            b"w:abstractNum" => (&b"w:abstractNumId"[..], abstract_offset),
            b"w:abstractNumId" => (&b"w:val"[..], abstract_offset),
            b"w:num" => (&b"w:numId"[..], num_offset),
            _ => return Ok(None),
        };
        rewrite_attrs(tag, |k, v| {
            if k != key {
                return None;
            }
            let old: u32 = std::str::from_utf8(v).ok()?.parse().ok()?;
            Some(old.saturating_add(offset).to_string().into_bytes())
        })
    };

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => {
                let tag = shift(&e)?;
                writer.write_event(Event::Start(tag.unwrap_or(e)))?;
            }
            Event::Empty(e) => {
                if e.name().as_ref() == b"w:lvlPicBulletId" {
                    continue;
                }
                let tag = shift(&e)?;
                writer.write_event(Event::Empty(tag.unwrap_or(e)))?;
            }
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}
