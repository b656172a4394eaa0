//! OPC package model: parts, relationships and content types

use super::xml::XmlError;
use super::DocxError;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub(crate) const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub(crate) const PACKAGE_RELS_PART: &str = "_rels/.rels";

const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

// ============================================================
// Package
// ============================================================

/// DOCX package held in memory as named parts in package order
#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    parts: Vec<(String, Vec<u8>)>,
}

impl DocxPackage {
    /// Read every file entry of a DOCX zip; no part may inflate past `part_limit`
    pub fn from_bytes(bytes: &[u8], part_limit: u64) -> Result<Self, DocxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::new();
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            // The declared size is untrusted; read one byte past the limit instead
            let mut data = Vec::new();
            (&mut file).take(part_limit.saturating_add(1)).read_to_end(&mut data)?;
            if data.len() as u64 > part_limit {
                return Err(DocxError::PartTooLarge { part: name, limit: part_limit });
            }
            parts.push((name, data));
        }
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.parts.iter().any(|(n, _)| n == name)
    }

    /// Insert or replace a part
    pub fn set_part(&mut self, name: impl Into<String>, data: Vec<u8>) {
        let name = name.into();
        match self.parts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = data,
            None => self.parts.push((name, data)),
        }
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn required_part(&self, name: &str) -> Result<&[u8], DocxError> {
        self.part(name)
            .ok_or_else(|| DocxError::MissingPart(name.to_string()))
    }

    /// Main document part named by the package relationships
    pub fn main_document_part(&self) -> Result<String, DocxError> {
        if let Some(rels) = self.part(PACKAGE_RELS_PART) {
            let rels = Relationships::parse(rels).map_err(|e| DocxError::xml(PACKAGE_RELS_PART, e))?;
            let target = rels
                .iter()
                .find(|r| r.rel_type.ends_with(OFFICE_DOCUMENT_REL) && !r.external)
                .map(|r| r.target.clone());
            if let Some(target) = target {
                let part = resolve_target("", &target);
                if self.has_part(&part) {
                    return Ok(part);
                }
            }
        }
        if self.has_part("word/document.xml") {
            return Ok("word/document.xml".to_string());
        }
        Err(DocxError::MissingPart("word/document.xml".to_string()))
    }

    pub fn content_types(&self) -> Result<ContentTypes, DocxError> {
        let xml = self.required_part(CONTENT_TYPES_PART)?;
        ContentTypes::parse(xml).map_err(|e| DocxError::xml(CONTENT_TYPES_PART, e))
    }

    /// Relationships of `part`; empty when it has no `.rels` file
    pub fn relationships_of(&self, part: &str) -> Result<Relationships, DocxError> {
        let rels_part = rels_path_for(part);
        match self.part(&rels_part) {
            Some(xml) => Relationships::parse(xml).map_err(|e| DocxError::xml(&rels_part, e)),
            None => Ok(Relationships::default()),
        }
    }

    /// `wanted` if free, otherwise `<stem>_m<tag>[_n].<ext>` in the same folder
    pub fn unique_part_name(&self, wanted: &str, tag: usize) -> String {
        if !self.has_part(wanted) {
            return wanted.to_string();
        }
        let (dir, file) = match wanted.rfind('/') {
            Some(slash) => wanted.split_at(slash + 1),
            None => ("", wanted),
        };
        let (stem, ext) = match file.rfind('.') {
            Some(dot) if dot > 0 => file.split_at(dot),
            _ => (file, ""),
        };
        let mut candidate = format!("{dir}{stem}_m{tag}{ext}");
        let mut n = 2;
        while self.has_part(&candidate) {
            candidate = format!("{dir}{stem}_m{tag}_{n}{ext}");
            n += 1;
        }
        candidate
    }

    /// Serialize as a zip with `[Content_Types].xml` first
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let ordered = self
            .parts
            .iter()
            .filter(|(n, _)| n == CONTENT_TYPES_PART)
            .chain(self.parts.iter().filter(|(n, _)| n != CONTENT_TYPES_PART));
        for (name, data) in ordered {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data)?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

// ============================================================
// Relationships
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

impl Relationship {
    /// Last segment of the relationship type URI (`image`, `header`, ...)
    pub fn kind(&self) -> &str {
        self.rel_type.rsplit('/').next().unwrap_or(&self.rel_type)
    }
}

/// Contents of one `.rels` part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationships {
    items: Vec<Relationship>,
}

impl Relationships {
    pub fn parse(xml: &[u8]) -> Result<Self, XmlError> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);
        let mut items = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                    let mut rel = Relationship {
                        id: String::new(),
                        rel_type: String::new(),
                        target: String::new(),
                        external: false,
                    };
                    for attr in e.attributes() {
                        let attr = attr?;
                        let value = attr.unescape_value()?.into_owned();
                        match attr.key.as_ref() {
                            b"Id" => rel.id = value,
                            b"Type" => rel.rel_type = value,
                            b"Target" => rel.target = value,
                            b"TargetMode" => rel.external = value.eq_ignore_ascii_case("External"),
                            _ => {}
                        }
                    }
                    if !rel.id.is_empty() {
                        items.push(rel);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self { items })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Relationship> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First relationship whose type ends with `/<kind>`
    pub fn find_kind(&self, kind: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.kind() == kind)
    }

    /// Append a relationship under a fresh `rIdN`, returning the id
    pub fn add(&mut self, rel_type: &str, target: &str, external: bool) -> String {
        let id = self.next_id();
        self.items.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            external,
        });
        id
    }

    fn next_id(&self) -> String {
        let mut n = self.items.len() + 1;
        loop {
            let candidate = format!("rId{n}");
            if !self.items.iter().any(|r| r.id == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
             <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        );
        for rel in &self.items {
            out.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                escape(&rel.id),
                escape(&rel.rel_type),
                escape(&rel.target)
            ));
            if rel.external {
                out.push_str(" TargetMode=\"External\"");
            }
            out.push_str("/>");
        }
        out.push_str("</Relationships>");
        out.into_bytes()
    }
}

// ============================================================
// Content types
// ============================================================

/// Parsed `[Content_Types].xml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

impl ContentTypes {
    pub fn parse(xml: &[u8]) -> Result<Self, XmlError> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);
        let mut types = Self::default();

        loop {
            match reader.read_event()? {
                Event::Empty(e) | Event::Start(e) => match e.local_name().as_ref() {
                    b"Default" => {
                        if let (Some(ext), Some(ct)) = (value(&e, b"Extension")?, value(&e, b"ContentType")?) {
                            types.defaults.push((ext.to_lowercase(), ct));
                        }
                    }
                    b"Override" => {
                        if let (Some(part), Some(ct)) = (value(&e, b"PartName")?, value(&e, b"ContentType")?) {
                            types.overrides.push((part, ct));
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(types)
    }

    /// Override for a part name (without the leading slash)
    pub fn override_for(&self, part: &str) -> Option<&str> {
        let wanted = format!("/{part}");
        self.overrides
            .iter()
            .find(|(p, _)| p.eq_ignore_ascii_case(&wanted))
            .map(|(_, ct)| ct.as_str())
    }

    pub fn default_for(&self, ext: &str) -> Option<&str> {
        self.defaults
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|(_, ct)| ct.as_str())
    }

    /// Effective content type of a part
    pub fn content_type_of(&self, part: &str) -> Option<&str> {
        self.override_for(part).or_else(|| {
            let ext = part.rsplit_once('.').map(|(_, e)| e)?;
            self.default_for(ext)
        })
    }

    pub fn ensure_default(&mut self, ext: &str, content_type: &str) {
        if self.default_for(ext).is_none() {
            self.defaults.push((ext.to_lowercase(), content_type.to_string()));
        }
    }

    pub fn set_override(&mut self, part: &str, content_type: &str) {
        let name = format!("/{part}");
        match self.overrides.iter_mut().find(|(p, _)| *p == name) {
            Some((_, ct)) => *ct = content_type.to_string(),
            None => self.overrides.push((name, content_type.to_string())),
        }
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
             <Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
        );
        for (ext, ct) in &self.defaults {
            out.push_str(&format!(
                "<Default Extension=\"{}\" ContentType=\"{}\"/>",
                escape(ext),
                escape(ct)
            ));
        }
        for (part, ct) in &self.overrides {
            out.push_str(&format!(
                "<Override PartName=\"{}\" ContentType=\"{}\"/>",
                escape(part),
                escape(ct)
            ));
        }
        out.push_str("</Types>");
        out.into_bytes()
    }
}

fn value(tag: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, XmlError> {
    for attr in tag.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

// ============================================================
// Part paths
// ============================================================

/// `word/document.xml` -> `word/_rels/document.xml.rels`
pub(crate) fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against its source part
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        if let Some((dir, _)) = source_part.rsplit_once('/') {
            segments.extend(dir.split('/').filter(|s| !s.is_empty()));
        }
    }
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Relative target from `source_part` to `part` (both package-absolute)
pub(crate) fn relative_target(source_part: &str, part: &str) -> String {
    let base: Vec<&str> = source_part
        .rsplit_once('/')
        .map(|(dir, _)| dir.split('/').collect())
        .unwrap_or_default();
    let target: Vec<&str> = part.split('/').collect();

    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = vec![".."; base.len() - common];
    out.extend(&target[common..]);
    out.join("/")
}
