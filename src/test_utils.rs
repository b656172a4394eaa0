//! In-memory fixtures for unit tests: archives, PDFs and DOCX packages

use crate::archive::ArchiveMember;
use crate::ordering::{OrderedMember, OrderingResolver};
use crate::sequence::{SequenceParser, DEFAULT_LABELS};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

// ============================================================
// Archives
// ============================================================

/// Zip with the given entries; names ending in `/` become directories
pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub(crate) fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub(crate) fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes(entries)).unwrap();
    encoder.finish().unwrap()
}

// ============================================================
// PDF
// ============================================================

fn save(mut doc: Document) -> Vec<u8> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn media_box(width: i64) -> Object {
    Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(width),
        Object::Integer(792),
    ])
}

/// PDF whose pages carry their own MediaBox; widths identify pages in tests
pub(crate) fn pdf_with_pages(widths: &[i64]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for &width in widths {
        let content = format!("BT /F1 12 Tf 72 720 Td (page {width}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box(width),
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(doc)
}

/// PDF whose pages inherit MediaBox from the page tree
pub(crate) fn pdf_inherited_box(width: i64, pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            }))
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => media_box(width),
            "Resources" => dictionary! {},
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(doc)
}

/// MediaBox width of every page, in page order, following inheritance
pub(crate) fn page_widths(bytes: &[u8]) -> Vec<i64> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let mut node = doc.get_dictionary(page_id).unwrap();
            loop {
                if let Ok(media_box) = node.get(b"MediaBox") {
                    return media_box.as_array().unwrap()[2].as_i64().unwrap();
                }
                let parent = node.get(b"Parent").unwrap().as_reference().unwrap();
                node = doc.get_dictionary(parent).unwrap();
            }
        })
        .collect()
}

// ============================================================
// Members
// ============================================================

/// Members in archive order, resolved with the default labels
pub(crate) fn ordered(members: &[(&str, Vec<u8>)]) -> Vec<OrderedMember> {
    let parser = SequenceParser::new(DEFAULT_LABELS).unwrap();
    let keyed = members
        .iter()
        .enumerate()
        .map(|(index, (name, bytes))| {
            let member = ArchiveMember::new(*name, bytes.clone(), index);
            let key = parser.parse(member.original_name());
            (member, key)
        })
        .collect();
    OrderingResolver::resolve(keyed).ordered
}

// ============================================================
// DOCX
// ============================================================

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const CT_BASE: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Builder for minimal but well-formed DOCX packages
#[derive(Debug, Clone)]
pub(crate) struct DocxFixture {
    blocks: Vec<String>,
    page: (u32, u32),
    columns: Option<u32>,
    styles: Vec<String>,
    numbering: bool,
    header_image: Option<Vec<u8>>,
    drawing: bool,
    footnotes: Vec<String>,
}

impl DocxFixture {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            page: (12240, 15840),
            columns: None,
            styles: Vec::new(),
            numbering: false,
            header_image: None,
            drawing: false,
            footnotes: Vec::new(),
        }
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.blocks.push(format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>"));
        self
    }

    pub fn page_size(mut self, width: u32, height: u32) -> Self {
        self.page = (width, height);
        self
    }

    pub fn columns(mut self, count: u32) -> Self {
        self.columns = Some(count);
        self
    }

    /// Extra paragraph style defined next to `Normal`
    pub fn style(mut self, id: &str) -> Self {
        self.styles.push(id.to_string());
        self
    }

    /// Numbered paragraph using `numId` 1, with a numbering part
    pub fn numbered(mut self, text: &str) -> Self {
        self.numbering = true;
        self.blocks.push(format!(
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>{text}</w:t></w:r></w:p>"#
        ));
        self
    }

    /// Default header with an image relationship
    pub fn header_image(mut self, png: &[u8]) -> Self {
        self.header_image = Some(png.to_vec());
        self
    }

    /// Inline picture with drawing id 1
    pub fn drawing(mut self) -> Self {
        self.drawing = true;
        self.blocks.push(
            r#"<w:p><w:r><w:drawing><wp:inline><wp:extent cx="100" cy="100"/><wp:docPr id="1" name="Picture 1"/><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/picture"><pic:pic><pic:blipFill><a:blip r:embed="rId4"/></pic:blipFill></pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#
                .to_string(),
        );
        self
    }

    /// Paragraph `text` anchoring a footnote `note`; notes are numbered from 1
    pub fn footnote(mut self, text: &str, note: &str) -> Self {
        self.footnotes.push(note.to_string());
        let id = self.footnotes.len();
        self.blocks.push(format!(
            r#"<w:p><w:r><w:t>{text}</w:t></w:r><w:r><w:footnoteReference w:id="{id}"/></w:r></w:p>"#
        ));
        self
    }

    fn footnotes_xml(&self) -> String {
        let notes: String = self
            .footnotes
            .iter()
            .enumerate()
            .map(|(i, note)| {
                format!(
                    r#"<w:footnote w:id="{}"><w:p><w:r><w:footnoteRef/></w:r><w:r><w:t>{note}</w:t></w:r></w:p></w:footnote>"#,
                    i + 1
                )
            })
            .collect();
        format!(
            concat!(
                r#"{}<w:footnotes xmlns:w="{}" xmlns:r="{}">"#,
                r#"<w:footnote w:type="separator" w:id="-1"><w:p><w:r><w:separator/></w:r></w:p></w:footnote>"#,
                r#"<w:footnote w:type="continuationSeparator" w:id="0"><w:p><w:r><w:continuationSeparator/></w:r></w:p></w:footnote>"#,
                "{}</w:footnotes>"
            ),
            XML_DECL, W_NS, R_NS, notes
        )
    }

    fn document_xml(&self) -> String {
        let header = if self.header_image.is_some() {
            r#"<w:headerReference w:type="default" r:id="rId3"/>"#
        } else {
            ""
        };
        let cols = match self.columns {
            Some(n) => format!(r#"<w:cols w:num="{n}"/>"#),
            None => r#"<w:cols w:space="720"/>"#.to_string(),
        };
        format!(
            concat!(
                "{decl}",
                r#"<w:document xmlns:w="{w}" xmlns:r="{r}" "#,
                r#"xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing" "#,
                r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
                r#"xmlns:pic="http://schemas.openxmlformats.org/drawingml/2006/picture">"#,
                "<w:body>{blocks}<w:sectPr>{header}",
                r#"<w:pgSz w:w="{width}" w:h="{height}"/>"#,
                r#"<w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440"/>"#,
                "{cols}</w:sectPr></w:body></w:document>"
            ),
            decl = XML_DECL,
            w = W_NS,
            r = R_NS,
            blocks = self.blocks.concat(),
            header = header,
            width = self.page.0,
            height = self.page.1,
            cols = cols,
        )
    }

    fn document_rels(&self) -> String {
        let mut rels = vec![("rId1", "styles", "styles.xml")];
        if self.numbering {
            rels.push(("rId2", "numbering", "numbering.xml"));
        }
        if self.header_image.is_some() {
            rels.push(("rId3", "header", "header1.xml"));
        }
        if self.drawing {
            rels.push(("rId4", "image", "media/image2.png"));
        }
        if !self.footnotes.is_empty() {
            rels.push(("rId5", "footnotes", "footnotes.xml"));
        }
        relationships_xml(&rels)
    }

    fn content_types(&self) -> String {
        let mut overrides = vec![
            ("/word/document.xml", format!("{CT_BASE}.document.main+xml")),
            ("/word/styles.xml", format!("{CT_BASE}.styles+xml")),
        ];
        if self.numbering {
            overrides.push(("/word/numbering.xml", format!("{CT_BASE}.numbering+xml")));
        }
        if self.header_image.is_some() {
            overrides.push(("/word/header1.xml", format!("{CT_BASE}.header+xml")));
        }
        if !self.footnotes.is_empty() {
            overrides.push(("/word/footnotes.xml", format!("{CT_BASE}.footnotes+xml")));
        }
        let overrides: String = overrides
            .iter()
            .map(|(part, ct)| format!(r#"<Override PartName="{part}" ContentType="{ct}"/>"#))
            .collect();
        format!(
            concat!(
                "{}",
                r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
                r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
                r#"<Default Extension="xml" ContentType="application/xml"/>"#,
                r#"<Default Extension="png" ContentType="image/png"/>"#,
                "{}</Types>"
            ),
            XML_DECL, overrides
        )
    }

    fn styles_xml(&self) -> String {
        let extra: String = self
            .styles
            .iter()
            .map(|id| format!(r#"<w:style w:type="paragraph" w:styleId="{id}"><w:name w:val="{id}"/></w:style>"#))
            .collect();
        format!(
            r#"{XML_DECL}<w:styles xmlns:w="{W_NS}"><w:style w:type="paragraph" w:styleId="Normal"><w:name w:val="Normal"/></w:style>{extra}</w:styles>"#
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let content_types = self.content_types();
        let package_rels = relationships_xml(&[("rId1", "officeDocument", "word/document.xml")]);
        let document = self.document_xml();
        let document_rels = self.document_rels();
        let styles = self.styles_xml();
        let numbering = format!(
            r#"{XML_DECL}<w:numbering xmlns:w="{W_NS}"><w:abstractNum w:abstractNumId="0"><w:lvl w:ilvl="0"><w:numFmt w:val="decimal"/></w:lvl></w:abstractNum><w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num></w:numbering>"#
        );
        let header = format!(
            r#"{XML_DECL}<w:hdr xmlns:w="{W_NS}" xmlns:r="{R_NS}"><w:p><w:r><w:t>Header</w:t></w:r></w:p></w:hdr>"#
        );
        let header_rels = relationships_xml(&[("rId1", "image", "media/image1.png")]);
        let footnotes = self.footnotes_xml();

        let mut entries: Vec<(&str, &[u8])> = vec![
            ("[Content_Types].xml", content_types.as_bytes()),
            ("_rels/.rels", package_rels.as_bytes()),
            ("word/document.xml", document.as_bytes()),
            ("word/_rels/document.xml.rels", document_rels.as_bytes()),
            ("word/styles.xml", styles.as_bytes()),
        ];
        if self.numbering {
            entries.push(("word/numbering.xml", numbering.as_bytes()));
        }
        if let Some(png) = &self.header_image {
            entries.push(("word/header1.xml", header.as_bytes()));
            entries.push(("word/_rels/header1.xml.rels", header_rels.as_bytes()));
            entries.push(("word/media/image1.png", png.as_slice()));
        }
        if self.drawing {
            entries.push(("word/media/image2.png", &b"\x89PNG fixture"[..]));
        }
        if !self.footnotes.is_empty() {
            entries.push(("word/footnotes.xml", footnotes.as_bytes()));
        }
        zip_bytes(&entries)
    }
}

fn relationships_xml(rels: &[(&str, &str, &str)]) -> String {
    let items: String = rels
        .iter()
        .map(|(id, kind, target)| format!(r#"<Relationship Id="{id}" Type="{REL_BASE}/{kind}" Target="{target}"/>"#))
        .collect();
    format!(
        r#"{XML_DECL}<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{items}</Relationships>"#
    )
}

/// Text of one part of a zip package
pub(crate) fn docx_part(bytes: &[u8], name: &str) -> String {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    text
}
