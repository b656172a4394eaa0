//! PDF page-stream merging (lopdf)
//!
//! Pages of every member are concatenated in resolved order. Page content is
//! never touched; attributes a page inherits from its page tree are copied onto
//! the page itself before it is re-parented under the merged tree.

use super::{parse_all, MergeOutcome, MergedDocument};
use crate::classify::DocumentKind;
use crate::error::{MergeError, Warning};
use crate::ordering::OrderedMember;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tracing::{debug, info};

/// Page attributes that may be inherited from ancestor `Pages` nodes
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guards against cyclic `Parent` chains
const MAX_TREE_DEPTH: usize = 32;

/// Concatenates PDF members page by page
#[derive(Debug, Clone, Copy, Default)]
pub struct PageStreamMerger;

impl PageStreamMerger {
    pub fn merge(&self, members: &[OrderedMember]) -> Result<MergeOutcome, MergeError> {
        let documents = parse_all(members, load_member)?;

        let mut warnings = Vec::new();
        for (member, doc) in members.iter().zip(&documents) {
            let pages = doc.get_pages().len();
            debug!(member = %member.name(), pages, version = %doc.version, "Parsed PDF member");
            if pages == 0 {
                warnings.push(Warning::EmptyMember {
                    member: member.name().to_string(),
                });
            }
        }

        // A lone member is validated above but never re-serialized
        if let ([member], [document]) = (members, documents.as_slice()) {
            return Ok(MergeOutcome {
                document: MergedDocument::Unchanged {
                    kind: DocumentKind::Pdf,
                    bytes: member.bytes().to_vec(),
                    units: document.get_pages().len(),
                },
                warnings,
            });
        }

        let document = concatenate(members, documents)?;
        info!(members = members.len(), pages = document.get_pages().len(), "Merged PDF members");
        Ok(MergeOutcome {
            document: MergedDocument::Pdf(document),
            warnings,
        })
    }
}

fn load_member(member: &OrderedMember) -> Result<Document, MergeError> {
    let doc = Document::load_mem(member.bytes()).map_err(|e| MergeError::unreadable(member.name(), e))?;
    if doc.is_encrypted() {
        return Err(MergeError::unreadable(member.name(), "PDF is password-protected"));
    }
    Ok(doc)
}

fn concatenate(members: &[OrderedMember], documents: Vec<Document>) -> Result<Document, MergeError> {
    let version = documents
        .iter()
        .map(|d| d.version.clone())
        .max()
        .unwrap_or_else(|| "1.4".to_string());
    let mut merged = Document::with_version(version);

    let mut next_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();

    for (member, mut doc) in members.iter().zip(documents) {
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            let page = flattened_page(&doc, page_id).map_err(|reason| MergeError::unreadable(member.name(), reason))?;
            pages.push((page_id, page));
        }

        for (id, object) in doc.objects {
            if !is_page_tree_node(&object) {
                merged.objects.insert(id, object);
            }
        }
    }
    merged.max_id = next_id;

    let pages_id = merged.new_object_id();
    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    let count = kids.len() as i64;
    for (id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(id, Object::Dictionary(page));
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.renumber_objects();

    Ok(merged)
}

/// Copy of a page dictionary with inherited attributes made explicit
fn flattened_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary, String> {
    let mut page = doc.get_dictionary(page_id).map_err(|e| e.to_string())?.clone();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(parent_id) = parent {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err("page tree is cyclic or too deep".to_string());
        }
        let node = doc.get_dictionary(parent_id).map_err(|e| e.to_string())?;
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    Ok(page)
}

/// Catalog, page tree and outline nodes are rebuilt, never copied
fn is_page_tree_node(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline")
    )
}
