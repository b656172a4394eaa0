//! Style, numbering and annotation definition merging

use super::xml::{
    self, children_of, merge_root_tags, offset_numbering, root_span, set_first_attr, FragmentRewriter, Result,
};
use super::SectionBreak;
use std::collections::{HashMap, HashSet};

/// Append styles from `source` whose `w:styleId` is missing in `target`.
/// Numbering references inside imported styles are remapped through `num_ids`.
pub(crate) fn merge_styles(target: &[u8], source: &[u8], num_ids: &HashMap<u32, u32>) -> Result<Vec<u8>> {
    let target_styles = children_of(target, &["w:styles"])?;
    let source_styles = children_of(source, &["w:styles"])?;

    let known: HashSet<String> = target_styles
        .items
        .iter()
        .filter(|c| c.is(b"w:style"))
        .filter_map(|c| c.attr(b"w:styleId"))
        .collect();

    let no_rels = HashMap::new();
    let mut rewriter = FragmentRewriter::new("r", &no_rels, num_ids, 0, SectionBreak::Preserve);
    let mut imported = Vec::new();
    for style in source_styles.items.iter().filter(|c| c.is(b"w:style")) {
        let Some(id) = style.attr(b"w:styleId") else {
            continue;
        };
        if known.contains(&id) {
            continue;
        }
        imported.extend(rewriter.rewrite(&source[style.span.start..style.span.end])?);
    }

    splice_root(target, source, &[(target_styles.close.start, imported)])
}

/// Append numbering definitions from `source` with shifted ids.
///
/// Returns the merged part and the `numId` map for the source's body.
pub(crate) fn merge_numbering(target: &[u8], source: &[u8]) -> Result<(Vec<u8>, HashMap<u32, u32>)> {
    let target_numbering = children_of(target, &["w:numbering"])?;
    let source_numbering = children_of(source, &["w:numbering"])?;

    let max_of = |items: &[xml::Child], name: &[u8], key: &[u8]| {
        items
            .iter()
            .filter(|c| c.is(name))
            .filter_map(|c| c.attr(key).and_then(|v| v.parse::<u32>().ok()))
            .max()
    };
    let abstract_offset = max_of(&target_numbering.items, b"w:abstractNum", b"w:abstractNumId").map_or(0, |m| m + 1);
    // numId 0 means "no numbering", so live ids start at 1
    let num_offset = max_of(&target_numbering.items, b"w:num", b"w:numId").unwrap_or(0);

    let mut abstracts = Vec::new();
    let mut nums = Vec::new();
    let mut num_ids = HashMap::new();
    for child in &source_numbering.items {
        let raw = &source[child.span.start..child.span.end];
        if child.is(b"w:abstractNum") {
            abstracts.extend(offset_numbering(raw, abstract_offset, num_offset)?);
        } else if child.is(b"w:num") {
            if let Some(old) = child.attr(b"w:numId").and_then(|v| v.parse::<u32>().ok()) {
                num_ids.insert(old, old.saturating_add(num_offset));
            }
            nums.extend(offset_numbering(raw, abstract_offset, num_offset)?);
        }
    }

    // abstractNum elements precede every num element in the schema
    let items = &target_numbering.items;
    let abstract_at = items
        .iter()
        .find(|c| c.is(b"w:num") || c.is(b"w:numIdMacAtCleanup"))
        .map_or(target_numbering.close.start, |c| c.span.start);
    let num_at = items
        .iter()
        .rev()
        .find(|c| c.is(b"w:num"))
        .map_or(abstract_at, |c| c.span.end);

    let merged = splice_root(target, source, &[(abstract_at, abstracts), (num_at, nums)])?;
    Ok((merged, num_ids))
}

/// Append the `entry` elements (footnotes, endnotes or comments) of `source`
/// after those of `target`, numbered past the highest id `target` uses.
///
/// Entries carrying a `w:type` are separators owned by the base and are not
/// copied. Returns the merged part and the old -> new id map.
pub(crate) fn merge_annotations(
    target: &[u8],
    source: &[u8],
    root: &str,
    entry: &[u8],
    rewriter: &mut FragmentRewriter<'_>,
) -> Result<(Vec<u8>, HashMap<i64, i64>)> {
    let target_entries = children_of(target, &[root])?;
    let source_entries = children_of(source, &[root])?;
    let entry_id = |c: &xml::Child| c.attr(b"w:id").and_then(|v| v.parse::<i64>().ok());

    let mut next = target_entries
        .items
        .iter()
        .filter(|c| c.is(entry))
        .filter_map(entry_id)
        .max()
        .map_or(1, |max| max.saturating_add(1).max(1));

    let mut ids = HashMap::new();
    let mut imported = Vec::new();
    for child in source_entries.items.iter().filter(|c| c.is(entry)) {
        if child.attr(b"w:type").is_some() {
            continue;
        }
        let Some(old) = entry_id(child) else {
            continue;
        };
        let rewritten = rewriter.rewrite(&source[child.span.start..child.span.end])?;
        imported.extend(set_first_attr(&rewritten, b"w:id", &next.to_string())?);
        ids.insert(old, next);
        next += 1;
    }

    let merged = splice_root(target, source, &[(target_entries.close.start, imported)])?;
    Ok((merged, ids))
}

/// Insert fragments at ascending offsets of `target` and merge root namespaces
fn splice_root(target: &[u8], source: &[u8], inserts: &[(usize, Vec<u8>)]) -> Result<Vec<u8>> {
    let target_root = root_span(target)?;
    let source_root = root_span(source)?;
    let root_tag = merge_root_tags(
        &target[target_root.start..target_root.end],
        &source[source_root.start..source_root.end],
    )?;

    let extra: usize = inserts.iter().map(|(_, bytes)| bytes.len()).sum();
    let mut out = Vec::with_capacity(target.len() + extra + root_tag.len());
    out.extend_from_slice(&target[..target_root.start]);
    out.extend_from_slice(&root_tag);
    let mut cursor = target_root.end;
    for (at, bytes) in inserts {
        let at = (*at).max(cursor);
        out.extend_from_slice(&target[cursor..at]);
        out.extend_from_slice(bytes);
        cursor = at;
    }
    out.extend_from_slice(&target[cursor..]);
    Ok(out)
}
