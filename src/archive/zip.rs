//! Native ZIP extraction

use super::{read_limited, sanitize_entry_path, ExtractContext, ExtractError, ExtractStrategy, RawEntry};
use rayon::prelude::*;
use std::io::Cursor;
use tracing::warn;
use zip::ZipArchive;

const FORMAT: &str = "zip";

/// Local file header, empty archive and spanned archive markers
const SIGNATURES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];

/// ZIP archives, decompressed in parallel on the rayon pool
pub struct ZipStrategy;

impl ExtractStrategy for ZipStrategy {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn matches_signature(&self, bytes: &[u8]) -> bool {
        SIGNATURES.iter().any(|sig| bytes.starts_with(sig))
    }

    fn handles_extension(&self, ext: &str) -> bool {
        ext == "zip"
    }

    fn extract(&self, bytes: &[u8], ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
        let archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::corrupt(FORMAT, e))?;

        if is_docx_package(&archive) {
            return Err(ExtractError::NotAnArchive("DOCX"));
        }
        // directory entries are not members
        let files = archive.file_names().filter(|name| !name.ends_with('/')).count();
        if files > ctx.limits.max_members {
            return Err(ExtractError::TooManyMembers {
                limit: ctx.limits.max_members,
            });
        }

        let limit = ctx.limits.max_member_bytes;
        let results: Vec<Result<Option<RawEntry>, ExtractError>> = (0..archive.len())
            .into_par_iter()
            .map_init(|| archive.clone(), |archive, index| read_entry(archive, index, limit))
            .collect();

        // first failure in listing order wins; no partial set escapes
        results.into_iter().filter_map(Result::transpose).collect()
    }
}

/// A DOCX upload is a zip too; it must not be mistaken for an archive of members
fn is_docx_package<R>(archive: &ZipArchive<R>) -> bool
where
    R: std::io::Read + std::io::Seek,
{
    let mut content_types = false;
    let mut document = false;
    for name in archive.file_names() {
        match name {
            "[Content_Types].xml" => content_types = true,
            "word/document.xml" => document = true,
            _ => {}
        }
    }
    content_types && document
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
    limit: u64,
) -> Result<Option<RawEntry>, ExtractError> {
    let file = archive
        .by_index(index)
        .map_err(|e| ExtractError::corrupt(FORMAT, format!("entry #{index}: {e}")))?;
    if file.is_dir() {
        return Ok(None);
    }

    let raw_name = file.name().to_string();
    let Some(path) = sanitize_entry_path(&raw_name) else {
        warn!(entry = %raw_name, "Skipping zip entry with an unusable path");
        return Ok(None);
    };
    if file.size() > limit {
        return Err(ExtractError::MemberTooLarge { name: path, limit });
    }

    let bytes = read_limited(file, FORMAT, &path, limit)?;
    Ok(Some(RawEntry::new(path, bytes)))
}
