//! Native tar and gzip-compressed tar extraction

use super::{read_limited, sanitize_entry_path, ExtractContext, ExtractError, ExtractStrategy, RawEntry};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::warn;

const FORMAT: &str = "tar";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const USTAR_OFFSET: usize = 257;

/// tar, tar.gz and tgz archives
pub struct TarStrategy;

impl ExtractStrategy for TarStrategy {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn matches_signature(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(GZIP_MAGIC) || is_ustar(bytes)
    }

    fn handles_extension(&self, ext: &str) -> bool {
        matches!(ext, "tar" | "tar.gz" | "tgz" | "gz")
    }

    fn extract(&self, bytes: &[u8], ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
        if bytes.starts_with(GZIP_MAGIC) {
            let budget = ctx
                .limits
                .max_member_bytes
                .saturating_mul(ctx.limits.max_members as u64);
            let tarball = read_limited(GzDecoder::new(bytes), "tar.gz", "gzip stream", budget)?;
            if !is_ustar(&tarball) {
                return Err(ExtractError::corrupt(
                    "tar.gz",
                    "gzip stream does not contain a tar archive",
                ));
            }
            read_entries(Cursor::new(tarball), ctx)
        } else {
            read_entries(bytes, ctx)
        }
    }
}

fn is_ustar(bytes: &[u8]) -> bool {
    bytes
        .get(USTAR_OFFSET..USTAR_OFFSET + 5)
        .is_some_and(|magic| magic == b"ustar")
}

fn read_entries<R: Read>(reader: R, ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
    let limits = ctx.limits;
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries().map_err(|e| ExtractError::corrupt(FORMAT, e))? {
        let entry = entry.map_err(|e| ExtractError::corrupt(FORMAT, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw_name = entry
            .path()
            .map_err(|e| ExtractError::corrupt(FORMAT, e))?
            .to_string_lossy()
            .into_owned();
        let Some(path) = sanitize_entry_path(&raw_name) else {
            warn!(entry = %raw_name, "Skipping tar entry with an unusable path");
            continue;
        };
        if entries.len() >= limits.max_members {
            return Err(ExtractError::TooManyMembers {
                limit: limits.max_members,
            });
        }
        let size = entry.size();
        if size > limits.max_member_bytes {
            return Err(ExtractError::MemberTooLarge {
                name: path,
                limit: limits.max_member_bytes,
            });
        }
        let bytes = read_limited(entry, FORMAT, &path, limits.max_member_bytes)?;
        if (bytes.len() as u64) < size {
            return Err(ExtractError::corrupt(
                FORMAT,
                format!("{path}: truncated after {} of {size} bytes", bytes.len()),
            ));
        }
        entries.push(RawEntry::new(path, bytes));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ExtractLimits;
    use crate::test_utils::{tar_bytes, tar_gz_bytes};

    fn run(bytes: &[u8]) -> Result<Vec<RawEntry>, ExtractError> {
        let dir = tempfile::tempdir().unwrap();
        TarStrategy.extract(
            bytes,
            &ExtractContext {
                scratch: dir.path(),
                limits: ExtractLimits::default(),
            },
        )
    }

    // TC-TAR-001: Plain tar in listing order
    #[test]
    fn test_plain_tar() {
        let bytes = tar_bytes(&[("b/part2.pdf", b"two"), ("a/part1.pdf", b"one")]);
        assert!(TarStrategy.matches_signature(&bytes));
        let entries = run(&bytes).unwrap();
        assert_eq!(entries[0], RawEntry::new("b/part2.pdf", b"two".to_vec()));
        assert_eq!(entries[1], RawEntry::new("a/part1.pdf", b"one".to_vec()));
    }

    // TC-TAR-002: Gzip-compressed tar
    #[test]
    fn test_tar_gz() {
        let bytes = tar_gz_bytes(&[("part1.docx", b"docx")]);
        let entries = run(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "part1.docx");
    }

    // TC-TAR-003: Gzip of something other than tar
    #[test]
    fn test_gzip_without_tar() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        std::io::Write::write_all(&mut encoder, b"just some text").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(run(&bytes).unwrap_err(), ExtractError::Corrupt { .. }));
    }

    // TC-TAR-004: Truncated tar
    #[test]
    fn test_truncated_tar() {
        let bytes = tar_bytes(&[("part1.pdf", &[1u8; 2048])]);
        let truncated = &bytes[..1024];
        assert!(TarStrategy.matches_signature(truncated));
        assert!(matches!(run(truncated).unwrap_err(), ExtractError::Corrupt { .. }));
    }
}
