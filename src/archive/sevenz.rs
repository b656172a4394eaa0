//! Native 7z extraction

use super::{read_limited, sanitize_entry_path, ExtractContext, ExtractError, ExtractStrategy, RawEntry};
use sevenz_rust::{Password, SevenZReader};
use std::io::Cursor;
use tracing::warn;

const FORMAT: &str = "7z";
const SIGNATURE: &[u8] = &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C];

/// 7z archives via `sevenz-rust`
pub struct SevenZipStrategy;

impl ExtractStrategy for SevenZipStrategy {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn matches_signature(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(SIGNATURE)
    }

    fn handles_extension(&self, ext: &str) -> bool {
        ext == "7z"
    }

    fn extract(&self, bytes: &[u8], ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
        let mut reader = SevenZReader::new(Cursor::new(bytes), bytes.len() as u64, Password::empty())
            .map_err(archive_error)?;

        let limits = ctx.limits;
        let mut entries = Vec::new();
        let mut failure: Option<ExtractError> = None;

        reader
            .for_each_entries(|entry, data| {
                if entry.is_directory() {
                    return Ok(true);
                }
                let Some(path) = sanitize_entry_path(entry.name()) else {
                    warn!(entry = %entry.name(), "Skipping 7z entry with an unusable path");
                    if let Err(e) = std::io::copy(data, &mut std::io::sink()) {
                        failure = Some(ExtractError::corrupt(FORMAT, e));
                        return Ok(false);
                    }
                    return Ok(true);
                };
                if entries.len() >= limits.max_members {
                    failure = Some(ExtractError::TooManyMembers {
                        limit: limits.max_members,
                    });
                    return Ok(false);
                }
                if entry.size() > limits.max_member_bytes {
                    failure = Some(ExtractError::MemberTooLarge {
                        name: path,
                        limit: limits.max_member_bytes,
                    });
                    return Ok(false);
                }
                match read_limited(data, FORMAT, &path, limits.max_member_bytes) {
                    Ok(bytes) => {
                        entries.push(RawEntry::new(path, bytes));
                        Ok(true)
                    }
                    Err(e) => {
                        failure = Some(e);
                        Ok(false)
                    }
                }
            })
            .map_err(archive_error)?;

        match failure {
            Some(err) => Err(err),
            None => Ok(entries),
        }
    }
}

fn archive_error(err: sevenz_rust::Error) -> ExtractError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractError::corrupt(FORMAT, "archive is password-protected")
    } else {
        ExtractError::corrupt(FORMAT, message)
    }
}
