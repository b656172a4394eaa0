//! Extraction through system tools (rar and generic formats)
//!
//! The payload is written into the job scratch directory, the first available
//! tool unpacks it into `out/`, and the tree is read back. Without any tool on
//! `PATH` the format is reported as unsupported instead of failing mid-job.

use super::{read_limited, sanitize_entry_path, ExtractContext, ExtractError, ExtractStrategy, RawEntry};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};
use walkdir::WalkDir;

const RAR_SIGNATURES: &[&[u8]] = &[b"Rar!\x1a\x07"];

const GENERIC_SIGNATURES: &[&[u8]] = &[
    b"BZh",                              // bzip2
    &[0xFD, b'7', b'z', b'X', b'Z', 0x00], // xz
    &[0x28, 0xB5, 0x2F, 0xFD],           // zstd
    b"MSCF",                             // cab
    &[0x60, 0xEA],                       // arj
];

const GENERIC_EXTENSIONS: &[&str] = &[
    "bz2", "tbz", "tbz2", "tar.bz2", "xz", "txz", "tar.xz", "zst", "tar.zst", "cab", "arj",
    "lzh", "lha", "iso", "cpio",
];

/// Archive format handled by an external extraction tool
pub struct ExternalToolStrategy {
    format: &'static str,
    signatures: &'static [&'static [u8]],
    extensions: &'static [&'static str],
    tools: Vec<String>,
}

impl ExternalToolStrategy {
    /// RAR4/RAR5 archives
    pub fn rar(tools: Vec<String>) -> Self {
        Self {
            format: "rar",
            signatures: RAR_SIGNATURES,
            extensions: &["rar"],
            tools,
        }
    }

    /// bzip2, xz, zstd, cab and other formats a general-purpose unpacker knows
    pub fn generic(tools: Vec<String>) -> Self {
        Self {
            format: "generic",
            signatures: GENERIC_SIGNATURES,
            extensions: GENERIC_EXTENSIONS,
            tools,
        }
    }

    /// First configured tool with a known invocation that resolves on `PATH`
    fn resolve_tool(&self) -> Option<(String, PathBuf)> {
        self.tools
            .iter()
            .filter(|tool| invocation_kind(tool).is_some())
            .find_map(|tool| which::which(tool).ok().map(|path| (tool.clone(), path)))
    }

    fn unavailable(&self) -> ExtractError {
        ExtractError::ToolUnavailable {
            format: self.format,
            tried: self.tools.clone(),
        }
    }
}

impl ExtractStrategy for ExternalToolStrategy {
    fn format(&self) -> &'static str {
        self.format
    }

    fn matches_signature(&self, bytes: &[u8]) -> bool {
        self.signatures.iter().any(|sig| bytes.starts_with(sig))
    }

    fn handles_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext)
    }

    fn extract(&self, bytes: &[u8], ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
        let Some((tool, program)) = self.resolve_tool() else {
            return Err(self.unavailable());
        };

        let work = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(ctx.scratch)?;
        let input = work.path().join(format!("input.{}", self.format));
        let out_dir = work.path().join("out");
        fs::write(&input, bytes)?;
        fs::create_dir(&out_dir)?;

        let Some(mut command) = tool_command(&tool, &program, &input, &out_dir) else {
            return Err(self.unavailable());
        };
        debug!(tool = %tool, format = self.format, "Running external extractor");

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    self.unavailable()
                } else {
                    ExtractError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lower = stderr.to_lowercase();
            let detail = if lower.contains("password") || lower.contains("encrypted") {
                "archive is password-protected".to_string()
            } else {
                format!("{tool} exited with {}: {}", output.status, stderr.trim())
            };
            return Err(ExtractError::corrupt(self.format, detail));
        }

        read_tree(&out_dir, self.format, ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invocation {
    Unrar,
    Unar,
    SevenZip,
    Bsdtar,
}

fn invocation_kind(tool: &str) -> Option<Invocation> {
    let name = Path::new(tool).file_stem()?.to_str()?;
    match name {
        "unrar" => Some(Invocation::Unrar),
        "unar" => Some(Invocation::Unar),
        "7z" | "7za" | "7zz" => Some(Invocation::SevenZip),
        "bsdtar" => Some(Invocation::Bsdtar),
        _ => None,
    }
}

fn tool_command(tool: &str, program: &Path, input: &Path, out_dir: &Path) -> Option<Command> {
    let mut command = Command::new(program);
    match invocation_kind(tool)? {
        Invocation::Unrar => {
            // -p- never prompts for a password
            command
                .args(["x", "-y", "-o+", "-p-", "-idq"])
                .arg(input)
                .arg(format!("{}/", out_dir.display()));
        }
        Invocation::Unar => {
            command.args(["-q", "-f", "-D", "-o"]).arg(out_dir).arg(input);
        }
        Invocation::SevenZip => {
            command
                .args(["x", "-y", "-bd"])
                .arg(format!("-o{}", out_dir.display()))
                .arg(input);
        }
        Invocation::Bsdtar => {
            command.arg("-x").arg("-f").arg(input).arg("-C").arg(out_dir);
        }
    }
    Some(command)
}

/// Read back an unpacked tree in path order
fn read_tree(root: &Path, format: &'static str, ctx: &ExtractContext<'_>) -> Result<Vec<RawEntry>, ExtractError> {
    let limits = ctx.limits;
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ExtractError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let raw_name = relative.to_string_lossy().into_owned();
        let Some(path) = sanitize_entry_path(&raw_name) else {
            warn!(entry = %raw_name, "Skipping extracted file with an unusable path");
            continue;
        };
        if entries.len() >= limits.max_members {
            return Err(ExtractError::TooManyMembers {
                limit: limits.max_members,
            });
        }
        let file = fs::File::open(entry.path())?;
        let bytes = read_limited(file, format, &path, limits.max_member_bytes)?;
        entries.push(RawEntry::new(path, bytes));
    }

    Ok(entries)
}
