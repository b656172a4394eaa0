//! CLI argument definitions and console progress

use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use crate::classify::DocumentKind;
use crate::merge::SectionBreak;
use crate::pipeline::{MergeRequest, ProgressCallback};

/// Archive-aware PDF/DOCX merger
#[derive(Debug, Parser)]
#[command(name = "docmerge", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: <config dir>/docmerge/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Default tracing filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "docmerge=warn";
        }
        match self.verbose {
            0 => "docmerge=info",
            1 => "docmerge=debug",
            _ => "docmerge=trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Merge the documents inside an archive into one file
    Merge(MergeArgs),

    /// Print the resolved member order without merging
    Order(OrderArgs),

    /// Run the HTTP merge service
    #[cfg(feature = "web")]
    Serve(ServeArgs),

    /// Remove scratch directories left behind by crashed jobs
    Sweep(SweepArgs),
}

/// Arguments for `docmerge merge`
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Archive containing the documents
    pub archive: PathBuf,

    /// Output file, or directory to write into (default: current directory)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Output file name; the document extension is appended when missing
    #[arg(long)]
    pub name: Option<String>,

    /// Expected document type of the members
    #[arg(long = "type", value_enum, value_name = "TYPE")]
    pub doc_type: Option<DocumentKind>,

    /// Archive format hint such as "rar" or "tar.gz" (default: archive file name)
    #[arg(long, value_name = "EXT")]
    pub format_hint: Option<String>,

    /// How appended DOCX members start
    #[arg(long, value_enum)]
    pub section_break: Option<SectionBreak>,

    /// Write a JSON report next to the output
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl MergeArgs {
    /// Format hint passed to the extractor
    pub fn format_hint(&self) -> Option<String> {
        self.format_hint.clone().or_else(|| {
            self.archive
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
    }

    fn output_is_dir(&self) -> bool {
        self.output.as_ref().is_some_and(|p| p.is_dir())
    }

    /// Build a pipeline request around the archive bytes
    pub fn to_request(&self, archive: Vec<u8>) -> MergeRequest {
        let output_name = self.name.clone().or_else(|| {
            self.output
                .as_ref()
                .filter(|_| !self.output_is_dir())
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        });

        MergeRequest {
            archive,
            archive_name: self.format_hint(),
            output_name,
            declared_type: self.doc_type,
            section_break: self.section_break,
        }
    }

    /// Where the artifact named `file_name` is written
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        match &self.output {
            Some(dir) if self.output_is_dir() => dir.join(file_name),
            Some(path) => path.with_file_name(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

/// Arguments for `docmerge order`
#[derive(Debug, Args)]
pub struct OrderArgs {
    /// Archive containing the documents
    pub archive: PathBuf,

    /// Expected document type of the members
    #[arg(long = "type", value_enum, value_name = "TYPE")]
    pub doc_type: Option<DocumentKind>,

    /// Archive format hint (default: archive file name)
    #[arg(long, value_name = "EXT")]
    pub format_hint: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `docmerge serve`
#[cfg(feature = "web")]
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Listen address (overrides config and DOCMERGE_BIND)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Arguments for `docmerge sweep`
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Minimum age of directories to remove
    #[arg(long, value_name = "SECS")]
    pub max_age_secs: Option<u64>,

    /// Scratch root to sweep (default: configured scratch root)
    #[arg(long, value_name = "PATH")]
    pub root: Option<PathBuf>,
}

// ============================================================
// Console progress
// ============================================================

/// Spinner on stderr driven by pipeline progress
pub struct ConsoleProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: u8, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };
        Self {
            bar,
            verbose: verbose > 0,
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_step_start(&self, step: &str) {
        self.bar.set_message(step.to_string());
    }

    fn on_step_progress(&self, _current: usize, _total: usize) {
        self.bar.tick();
    }

    fn on_step_complete(&self, step: &str, message: &str) {
        self.bar.println(format!("✓ {step}: {message}"));
    }

    fn on_debug(&self, message: &str) {
        if self.verbose {
            self.bar.println(format!("  {message}"));
        }
    }
}
