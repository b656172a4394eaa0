//! docmerge CLI entry point

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docmerge::cli::{Cli, Commands, ConsoleProgress, MergeArgs, OrderArgs, SweepArgs};
use docmerge::{
    sweep_stale, DocumentKind, MergeConfig, MergeError, MergePipeline, MergeRequest, SilentProgress, WarningReport,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<MergeError>()
                .map_or(1, |e| e.kind().exit_code());
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = MergeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Merge(args) => run_merge(config, &args, cli.verbose, cli.quiet),
        Commands::Order(args) => run_order(config, &args),
        #[cfg(feature = "web")]
        Commands::Serve(args) => run_serve(config, args),
        Commands::Sweep(args) => run_sweep(&config, &args, cli.quiet),
    }
}

fn read_archive(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read archive {}", path.display()))
}

fn run_merge(config: MergeConfig, args: &MergeArgs, verbose: u8, quiet: bool) -> Result<()> {
    let archive = read_archive(&args.archive)?;
    let pipeline = MergePipeline::new(config)?;

    let progress = ConsoleProgress::new(verbose, quiet);
    let result = pipeline.run(args.to_request(archive), &progress);
    progress.finish();
    let result = result?;

    let output = args.output_path(&result.file_name);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    std::fs::write(&output, &result.artifact)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    for warning in &result.warnings {
        eprintln!("warning[{}]: {}", warning.code(), warning);
    }

    if let Some(report_path) = &args.report {
        let json = serde_json::to_string_pretty(&result.report())?;
        std::fs::write(report_path, json)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
    }

    if !quiet {
        let count = match (result.page_count, result.section_count) {
            (Some(pages), _) => format!("{pages} pages"),
            (None, Some(sections)) => format!("{sections} sections"),
            (None, None) => String::new(),
        };
        println!(
            "{} ({} members, {}, {} bytes)",
            output.display(),
            result.member_count,
            count,
            result.byte_size()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct OrderReport {
    archive_format: &'static str,
    kind: DocumentKind,
    members: Vec<docmerge::pipeline::PlanEntry>,
    warnings: Vec<WarningReport>,
}

fn run_order(config: MergeConfig, args: &OrderArgs) -> Result<()> {
    let archive = read_archive(&args.archive)?;
    let pipeline = MergePipeline::new(config)?;

    let mut request = MergeRequest::new(archive);
    request.archive_name = args
        .format_hint
        .clone()
        .or_else(|| args.archive.file_name().map(|n| n.to_string_lossy().into_owned()));
    request.declared_type = args.doc_type;

    let plan = pipeline.plan(&request, &SilentProgress)?;

    if args.json {
        let report = OrderReport {
            archive_format: plan.archive_format,
            kind: plan.kind,
            members: plan.entries(),
            warnings: plan.warnings.iter().map(|w| w.to_report()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} archive, {} {} members", plan.archive_format, plan.members.len(), plan.kind);
    for member in &plan.members {
        println!("{:>4}  {:<12}  {}", member.position() + 1, member.key().to_string(), member.name());
    }
    for warning in &plan.warnings {
        println!("warning[{}]: {}", warning.code(), warning);
    }
    Ok(())
}

#[cfg(feature = "web")]
fn run_serve(mut config: MergeConfig, args: docmerge::cli::ServeArgs) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(docmerge::web::serve(config))?;
    Ok(())
}

fn run_sweep(config: &MergeConfig, args: &SweepArgs, quiet: bool) -> Result<()> {
    let root = args.root.clone().unwrap_or_else(|| config.scratch.root.clone());
    let max_age = Duration::from_secs(args.max_age_secs.unwrap_or(config.scratch.stale_after_secs));

    let report = sweep_stale(&root, max_age)
        .with_context(|| format!("Failed to sweep scratch root {}", root.display()))?;
    if !quiet {
        println!(
            "Removed {} stale scratch directories from {} ({} kept, {} failed)",
            report.removed.len(),
            root.display(),
            report.kept,
            report.failed
        );
    }
    Ok(())
}
