mod annotate;
mod config;
mod diagnostics;
mod reference;

use annotate::{AnnotationReport, Annotator};
use anyhow::Result;
use clap::Parser;
use config::{Config, Preset};
use diagnostics::{count_by_kind, DiagnosticKind, DiagnosticSeverity};
use log::{debug, info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "opnote")]
#[command(author, version, about = "Annotate x86 emulator dispatch code with opcode descriptions", long_about = None)]
struct Args {
    /// XML opcode reference (ref.x86asm.net edition)
    reference: Option<PathBuf>,

    /// Emulator source to annotate
    target: Option<PathBuf>,

    /// Where to write the annotated copy
    output: Option<PathBuf>,

    /// Config file to load instead of the default lookup
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dispatch layout of the target
    #[arg(short, long, value_enum)]
    preset: Option<Preset>,

    /// First line index of the one-byte dispatch block
    #[arg(long)]
    onebyte_start: Option<usize>,

    /// First line index of the two-byte dispatch block
    #[arg(long)]
    twobyte_start: Option<usize>,

    /// Line index just past the two-byte dispatch block
    #[arg(long)]
    twobyte_end: Option<usize>,

    /// Skip writing the JSON opcode tables
    #[arg(long)]
    no_dump: bool,

    /// Write the effective configuration to a file and exit
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(reference) = self.reference {
            config.paths.reference = reference;
        }
        if let Some(target) = self.target {
            config.paths.target = target;
        }
        if let Some(output) = self.output {
            config.paths.output = output;
        }
        if let Some(preset) = self.preset {
            config.preset = preset;
        }
        if let Some(start) = self.onebyte_start {
            config.windows.onebyte_start = start;
        }
        if let Some(start) = self.twobyte_start {
            config.windows.twobyte_start = start;
        }
        if let Some(end) = self.twobyte_end {
            config.windows.twobyte_end = end;
        }
        if self.no_dump {
            config.dump = false;
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    let write_config = args.write_config.clone();
    args.apply(&mut config);

    if let Some(path) = write_config {
        config.save(&path)?;
        println!("Wrote config: {}", path.display());
        return Ok(());
    }

    debug!("{:?}", config);
    let windows = config.windows.to_windows()?;

    let reference = reference::load_reference(&config.paths.reference)?;
    if reference.one_byte.is_empty() || reference.two_byte.is_empty() {
        warn!(
            "Reference has an empty opcode table ({} one-byte, {} two-byte)",
            reference.one_byte.len(),
            reference.two_byte.len()
        );
    }
    if config.dump {
        reference.dump(&config.paths.one_byte_dump, &config.paths.two_byte_dump)?;
    }

    let annotator = Annotator::new(
        &reference,
        config.preset.indent(),
        config.preset.transform(),
        windows,
    )?;
    let report = annotate::annotate_file(&annotator, &config.paths.target, &config.paths.output)?;

    for diag in &report.diagnostics {
        match diag.severity {
            DiagnosticSeverity::Warning => warn!("{}", diag),
            DiagnosticSeverity::Info => info!("{}", diag),
        }
    }

    info!("{} -> {}", summary(&report), config.paths.output.display());
    Ok(())
}

fn summary(report: &AnnotationReport) -> String {
    format!(
        "Annotated {} of {} case lines ({} one-byte, {} two-byte) across {} lines; {} lookup misses, {} wide literals",
        report.annotated(),
        report.one_byte.matched + report.two_byte.matched,
        report.one_byte.annotated,
        report.two_byte.annotated,
        report.lines,
        report.misses(),
        count_by_kind(&report.diagnostics, DiagnosticKind::WideLiteral),
    )
}
