use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::analyze::AnalyzeCommandOptions;
use crate::commands::chats::ChatsCommandOptions;
use crate::commands::locate::LocateCommandOptions;
use crate::commands::reanalyze::ReanalyzeCommandOptions;
use crate::commands::run::RunCommandOptions;
use crate::commands::search::SearchCommandOptions;
use crate::commands::segment::SegmentCommandOptions;
use crate::commands::status::StatusCommandOptions;
use crate::commands::stop::StopCommandOptions;
use crate::commands::summarize::SummarizeCommandOptions;
use crate::commands::{self, CommandReport};
use crate::forensic::config::{DetectionStrategy, GeocoderKind};
use crate::forensic::filter::DEFAULT_MAX_SEGMENTS;
use crate::forensic::progress::ProgressMode;
use crate::logging::{self, Verbosity};

/// Forensic analysis of exported chat transcripts with a language model.
#[derive(Debug, Parser)]
#[command(name = "chatsift", version, about)]
pub struct Cli {
    /// Print the command report as JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Progress rendering on stderr: human, json or off.
    #[arg(long, global = true, value_parser = parse_progress, default_value = "human")]
    pub progress: ProgressMode,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct SegmentArgs {
    /// Chat export: .pdf, .json page array, or form-feed separated text.
    #[arg(long)]
    pub input: PathBuf,

    /// Case output directory.
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long)]
    pub max_chars: Option<usize>,

    /// Attach images referenced by the export to analysis requests.
    #[arg(long)]
    pub media: bool,

    /// Directory holding the unpacked `EXTRACTION_*` media folders.
    #[arg(long)]
    pub media_root: Option<PathBuf>,
}

impl SegmentArgs {
    fn options(&self) -> SegmentCommandOptions {
        SegmentCommandOptions {
            input: self.input.clone(),
            out: self.out.clone(),
            max_chars: self.max_chars,
            media: self.media || self.media_root.is_some(),
            media_root: self.media_root.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Split an export into page-aligned segments.
    Segment(SegmentArgs),

    /// Analyze every segment, resuming from stored analyses.
    Analyze {
        #[arg(long)]
        out: PathBuf,
        /// Replace the default analysis prompt with the contents of this file.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        /// Re-analyze segments that already have an analysis.
        #[arg(long)]
        force: bool,
        /// Re-analyze segments whose previous analysis failed.
        #[arg(long)]
        retry_errors: bool,
    },

    /// Aggregate stored analyses into the final report.
    Summarize {
        #[arg(long)]
        out: PathBuf,
        /// Analyses above this count are summarized in groups first.
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Segment, analyze and summarize in one pass.
    Run {
        #[command(flatten)]
        segment: SegmentArgs,
        #[arg(long)]
        prompt_file: Option<PathBuf>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        retry_errors: bool,
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Detect individual chats, merge duplicates and write per-chat reports.
    Chats {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_parser = parse_strategy)]
        strategy: Option<DetectionStrategy>,
        /// Stop after writing the chat index.
        #[arg(long)]
        detect_only: bool,
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Answer a question over the stored analyses.
    Search {
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Extract and geocode places mentioned in the export.
    Locate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_parser = parse_geocoder)]
        geocoder: Option<GeocoderKind>,
        /// Also infer implicit places from earlier context.
        #[arg(long)]
        context_deduction: bool,
        /// Drop mentions scored below this (0-100).
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        min_confidence: Option<u8>,
        /// Only scan the first K segments.
        #[arg(long)]
        test_segments: Option<usize>,
    },

    /// Re-analyze keyword-matching segments with a custom prompt.
    Reanalyze {
        #[arg(long)]
        out: PathBuf,
        /// Comma-separated keywords, matched case-insensitively.
        #[arg(long)]
        keywords: String,
        /// Require every keyword instead of any.
        #[arg(long)]
        match_all: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_SEGMENTS)]
        max_segments: usize,
        #[arg(long)]
        prompt_file: PathBuf,
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Show effective configuration and case state.
    Status {
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Ask a running job on a case to stop.
    Stop {
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_progress(raw: &str) -> std::result::Result<ProgressMode, String> {
    ProgressMode::parse(raw)
        .ok_or_else(|| format!("unknown progress mode `{raw}`; use human, json or off"))
}

fn parse_strategy(raw: &str) -> std::result::Result<DetectionStrategy, String> {
    DetectionStrategy::parse(raw)
        .ok_or_else(|| format!("unknown strategy `{raw}`; use pattern or llm"))
}

fn parse_geocoder(raw: &str) -> std::result::Result<GeocoderKind, String> {
    GeocoderKind::parse(raw)
        .ok_or_else(|| format!("unknown geocoder `{raw}`; use nominatim or google"))
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let state = if report.ok { "ok" } else { "failed" };
    println!("{} {state}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

fn dispatch(command: &Command, progress: ProgressMode) -> Result<CommandReport> {
    match command {
        Command::Segment(args) => commands::segment::run(&args.options()),
        Command::Analyze {
            out,
            prompt_file,
            force,
            retry_errors,
        } => commands::analyze::run(&AnalyzeCommandOptions {
            out: out.clone(),
            prompt_file: prompt_file.clone(),
            force: *force,
            retry_errors: *retry_errors,
            progress,
        }),
        Command::Summarize { out, threshold } => {
            commands::summarize::run(&SummarizeCommandOptions {
                out: out.clone(),
                threshold: *threshold,
                progress,
            })
        }
        Command::Run {
            segment,
            prompt_file,
            force,
            retry_errors,
            threshold,
        } => commands::run::run(&RunCommandOptions {
            segment: segment.options(),
            prompt_file: prompt_file.clone(),
            force: *force,
            retry_errors: *retry_errors,
            threshold: *threshold,
            progress,
        }),
        Command::Chats {
            out,
            strategy,
            detect_only,
            threshold,
        } => commands::chats::run(&ChatsCommandOptions {
            out: out.clone(),
            strategy: *strategy,
            detect_only: *detect_only,
            threshold: *threshold,
            progress,
        }),
        Command::Search {
            out,
            query,
            threshold,
        } => commands::search::run(&SearchCommandOptions {
            out: out.clone(),
            query: query.clone(),
            threshold: *threshold,
            progress,
        }),
        Command::Locate {
            out,
            geocoder,
            context_deduction,
            min_confidence,
            test_segments,
        } => commands::locate::run(&LocateCommandOptions {
            out: out.clone(),
            geocoder: *geocoder,
            context_deduction: *context_deduction,
            min_confidence: *min_confidence,
            test_segments: *test_segments,
            progress,
        }),
        Command::Reanalyze {
            out,
            keywords,
            match_all,
            max_segments,
            prompt_file,
            threshold,
        } => commands::reanalyze::run(&ReanalyzeCommandOptions {
            out: out.clone(),
            keywords: keywords.clone(),
            match_all: *match_all,
            max_segments: *max_segments,
            prompt_file: prompt_file.clone(),
            threshold: *threshold,
            progress,
        }),
        Command::Status { out } => {
            commands::status::run(&StatusCommandOptions { out: out.clone() })
        }
        Command::Stop { out } => commands::stop::run(&StopCommandOptions { out: out.clone() }),
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = if cli.verbose {
        Verbosity::Verbose
    } else if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };
    logging::init(verbosity);

    let report = dispatch(&cli.command, cli.progress)?;
    print_report(&report, cli.json)?;
    if !report.ok {
        bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
