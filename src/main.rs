use anyhow::Result;
use clap::Parser;
use event_counter::config::{
    CounterConfig, DEFAULT_MAX_KEYS_COUNT, DEFAULT_MAX_OPEN_SEGMENTS, DEFAULT_MAX_REJECTION_SAMPLES,
    JobConfig,
};
use event_counter::pipeline::run_job;
use log::{LevelFilter, error, info};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use time::macros::format_description;

#[derive(Parser)]
#[command(name = "event-counter")]
#[command(about = "Count valid events per (date, event name) in JSON Lines logs larger than memory")]
#[command(version)]
struct Cli {
    #[arg(short, long, help = "Events file or glob pattern (.gz/.zst are decompressed)")]
    events: String,

    #[arg(short, long, default_value = "report.txt", help = "Report output file")]
    report: PathBuf,

    #[arg(
        short,
        long,
        default_value = "resources/schema.toml",
        help = "Schema file (TOML, or JSON with a .json extension)"
    )]
    schema: PathBuf,

    #[arg(
        long,
        default_value_t = DEFAULT_MAX_KEYS_COUNT,
        help = "Distinct keys kept in memory before spilling to disk"
    )]
    max_keys_count: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_MAX_OPEN_SEGMENTS,
        help = "Segment readers open at once in the reduce phase (at least 2)"
    )]
    max_open_segments: usize,

    #[arg(long, help = "Directory for temporary spill files (system temp dir by default)")]
    spill_dir: Option<PathBuf>,

    #[arg(long, help = "Write a JSON summary of rejected records here")]
    rejections: Option<PathBuf>,

    #[arg(long, help = "Write run metrics as JSON here")]
    metrics: Option<PathBuf>,

    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
}

fn setup_logging(log_level_str: &str) -> Result<()> {
    let log_level = match log_level_str.to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        "OFF" => LevelFilter::Off,
        other => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", other);
            LevelFilter::Info
        }
    };

    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;

    Ok(())
}

impl Cli {
    fn job(self) -> JobConfig {
        JobConfig {
            events: self.events,
            report: self.report,
            schema: self.schema,
            rejections: self.rejections,
            metrics: self.metrics,
            counter: CounterConfig {
                max_keys_count: self.max_keys_count,
                max_open_segments: self.max_open_segments,
                spill_dir: self.spill_dir,
                max_rejection_samples: DEFAULT_MAX_REJECTION_SAMPLES,
            },
        }
    }
}

fn main() -> ExitCode {
    let start_time = Instant::now();
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli.log_level) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }
    info!("Starting event counter");

    let job = cli.job();
    match run_job(&job) {
        Ok(summary) => {
            info!(
                "{} lines read ({} blank), {} accepted, {}",
                summary.lines_read, summary.blank_lines, summary.accepted, summary.rejections
            );
            info!(
                "{} segments spilled, {} intermediate merge passes, {} report rows",
                summary.segments_spilled, summary.merge_passes, summary.report_rows
            );
            info!(
                "Finished in {:.2?}; report written to {}",
                start_time.elapsed(),
                job.report.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
