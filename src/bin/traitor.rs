use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use traitor::{
    Job, JobConfig, JobError, JobReport, LineArchiveReader, OverflowPolicy, TermCountAnalyzer,
};

/// Count traitors across a sample of a web-archive crawl.
#[derive(Parser, Debug)]
#[command(name = "traitor", version)]
struct Args {
    /// Input root: directory, file, or glob pattern
    #[arg(long = "in")]
    input: PathBuf,
    /// Output directory
    #[arg(long = "out")]
    output: PathBuf,
    /// JSON file with configuration overrides
    #[arg(long = "conf")]
    conf: Option<PathBuf>,
    /// Replace the output directory if it exists
    #[arg(long)]
    overwrite: bool,
    /// Process at most this many input files (0 = all)
    #[arg(long = "maxfiles")]
    max_files: Option<u64>,
    /// Number of aggregator workers and output partitions
    #[arg(long = "numreducers")]
    num_reducers: Option<usize>,
    /// Compress output partitions
    #[arg(long)]
    compress: bool,
    /// Output codec used with --compress (gzip, zstd)
    #[arg(long)]
    codec: Option<String>,
    /// Worker threads (1 = sequential)
    #[arg(long)]
    threads: Option<usize>,
    /// Overflow handling: saturate, drop, or fail
    #[arg(long, value_parser = parse_overflow)]
    overflow: Option<OverflowPolicy>,
    /// Write the final counters to this file as JSON
    #[arg(long = "metrics-out")]
    metrics_out: Option<PathBuf>,
}

fn parse_overflow(s: &str) -> Result<OverflowPolicy, String> {
    match s.to_ascii_lowercase().as_str() {
        "saturate" => Ok(OverflowPolicy::Saturate),
        "drop" => Ok(OverflowPolicy::Drop),
        "fail" => Ok(OverflowPolicy::Fail),
        other => Err(format!("unknown overflow policy '{other}'")),
    }
}

/// Defaults, then the override file, then explicit flags.
fn build_config(args: &Args) -> Result<JobConfig, JobError> {
    let mut cfg = JobConfig::new(&args.input, &args.output);
    if let Some(conf) = &args.conf {
        cfg.apply_overrides_file(conf)?;
    }
    if args.overwrite {
        cfg.overwrite = true;
    }
    if args.compress {
        cfg.compress = true;
    }
    if let Some(n) = args.max_files {
        cfg.max_files = n;
    }
    if let Some(n) = args.num_reducers {
        cfg.num_reducers = n;
    }
    if let Some(codec) = &args.codec {
        cfg.codec.clone_from(codec);
    }
    if let Some(n) = args.threads {
        cfg.threads = Some(n);
    }
    if let Some(policy) = args.overflow {
        cfg.overflow_policy = policy;
    }
    Ok(cfg)
}

fn run(args: &Args) -> Result<JobReport, JobError> {
    let mut job = Job::new(build_config(args)?)?;
    let report = job.run(Arc::new(LineArchiveReader), Arc::new(TermCountAnalyzer))?;
    report.metrics.print();
    if let Some(path) = &args.metrics_out {
        report.metrics.save_to_file(path)?;
    }
    Ok(report)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    match run(&args) {
        Ok(report) => {
            if !report.failed_files.is_empty() {
                eprintln!("warning: {} input file(s) could not be read", report.failed_files.len());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("traitor: {e}");
            if e.is_config() {
                eprintln!("run `traitor --help` for usage");
            }
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
