use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use oomwatch::analysis::{AnalysisService, HeapReport, RunningInfo, write_report};
use oomwatch::config::{Config, load_config, load_config_from_path};
use oomwatch::format::format_bytes;
use oomwatch::heap::JsonHeapIndexer;
use oomwatch::logging::{LogFormat, init_tracing};
use oomwatch::monitor::{AnalysisOutcome, Collaborators, DirectoryUploader, OomMonitor};

#[derive(Parser)]
#[command(
    name = "oomwatch",
    about = "Out-of-memory risk monitor and heap leak analyzer"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format: text, json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a JSON heap document and print the report
    Analyze {
        /// Heap document to analyze
        heap: PathBuf,

        /// Dump reason recorded in the report
        #[arg(long, default_value = "manual")]
        reason: String,

        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Watch a process until its heap has been dumped and analyzed
    Watch {
        /// Process to watch (defaults to this one)
        #[arg(long)]
        pid: Option<u32>,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Copy reports and dumps into this directory
        #[arg(long)]
        upload_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.log_file.as_deref())?;
    let config = load_config_for_cli(&cli);

    match cli.command {
        Command::Analyze {
            heap,
            reason,
            output,
        } => analyze(&config, &heap, reason, output.as_deref()),
        Command::Watch {
            pid, upload_dir, ..
        } => watch(config, pid, upload_dir).await,
    }
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Command::Watch {
        interval_ms: Some(interval),
        ..
    } = cli.command
    {
        config.monitor.loop_interval_ms = interval;
    }

    config
}

fn analyze(config: &Config, heap: &Path, reason: String, output: Option<&Path>) -> Result<()> {
    let service = AnalysisService::new(Arc::new(JsonHeapIndexer), config.analysis.clone());
    let running_info = RunningInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        app_version: config.general.app_version.clone(),
        monitor_version: env!("CARGO_PKG_VERSION").to_string(),
        now_time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
        dump_reason: reason,
        ..RunningInfo::default()
    };

    let report = service
        .run(heap, running_info)
        .wrap_err_with(|| format!("failed to analyze {}", heap.display()))?;
    log_summary(&report);

    match output {
        Some(path) => {
            write_report(&report, path)?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => println!("{}", report.to_json()?),
    }
    Ok(())
}

fn log_summary(report: &HeapReport) {
    tracing::info!(
        gc_paths = report.gc_paths.len(),
        classes = report.class_infos.len(),
        big_objects = report.leak_objects.len(),
        "analysis complete"
    );
    for object in &report.leak_objects {
        tracing::info!(
            class = %object.class_name,
            size = %format_bytes(object.size),
            "big object"
        );
    }
}

async fn watch(config: Config, pid: Option<u32>, upload_dir: Option<PathBuf>) -> Result<()> {
    let pid = pid.unwrap_or_else(std::process::id);
    let mut collaborators = Collaborators::for_process(&config, pid);
    if let Some(dir) = upload_dir {
        let uploader = Arc::new(DirectoryUploader::new(dir));
        collaborators.report_uploader = Some(uploader.clone());
        collaborators.hprof_uploader = Some(uploader);
    }

    let monitor = OomMonitor::new(config, collaborators);
    if !monitor.start()? {
        return Err(eyre!("monitor did not start"));
    }
    tracing::info!(pid, root = %monitor.files().root().display(), "watching");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            monitor.stop();
        }
        outcome = monitor.finished() => match outcome {
            Some(AnalysisOutcome::Finished { report_path }) => println!("{}", report_path.display()),
            Some(AnalysisOutcome::Failed(message)) => return Err(eyre!(message)),
            Some(AnalysisOutcome::EmptyDump) => tracing::warn!("heap dump was empty"),
            None => {}
        },
    }
    Ok(())
}
