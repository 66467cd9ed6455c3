mod cli;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::Rgb;
use tracing::{error, info, warn};

use timerscan_core::config::{
    DebugConfig, LocatorConfig, PreprocessConfig, ProcessorConfig, RecognizerConfig,
    SchedulerConfig,
};
use timerscan_core::pipeline::{self, PipelineConfig};
use timerscan_core::scheduler::{CancelToken, Progress};
use timerscan_core::store::JournalStore;
use timerscan_proto::proto::ResultRecord;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Extract {
            input,
            output,
            start_frac,
            end_frac,
            sampling_workers,
            processing_workers,
            queue_capacity,
            color,
            color_tolerance,
            perimeter_tolerance,
            min_area,
            closing_radius,
            threshold,
            cache_boxes,
            debug_frames,
            record_stages,
            font,
            lang,
            tessdata,
        } => {
            info!(%input, ?output, start_frac, end_frac, "starting extraction");

            let config = PipelineConfig {
                locator: LocatorConfig {
                    color: Rgb(color),
                    color_tolerance,
                    max_perimeter_deviation: perimeter_tolerance,
                    min_area_fraction: min_area,
                    closing_radius,
                },
                preprocess: PreprocessConfig {
                    intensity_threshold: threshold,
                },
                processor: ProcessorConfig { cache_boxes },
                recognizer: RecognizerConfig {
                    language: lang,
                    tessdata,
                },
                scheduler: SchedulerConfig {
                    sampling_workers,
                    processing_workers,
                    queue_capacity,
                    start_frac,
                    end_frac,
                    ..Default::default()
                },
                debug: DebugConfig {
                    dir: debug_frames,
                    record_stages,
                    font,
                },
            };

            let cancel = CancelToken::new();
            {
                let cancel = cancel.clone();
                ctrlc::set_handler(move || {
                    warn!("interrupt received, finishing in-flight frames");
                    cancel.cancel();
                })
                .context("failed to install Ctrl-C handler")?;
            }

            let mut last_report: Option<Instant> = None;
            let mut report = |p: &Progress| {
                if last_report.is_some_and(|t| t.elapsed() < PROGRESS_LOG_INTERVAL) {
                    return;
                }
                last_report = Some(Instant::now());
                info!(
                    percent = %format!("{:.1}", p.fraction_complete * 100.0),
                    active_tasks = p.active_tasks,
                    queue_depth = p.queue_depth,
                    eta_hours = ?p.estimated_hours_remaining.map(|h| (h * 100.0).round() / 100.0),
                    "progress"
                );
            };

            let summary = pipeline::run_pipeline(&input, &output, &config, cancel, &mut report)
                .context("pipeline failed")?;

            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                failed_frames = summary.failed_frames,
                interrupted = summary.interrupted,
                elapsed = ?summary.elapsed,
                ?output,
                "extraction complete"
            );

            if !summary.failed_ranges.is_empty() {
                error!(ranges = ?summary.failed_ranges, "some ranges could not be sampled");
            }
            if !summary.failed_writes.is_empty() {
                error!(frames = ?summary.failed_writes, "results were lost for some frames");
                bail!(
                    "{} result(s) could not be written to {}",
                    summary.failed_writes.len(),
                    output.display()
                );
            }
            if summary.interrupted {
                info!("run interrupted; rerun the same command to resume");
            }

            Ok(())
        }
        cli::Command::Export { store, output } => export_csv(&store, &output),
    }
}

/// Write every row of the journal as `frame,offset,timestamp,text`.
fn export_csv(store_path: &Path, output: &Path) -> Result<()> {
    if !store_path.exists() {
        bail!("result journal does not exist: {}", store_path.display());
    }
    let store = JournalStore::open(store_path).context("failed to open result journal")?;
    let records = store.records();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create output directory")?;
    }
    let file = File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    write_csv(&records, &mut writer)
        .and_then(|()| writer.flush())
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(?output, rows = records.len(), "csv written");
    Ok(())
}

fn write_csv(records: &[ResultRecord], out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "frame,offset,timestamp,text")?;
    for r in records {
        writeln!(
            out,
            "{},{},{},{}",
            r.frame_index,
            csv_field(&r.offset),
            r.timestamp_seconds,
            csv_field(&r.text)
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
