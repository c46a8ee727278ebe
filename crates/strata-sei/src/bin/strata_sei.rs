//! # strata-sei
//!
//! Command-line front end for timestamp SEI NALUs.
//!
//! ## Usage
//!
//! ```bash
//! # Append one timestamp NALU per second, ten times, to an elementary stream
//! strata-sei stamp --count 10 --interval-ms 1000 --output stamps.h264
//!
//! # Measure delays in a captured Annex B stream
//! strata-sei probe capture.h264
//! strata-sei probe capture.h264 --json
//!
//! # Show the bytes of a freshly built NALU
//! strata-sei inspect
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata_sei::config::{SeiToolConfig, StampConfigInput};
use strata_sei::pacer::InsertPacer;
use strata_sei::probe;
use strata_sei::timestamp::{self, TAG_LEN};

/// Embed and recover wall-clock timestamps in H.264 SEI NAL units.
#[derive(Parser, Debug)]
#[command(name = "strata-sei", about = "H.264 SEI latency timestamps")]
struct Cli {
    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write paced timestamp NALUs to a file or stdout.
    Stamp {
        /// Output path, `-` for stdout.
        #[arg(long, short, default_value = "-")]
        output: String,

        /// Number of NALUs to write.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        count: Option<u32>,

        /// Minimum spacing between NALUs.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: Option<u64>,
    },
    /// Scan an Annex B file and report recovered delays.
    Probe {
        /// H.264 Annex B elementary stream.
        input: PathBuf,

        /// Emit one JSON object per line.
        #[arg(long)]
        json: bool,

        /// Warn about delays above this many milliseconds.
        #[arg(long)]
        warn_above_ms: Option<u64>,
    },
    /// Hex-dump a timestamp NALU.
    Inspect {
        /// Timestamp to embed instead of the current time.
        #[arg(long)]
        timestamp_ms: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    // stdout may carry NALU bytes, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SeiToolConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SeiToolConfig::default(),
    };

    match cli.command {
        Command::Stamp {
            output,
            count,
            interval_ms,
        } => {
            let stamp = StampConfigInput { interval_ms, count }
                .resolve_over(&config.stamp)
                .context("invalid stamp options")?;
            run_stamp(&output, stamp.count, stamp.interval)
        }
        Command::Probe {
            input,
            json,
            warn_above_ms,
        } => {
            let json = json || config.probe.json;
            let warn_above = warn_above_ms
                .map(Duration::from_millis)
                .or(config.probe.warn_above);
            run_probe(&input, json, warn_above)
        }
        Command::Inspect { timestamp_ms } => run_inspect(timestamp_ms),
    }
}

fn run_stamp(output: &str, count: u32, interval: Duration) -> anyhow::Result<()> {
    let mut out: Box<dyn Write> = if output == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(output).with_context(|| format!("creating {output}"))?)
    };

    tracing::info!(count, interval = ?interval, output, "stamping");

    let mut pacer = InsertPacer::new(interval);
    let mut written = 0u32;
    let mut failed = 0u64;
    while written < count {
        let wait = pacer.time_until_next();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        if let Some(nalu) = pacer.poll() {
            out.write_all(&nalu).context("writing NALU")?;
            out.flush().context("flushing output")?;
            written += 1;
            tracing::debug!(written, len = nalu.len(), "timestamp NALU written");
        } else if pacer.stats().failed > failed {
            // Build failure: back off briefly before the retry.
            failed = pacer.stats().failed;
            std::thread::sleep(Duration::from_millis(10));
        }
        // Otherwise the sleep ended just short of the pacer's clock; the
        // next time_until_next covers the remainder.
    }

    let stats = pacer.stats();
    tracing::info!(
        inserted = stats.inserted,
        failed = stats.failed,
        "stamping finished"
    );
    Ok(())
}

fn run_probe(input: &Path, json: bool, warn_above: Option<Duration>) -> anyhow::Result<()> {
    let data = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let report = probe::probe_annex_b_now(&data);

    if let Some(limit) = warn_above {
        let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        for m in report.measurements.iter().filter(|m| m.delay_ms > limit_ms) {
            tracing::warn!(offset = m.offset, delay_ms = m.delay_ms, limit_ms, "delay above limit");
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        for m in &report.measurements {
            serde_json::to_writer(&mut out, m)?;
            writeln!(out)?;
        }
        let summary = serde_json::json!({
            "nal_units": report.nal_units,
            "sei_units": report.sei_units,
            "measured": report.measurements.len(),
            "rejections": report.rejections,
            "delay": report.delay_summary(),
        });
        serde_json::to_writer(&mut out, &summary)?;
        writeln!(out)?;
    } else {
        for m in &report.measurements {
            writeln!(
                out,
                "offset {:>10}  sent {}  delay {} ms",
                m.offset, m.sent_at_ms, m.delay_ms
            )?;
        }
        writeln!(
            out,
            "{} NAL units, {} SEI, {} measured, {} rejected",
            report.nal_units,
            report.sei_units,
            report.measurements.len(),
            report.rejected()
        )?;
        for (kind, count) in &report.rejections {
            writeln!(out, "  {kind}: {count}")?;
        }
        if let Some(summary) = report.delay_summary() {
            writeln!(
                out,
                "delay min {} ms, max {} ms, mean {:.1} ms",
                summary.min_ms, summary.max_ms, summary.mean_ms
            )?;
        }
    }

    Ok(())
}

fn run_inspect(timestamp_ms: Option<u64>) -> anyhow::Result<()> {
    let ts = timestamp_ms.unwrap_or_else(timestamp::now_ms);
    let nalu = timestamp::encode_timestamp_nalu(ts)?;

    let hex = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    };

    println!("timestamp_ms: {ts}");
    println!("length:       {} bytes", nalu.len());
    println!("start code:   {}", hex(&nalu[..3]));
    println!("NAL header:   {}", hex(&nalu[3..4]));
    println!("SEI type/size:{}", hex(&nalu[4..6]));
    println!("tag:          {}", hex(&nalu[6..6 + TAG_LEN]));
    println!("timestamp:    {}", hex(&nalu[6 + TAG_LEN..nalu.len() - 1]));
    println!("trailing:     {}", hex(&nalu[nalu.len() - 1..]));
    Ok(())
}
