//! strobe CLI entrypoint.
//!
//! ```bash
//! strobe demo --frames 60 --zones-per-frame 8
//! strobe demo --frames 10 --abandon-every 5 --jsonl
//! strobe probe --json
//! ```

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::warn;

use strobe::sim::{SimPass, SimProvider};
use strobe::{ProfilerConfig, ProfilerContext};
use strobe_core::error::{ProfileError, Result};
use strobe_core::event::{EventSink, TraceEvent};
use strobe_core::types::PassKind;
use strobe_core::zone_location;
use strobe_wgpu::WgpuProvider;

#[derive(Parser, Debug)]
#[command(
    name = "strobe",
    version,
    about = "GPU zone-timing profiler",
    arg_required_else_help = true,
    after_help = "Examples:\n  strobe probe --json\n  strobe demo --frames 60 --zones-per-frame 8\n  strobe demo --frames 10 --abandon-every 5 --jsonl"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic workload through the simulated device and report
    /// the resulting event stream.
    Demo(DemoArgs),
    /// List visible GPU adapters and their timestamp-query capabilities.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Number of frames to simulate.
    #[arg(long = "frames", default_value_t = 60)]
    frames: u32,

    /// Zones recorded per frame.
    #[arg(long = "zones-per-frame", default_value_t = 8)]
    zones_per_frame: u32,

    /// Timestamp slots per hardware buffer.
    #[arg(long = "capacity", default_value_t = 4096)]
    capacity: u32,

    /// Collection timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 200)]
    timeout_ms: u64,

    /// Abandon every Nth zone (its pass never executes), exercising the
    /// timeout recovery path. 0 disables.
    #[arg(long = "abandon-every", default_value_t = 0)]
    abandon_every: u32,

    /// Emit every trace event to stdout as one JSON object per line.
    #[arg(long = "jsonl", default_value_t = false)]
    jsonl: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Emit the adapter list as JSON.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Demo(args) => run_demo(args),
        Commands::Probe(args) => run_probe(args),
    };
    if let Err(err) = result {
        tracing::error!(error = %err, code = err.error_code(), "command failed");
        std::process::exit(1);
    }
}

// ─── demo ───────────────────────────────────────────────────────────────────

/// Counts events and optionally streams them to stdout as JSON lines.
struct DemoSink {
    jsonl: bool,
    total_events: AtomicU64,
    gpu_events: AtomicU64,
}

impl DemoSink {
    fn new(jsonl: bool) -> Self {
        Self {
            jsonl,
            total_events: AtomicU64::new(0),
            gpu_events: AtomicU64::new(0),
        }
    }
}

impl EventSink for DemoSink {
    fn emit(&self, event: TraceEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if matches!(event, TraceEvent::GpuTime { .. }) {
            self.gpu_events.fetch_add(1, Ordering::Relaxed);
        }
        if self.jsonl {
            println!(
                "{}",
                serde_json::to_string(&event).expect("serialize trace event")
            );
        }
    }
}

fn run_demo(args: DemoArgs) -> Result<()> {
    let provider = SimProvider::new();
    let sink = Arc::new(DemoSink::new(args.jsonl));
    let context = ProfilerContext::new(
        provider.clone(),
        Arc::clone(&sink),
        ProfilerConfig {
            capacity: args.capacity,
            timeout: Duration::from_millis(args.timeout_ms),
        },
    )?;
    context.set_name("sim queue");

    let mut recorded = 0u64;
    let mut abandoned = 0u64;
    let mut rejected = 0u64;
    for frame in 0..args.frames {
        for zone_index in 0..args.zones_per_frame {
            let sequence = frame * args.zones_per_frame + zone_index;
            let kind = match sequence % 3 {
                0 => PassKind::Compute,
                1 => PassKind::Draw,
                _ => PassKind::Transfer,
            };
            let mut pass = SimPass::new(kind);
            match context.begin_zone(&mut pass, zone_location!("demo zone"), true) {
                Ok(zone) => drop(zone),
                Err(err @ ProfileError::RingFull { .. }) => {
                    warn!(frame, error = %err, "zone skipped");
                    rejected += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
            recorded += 1;
            if args.abandon_every != 0 && sequence % args.abandon_every == 0 {
                abandoned += 1;
            } else {
                provider.complete_pass(&pass);
            }
        }
        context.collect()?;
    }
    context.drain();

    let outstanding = context.outstanding();
    let checkpoint = context.checkpoint();
    drop(context);

    eprintln!(
        "demo: frames={} zones={} abandoned={} rejected={} gpu_events={} total_events={} checkpoint={} buffers_allocated={} outstanding={}",
        args.frames,
        recorded,
        abandoned,
        rejected,
        sink.gpu_events.load(Ordering::Relaxed),
        sink.total_events.load(Ordering::Relaxed),
        checkpoint,
        provider.buffers_allocated(),
        outstanding,
    );
    Ok(())
}

// ─── probe ──────────────────────────────────────────────────────────────────

fn run_probe(args: ProbeArgs) -> Result<()> {
    let instance = wgpu::Instance::default();
    let adapters = instance.enumerate_adapters(wgpu::Backends::all());
    if adapters.is_empty() {
        tracing::error!("no GPU adapters visible to any backend");
        return Err(ProfileError::Unsupported {
            granularity: strobe_core::types::SampleGranularity::StageBoundary,
        });
    }

    let mut rows = Vec::new();
    for adapter in &adapters {
        let info = adapter.get_info();
        let features = adapter.features();
        rows.push(serde_json::json!({
            "name": info.name,
            "backend": format!("{:?}", info.backend),
            "device_type": format!("{:?}", info.device_type),
            "timestamp_query": features.contains(WgpuProvider::REQUIRED_FEATURES),
            "timestamp_query_inside_passes": features
                .contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_PASSES),
            "timestamp_query_inside_encoders": features
                .contains(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS),
        }));
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({ "adapters": rows }))
                .expect("serialize probe report")
        );
    } else {
        println!("probe: {} adapter(s)", rows.len());
        for row in &rows {
            println!(
                "adapter={} backend={} timestamp_query={} inside_passes={} inside_encoders={}",
                row["name"].as_str().unwrap_or("?"),
                row["backend"].as_str().unwrap_or("?"),
                row["timestamp_query"],
                row["timestamp_query_inside_passes"],
                row["timestamp_query_inside_encoders"],
            );
        }
    }
    Ok(())
}
