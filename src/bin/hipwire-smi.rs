//! Remote GPU telemetry viewer.
//!
//! Queries a worker's system-management library and prints it in a
//! table or per-GPU blocks. Exits non-zero when the library cannot be
//! initialized or the requested GPU does not exist.
//!
//! ```text
//! hipwire-smi --host gpu-host metrics
//! hipwire-smi power 1
//! ```

use std::io::{self, Write};
use std::ops::Range;

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use hipwire::protocol::payload::{AsicInfo, GpuMetrics, PowerInfo};
use hipwire::protocol::DEFAULT_PORT;
use hipwire::{ClientConfig, RemoteGpu, SmiResult, SmiStatus};

#[derive(Parser, Debug)]
#[command(name = "hipwire-smi", about = "Show telemetry of a remote GPU worker")]
struct Cli {
    /// Worker host
    #[arg(long, env = "TF_WORKER_HOST", default_value = "localhost")]
    host: String,

    /// Worker port
    #[arg(short, long, env = "TF_WORKER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Debug logging (`TF_DEBUG=1`)
    #[arg(short, long, env = "TF_DEBUG", value_parser = FalseyValueParser::new())]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// List GPUs with identification
    List,
    /// Temperature, power, activity, clocks and memory as a table
    Metrics {
        /// GPU index (all when omitted)
        index: Option<u32>,
    },
    /// Power draw, limit and voltages
    Power {
        /// GPU index (all when omitted)
        index: Option<u32>,
    },
    /// Detailed identification
    Info {
        /// GPU index (all when omitted)
        index: Option<u32>,
    },
}

#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("Failed to initialize: {0}")]
    Init(SmiStatus),

    #[error("Failed to get GPU count: {0}")]
    Count(SmiStatus),

    #[error("GPU {index} not found (have {count} GPUs)")]
    NotFound { index: u32, count: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env(hipwire::LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            hipwire::default_log_filter(true)
        } else {
            "hipwire=warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let gpu = RemoteGpu::new(ClientConfig::builder().host(cli.host).port(cli.port).build());
    let mut out = io::stdout().lock();
    let result = run(&gpu, cli.command, &mut out).await;
    let _ = out.flush();
    if let Err(err) = result {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

/// Execute one command against an initialized telemetry session.
///
/// The library is shut down again on every path after a successful init.
async fn run(gpu: &RemoteGpu, command: Command, out: &mut impl Write) -> Result<(), Failure> {
    gpu.smi_init(0).await.map_err(Failure::Init)?;
    let result = render(gpu, command, out).await;
    if let Err(status) = gpu.smi_shutdown().await {
        debug!(%status, "telemetry shutdown failed");
    }
    result
}

async fn render(gpu: &RemoteGpu, command: Command, out: &mut impl Write) -> Result<(), Failure> {
    let count = gpu.smi_processor_count().await.map_err(Failure::Count)?;
    match command {
        Command::List => {
            writeln!(out, "GPU Count: {}", count)?;
            for i in 0..count {
                out.write_all(list_entry(i, &gpu.smi_asic_info(i).await).as_bytes())?;
            }
        }
        Command::Metrics { index } => {
            let range = select(index, count)?;
            out.write_all(metrics_header().as_bytes())?;
            for i in range {
                let name = market_name(gpu, i).await;
                out.write_all(metrics_row(i, &name, &gpu.smi_gpu_metrics(i).await).as_bytes())?;
            }
        }
        Command::Power { index } => {
            for i in select(index, count)? {
                let name = market_name(gpu, i).await;
                out.write_all(power_entry(i, &name, &gpu.smi_power_info(i).await).as_bytes())?;
            }
        }
        Command::Info { index } => {
            for i in select(index, count)? {
                out.write_all(info_entry(i, &gpu.smi_asic_info(i).await).as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Indices a command covers: one GPU, or all of them.
fn select(index: Option<u32>, count: u32) -> Result<Range<u32>, Failure> {
    match index {
        None => Ok(0..count),
        Some(index) if index < count => Ok(index..index + 1),
        Some(index) => Err(Failure::NotFound { index, count }),
    }
}

async fn market_name(gpu: &RemoteGpu, index: u32) -> String {
    gpu.smi_asic_info(index)
        .await
        .map(|asic| asic.market_name.as_str().to_owned())
        .unwrap_or_else(|_| "Unknown".to_owned())
}

fn list_entry(index: u32, asic: &SmiResult<AsicInfo>) -> String {
    let asic = match asic {
        Ok(asic) => asic,
        Err(_) => return format!("GPU {}: (failed to get info)\n", index),
    };
    let mut s = format!(
        "GPU {}: {}\n  Vendor ID:  0x{:04X}\n  Device ID:  0x{:04X}\n  Compute Units: {}\n",
        index, asic.market_name, asic.vendor_id, asic.device_id, asic.num_compute_units
    );
    if !asic.asic_serial.as_str().is_empty() {
        s.push_str(&format!("  Serial: {}\n", asic.asic_serial));
    }
    s
}

fn metrics_header() -> String {
    let header = format!(
        "{:<4} {:<24} {:>6} {:>6} {:>6} {:>6} {:>6} {:>8} {:>8} {:>10}",
        "GPU", "Name", "Temp", "Power", "GFX%", "Mem%", "GFXClk", "MemClk", "VRAMUsed", "VRAMTotal"
    );
    format!("{}\n{}\n", header, "-".repeat(header.len()))
}

fn metrics_row(index: u32, name: &str, metrics: &SmiResult<GpuMetrics>) -> String {
    let name: String = name.chars().take(24).collect();
    let m = match metrics {
        Ok(m) => m,
        Err(_) => return format!("{:<4} {:<24} (failed to get metrics)\n", index, name),
    };
    format!(
        "{:<4} {:<24} {:>5}C {:>5}W {:>5}% {:>5}% {:>5}MHz {:>6}MHz {:>7.1}GB {:>8.1}GB\n",
        index,
        name,
        m.temperature_hotspot,
        m.average_socket_power,
        m.average_gfx_activity,
        m.average_umc_activity,
        m.current_gfxclk,
        m.current_uclk,
        gib(m.vram_used),
        gib(m.vram_total),
    )
}

fn power_entry(index: u32, name: &str, power: &SmiResult<PowerInfo>) -> String {
    let p = match power {
        Ok(p) => p,
        Err(_) => return format!("GPU {}: (failed to get power info)\n", index),
    };
    format!(
        "GPU {}: {}\n  Current Power: {} W\n  Average Power: {} W\n  Power Limit:   {} W\n  \
         GFX Voltage:   {} mV\n  SOC Voltage:   {} mV\n  Mem Voltage:   {} mV\n",
        index,
        name,
        p.current_socket_power,
        p.average_socket_power,
        p.power_limit,
        p.gfx_voltage,
        p.soc_voltage,
        p.mem_voltage,
    )
}

fn info_entry(index: u32, asic: &SmiResult<AsicInfo>) -> String {
    let a = match asic {
        Ok(a) => a,
        Err(_) => return format!("GPU {}: (failed to get info)\n", index),
    };
    format!(
        "GPU {}:\n  Name:          {}\n  Vendor ID:     0x{:04X}\n  Device ID:     0x{:04X}\n  \
         Rev ID:        0x{:02X}\n  Compute Units: {}\n  Serial:        {}\n",
        index, a.market_name, a.vendor_id, a.device_id, a.rev_id, a.num_compute_units, a.asic_serial,
    )
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1u64 << 30) as f64
}
