//! GPU worker process.
//!
//! Listens for client connections, executes their runtime calls and prints
//! one JSON ready line on stdout once the listener is bound. Logs go to
//! stderr.
//!
//! ```text
//! hipwire-worker --port 18515 --device 0 --devices 2
//! ```

use std::time::Duration;

use clap::builder::FalseyValueParser;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hipwire::control::{announce_ready, ReadyMessage};
use hipwire::protocol::DEFAULT_PORT;
use hipwire::worker::{GpuRuntime, SimulatedRuntime, SimulatedSmi, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "hipwire-worker", about = "Execute remote GPU runtime calls over TCP")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, env = "TF_WORKER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Device each connection starts on
    #[arg(short, long, env = "TF_DEVICE_ID", default_value_t = 0)]
    device: i32,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Number of simulated devices
    #[arg(long, default_value_t = 1)]
    devices: usize,

    /// Simulated device memory in MiB
    #[arg(long, default_value_t = 1024)]
    memory_mib: u64,

    /// Number of telemetry processors (0 disables telemetry)
    #[arg(long)]
    processors: Option<usize>,

    /// Socket I/O timeout in seconds
    #[arg(long, default_value_t = 60)]
    io_timeout: u64,

    /// Debug logging (`TF_DEBUG=1`)
    #[arg(short, long, env = "TF_DEBUG", value_parser = FalseyValueParser::new())]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_env(hipwire::LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(hipwire::default_log_filter(args.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = run(args).await {
        error!("worker failed: {}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> hipwire::Result<()> {
    let runtime = SimulatedRuntime::builder()
        .devices(args.devices)
        .memory_per_device(args.memory_mib << 20)
        .build();
    let smi = match args.processors {
        Some(0) => SimulatedSmi::unavailable(),
        Some(n) => SimulatedSmi::new(n),
        None => SimulatedSmi::new(args.devices),
    };
    let config = WorkerConfig {
        bind: args.bind,
        port: args.port,
        device: args.device,
        io_timeout: Duration::from_secs(args.io_timeout),
    };

    let worker = Worker::bind(config, runtime, smi).await?;
    let devices = worker.runtime().device_count().unwrap_or(0);
    let telemetry = worker.telemetry().init(0).is_ok();
    info!(devices, telemetry, "worker ready");
    announce_ready(&ReadyMessage::new(worker.local_addr()?, devices, telemetry))?;

    worker.run().await
}
