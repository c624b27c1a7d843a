//! Field Relay - Buffered Telemetry Collector Binary
//!
//! Runs the collector service on a field Raspberry Pi, or acts as a sensor
//! node and inspection tool from the command line.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use field_relay::{
    send_frame, shutdown_channel, ChannelSet, ClockSync, Collector, CommandSpec, DefaultJumper,
    DurableQueue, FixedSignal, FrameParser, HologramUplink, Mode, ModeSignal, NodeKind,
    PowerControl, RelayConfig, Sample, SourceId, UsbPower, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT,
    DEFAULT_QUEUE_PATH,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "field_relay")]
#[command(about = "📡 Field Relay - Buffered Telemetry Collector")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
#[command(
    long_about = "Collects sensor frames over TCP, stores them durably and forwards them over a duty-cycled cellular uplink"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ingest listener bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Ingest listener port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Queue file holding frames waiting for the uplink
    #[arg(short, long, default_value = DEFAULT_QUEUE_PATH)]
    queue_path: PathBuf,

    /// Largest accepted frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Seconds between forwarding cycles
    #[arg(long, default_value_t = 6 * 60 * 60)]
    duty_cycle: u64,

    /// Seconds to wait when there is nothing to forward
    #[arg(long, default_value_t = 30)]
    idle_poll: u64,

    /// Seconds between uplink retries
    #[arg(long, default_value_t = 30)]
    retry_backoff: u64,

    /// Seconds between jumper samples
    #[arg(long, default_value_t = 5)]
    mode_poll: u64,

    /// Seconds to wait before the first forwarding cycle
    #[arg(long, default_value_t = 60)]
    startup_delay: u64,

    /// Seconds the modem needs after power-up
    #[arg(long, default_value_t = 90)]
    modem_warmup: u64,

    /// Command used to send one payload
    #[arg(long, default_value = "sudo hologram send")]
    send_command: String,

    /// Command used to open a network session
    #[arg(long, default_value = "sudo hologram network connect")]
    connect_command: String,

    /// Seconds a sender may take to deliver its frame
    #[arg(long, default_value_t = 10)]
    read_timeout: u64,

    /// Seconds an external modem command may run
    #[arg(long, default_value_t = 120)]
    command_timeout: u64,

    /// Command that prints the modem's location and network time
    #[arg(long, default_value = "sudo hologram modem location")]
    location_command: String,

    /// Command that sets the system clock
    #[arg(long, default_value = "sudo timedatectl set-time")]
    set_time_command: String,

    /// Output that marks a successful send
    #[arg(long, default_value = "Message sent successfully")]
    send_success_marker: String,

    /// Output that marks an open network session
    #[arg(long, default_value = "PPP session started")]
    connect_success_marker: String,

    /// USB port of the modem, for power switching
    #[arg(long, default_value = "1-1")]
    usb_port: String,

    /// BCM pin read to detect the debug jumper
    #[arg(long, default_value_t = field_relay::mode::gpio::DEFAULT_SENSE_PIN)]
    sense_pin: u8,

    /// BCM pin driven high to feed the debug jumper
    #[arg(long, default_value_t = field_relay::mode::gpio::DEFAULT_DRIVE_PIN)]
    drive_pin: u8,

    /// Ignore the jumper and run in this mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Set the system clock from the modem before starting
    #[arg(long)]
    sync_clock: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector service (default)
    Serve,

    /// Act as a sensor node and push one frame to a collector
    Send(SendArgs),

    /// Print the frames waiting in the queue
    Queue,

    /// Check a frame against the grammar without sending it
    Parse {
        /// Frame text, e.g. "EC,21.5,0,0,0"
        payload: String,
    },

    /// Show system information
    Info,
}

#[derive(Args)]
struct SendArgs {
    /// Raw frame text; built from the readings below when omitted
    payload: Option<String>,

    /// Collector address (defaults to the local collector)
    #[arg(long)]
    to: Option<String>,

    /// Node type used to build the frame
    #[arg(long, value_enum)]
    node: Option<NodeArg>,

    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    pressure: Option<f64>,

    #[arg(long)]
    humidity: Option<f64>,

    #[arg(long)]
    rotation_rate: Option<f64>,

    /// Seconds allowed for the delivery
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Debug,
    Normal,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Debug => Mode::Debug,
            ModeArg::Normal => Mode::Normal,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum NodeArg {
    Skimmer,
    Centrifuge,
    Warehouse,
}

impl From<NodeArg> for NodeKind {
    fn from(arg: NodeArg) -> Self {
        match arg {
            NodeArg::Skimmer => NodeKind::Skimmer,
            NodeArg::Centrifuge => NodeKind::Centrifuge,
            NodeArg::Warehouse => NodeKind::Warehouse,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve) | None => {
            print_banner();
            serve_command(&cli).await?;
        }
        Some(Commands::Send(args)) => {
            send_command(&cli, args).await?;
        }
        Some(Commands::Queue) => {
            queue_command(&cli).await?;
        }
        Some(Commands::Parse { payload }) => {
            parse_command(&cli, payload)?;
        }
        Some(Commands::Info) => {
            info_command(&cli);
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")?;

    Ok(())
}

fn print_banner() {
    println!("📡 Field Relay - Buffered Telemetry Collector");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!("   Store now, forward on the duty cycle");
    println!();
}

fn build_config(cli: &Cli) -> RelayConfig {
    let mut config = RelayConfig::new(&cli.host, cli.port)
        .with_queue_path(&cli.queue_path)
        .with_max_frame_bytes(cli.max_frame_bytes)
        .with_duty_cycle(Duration::from_secs(cli.duty_cycle))
        .with_idle_poll(Duration::from_secs(cli.idle_poll))
        .with_retry_backoff(Duration::from_secs(cli.retry_backoff))
        .with_mode_poll(Duration::from_secs(cli.mode_poll))
        .with_startup_delay(Duration::from_secs(cli.startup_delay))
        .with_modem_warmup(Duration::from_secs(cli.modem_warmup))
        .with_forced_mode(cli.mode.map(Mode::from))
        .with_clock_sync(cli.sync_clock);

    config.read_timeout = Duration::from_secs(cli.read_timeout);
    config.command_timeout = Duration::from_secs(cli.command_timeout);
    config.send_command = cli.send_command.clone();
    config.connect_command = cli.connect_command.clone();
    config.location_command = cli.location_command.clone();
    config.set_time_command = cli.set_time_command.clone();
    config.send_success_marker = cli.send_success_marker.clone();
    config.connect_success_marker = cli.connect_success_marker.clone();
    config.usb_port = cli.usb_port.clone();
    config.sense_pin = cli.sense_pin;
    config.drive_pin = cli.drive_pin;
    config
}

async fn serve_command(cli: &Cli) -> anyhow::Result<()> {
    info!("Starting field relay collector...");
    let config = build_config(cli);

    let queue = DurableQueue::open(&config.queue_path)
        .await
        .with_context(|| format!("Queue file {} is unusable", config.queue_path.display()))?;
    info!("Queue opened at {}", config.queue_path.display());

    let uplink = HologramUplink::new(
        CommandSpec::parse(&config.send_command)?,
        CommandSpec::parse(&config.connect_command)?,
    )
    .with_send_marker(config.send_success_marker.clone())
    .with_connect_marker(config.connect_success_marker.clone())
    .with_timeout(config.command_timeout);
    let power: Arc<dyn PowerControl> = Arc::new(UsbPower::new(config.usb_port.clone()));

    let signal: Box<dyn ModeSignal> = match config.forced_mode {
        Some(Mode::Debug) => {
            info!("Mode forced to debug, jumper ignored");
            Box::new(FixedSignal::debug())
        }
        Some(Mode::Normal) => {
            info!("Mode forced to normal, jumper ignored");
            Box::new(FixedSignal::normal())
        }
        None => Box::new(
            DefaultJumper::new(config.sense_pin, config.drive_pin).with_context(|| {
                format!(
                    "Failed to set up the debug jumper on pins {}/{}",
                    config.sense_pin, config.drive_pin
                )
            })?,
        ),
    };

    info!("Collector configuration:");
    info!("  - Bind address: {}", config.bind_address());
    info!("  - Duty cycle: {:?}", config.duty_cycle);
    info!("  - Retry backoff: {:?}", config.retry_backoff);
    info!("  - Modem USB port: {}", config.usb_port);

    let mut collector = Collector::new(
        config.clone(),
        Arc::new(queue),
        Arc::new(uplink),
        power.clone(),
        signal,
    );
    if config.sync_clock {
        collector = collector.with_clock_sync(ClockSync::new(
            CommandSpec::parse(&config.location_command)?,
            CommandSpec::parse(&config.set_time_command)?,
            power,
            config.retry_backoff,
            config.command_timeout,
        ));
    }

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        info!("Shutdown signal received, stopping collector");
        trigger.trigger();
    });

    collector.run(shutdown).await?;
    Ok(())
}

async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn send_command(cli: &Cli, args: &SendArgs) -> anyhow::Result<()> {
    let payload = match (&args.payload, args.node) {
        (Some(payload), _) => payload.clone(),
        (None, Some(node)) => {
            let kind = NodeKind::from(node);
            let sample = Sample {
                temperature: args.temperature,
                pressure: args.pressure,
                humidity: args.humidity,
                rotation_rate: args.rotation_rate,
            };
            ChannelSet::for_kind(kind).format(&kind.tag(), &sample)?
        }
        (None, None) => bail!("Give either a frame payload or --node with readings"),
    };

    let addr = args
        .to
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", cli.port));
    send_frame(&addr, &payload, Duration::from_secs(args.timeout))
        .await
        .with_context(|| format!("Failed to deliver frame to {}", addr))?;

    println!("Sent {} to {}", payload, addr);
    Ok(())
}

async fn queue_command(cli: &Cli) -> anyhow::Result<()> {
    if !cli.queue_path.exists() {
        println!("No queue at {}", cli.queue_path.display());
        return Ok(());
    }

    let queue = DurableQueue::open(&cli.queue_path)
        .await
        .with_context(|| format!("Failed to open queue {}", cli.queue_path.display()))?;
    let batch = queue.drain_all().await?;

    println!("📦 Queue: {}", cli.queue_path.display());
    println!("==========================================");
    for entry in batch.entries() {
        println!("  {}", entry);
    }
    println!();
    println!("{} frame(s) waiting for the uplink", batch.len());

    Ok(())
}

fn parse_command(cli: &Cli, payload: &str) -> anyhow::Result<()> {
    let parser = FrameParser::new(cli.max_frame_bytes);
    let frame = parser.parse(payload)?;

    println!("✅ Valid frame");
    println!("  Source: {}", describe_source(frame.source_id()));
    println!("  Temperature: {}", frame.temperature());
    println!("  Pressure: {}", frame.pressure());
    println!("  Humidity: {}", frame.humidity());
    println!("  Rotation rate: {}", frame.rotation_rate());
    println!();
    println!("Stored as:");
    println!("  {}", frame.to_record().to_line()?);

    Ok(())
}

fn describe_source(id: &SourceId) -> String {
    match id.kind() {
        Some(kind) => format!("{} ({:?})", id, kind),
        None => format!("{} (unknown node type)", id),
    }
}

fn info_command(cli: &Cli) {
    println!("📡 Field Relay System Information");
    println!("================================");
    println!();

    println!("System Details:");
    println!(
        "  Hostname: {}",
        System::host_name().unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "  OS: {} {}",
        System::name().unwrap_or_else(|| "unknown".to_string()),
        System::os_version().unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "  Kernel: {}",
        System::kernel_version().unwrap_or_else(|| "unknown".to_string())
    );
    println!("  Uptime: {} seconds", System::uptime());
    println!();

    println!("Queue:");
    println!("  Path: {}", cli.queue_path.display());
    match std::fs::metadata(&cli.queue_path) {
        Ok(meta) => println!("  Size: {} bytes", meta.len()),
        Err(_) => println!("  Size: not created yet"),
    }

    let disks = Disks::new_with_refreshed_list();
    match queue_disk(&disks, &cli.queue_path) {
        Some(disk) => println!(
            "  Free space: {:.1} GB on {}",
            disk.available_space() as f64 / 1024.0 / 1024.0 / 1024.0,
            disk.mount_point().display()
        ),
        None => warn!("No mounted disk holds {}", cli.queue_path.display()),
    }

    println!();
    println!("Features compiled:");
    #[cfg(feature = "gpio")]
    println!("  - GPIO support: ✓");
    #[cfg(not(feature = "gpio"))]
    println!("  - GPIO support: ✗ (sysfs fallback)");
}

/// The disk with the deepest mount point containing `path`.
fn queue_disk<'a>(disks: &'a Disks, path: &Path) -> Option<&'a sysinfo::Disk> {
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
}
