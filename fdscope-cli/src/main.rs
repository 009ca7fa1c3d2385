use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use futures_lite::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fdscope_lib::events::{self, EventSender};
use fdscope_lib::protocol::{AutoRetransmission, FrameFormat, Mode, Register};
use fdscope_lib::timing::{DataBitTiming, PRESCALER_DEFAULT, SEG1_LEN_DEFAULT, SEG2_LEN_DEFAULT};
use fdscope_lib::transport::{self, DeviceEvent, NusbDevice, NusbTransport, UsbDevice};
use fdscope_lib::{CaptureConfig, CaptureController, CaptureEvent, ControlClient, SessionId, SessionManager};

/// Capture tool for the FDCAN debugger USB gadget.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON file with capture engine settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bulk reads kept outstanding (overrides the config file)
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Captured messages retained (overrides the config file)
    #[arg(long, global = true)]
    history: Option<usize>,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached gadgets
    List,
    /// Show device info and FDCAN settings of the gadget
    Info,
    /// Read one FDCAN register
    ReadReg {
        #[arg(value_enum)]
        register: RegisterArg,
    },
    /// Write one FDCAN register
    WriteReg {
        #[arg(value_enum)]
        register: RegisterArg,
        /// Value, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Capture frames until interrupted (Ctrl+C)
    Capture {
        /// Stop after this many frames
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
    /// Compute data phase bit timing
    Timing {
        #[arg(short, long, default_value_t = PRESCALER_DEFAULT)]
        prescaler: u32,
        #[arg(long, default_value_t = SEG1_LEN_DEFAULT)]
        seg1: u32,
        #[arg(long, default_value_t = SEG2_LEN_DEFAULT)]
        seg2: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RegisterArg {
    FrameFormat,
    Mode,
    AutoRetransmission,
}

impl From<RegisterArg> for Register {
    fn from(arg: RegisterArg) -> Self {
        match arg {
            RegisterArg::FrameFormat => Register::FrameFormat,
            RegisterArg::Mode => Register::Mode,
            RegisterArg::AutoRetransmission => Register::AutoRetransmission,
        }
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid value '{s}': {e}"))
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(filter).with(console_layer).init();
}

fn load_config(cli: &Cli) -> Result<CaptureConfig> {
    let mut config = match &cli.config {
        Some(path) => CaptureConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CaptureConfig::default(),
    };
    if let Some(pool_size) = cli.pool_size {
        config.pool_size = pool_size;
    }
    if let Some(history) = cli.history {
        config.history_limit = history;
    }
    config.validate()?;
    Ok(config)
}

/// Enumerates gadgets, picks the active one and claims its interface
async fn open_active(
    events: &EventSender,
) -> Result<(SessionManager<NusbDevice>, SessionId, Arc<NusbTransport>)> {
    let mut manager = SessionManager::new(events.clone());
    manager.load_devices(transport::discover()?);

    let Some(id) = manager.ensure_active() else {
        bail!(fdscope_lib::ScopeError::DeviceNotFound);
    };
    let transport = manager
        .connect(id)
        .await
        .with_context(|| format!("Failed to connect to {id}"))?;
    Ok((manager, id, transport))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let config = load_config(&cli)?;
    let (events, _) = events::channel(config.event_capacity);

    match cli.command {
        Commands::List => list(),
        Commands::Info => show_info(&events).await,
        Commands::ReadReg { register } => read_register(&events, register.into()).await,
        Commands::WriteReg { register, value } => write_register(&events, register.into(), value).await,
        Commands::Capture { count } => capture(&config, &events, count).await,
        Commands::Timing { prescaler, seg1, seg2 } => {
            let timing = DataBitTiming::new(prescaler, seg1, seg2)?;
            println!("{timing}");
            Ok(())
        }
    }
}

fn list() -> Result<()> {
    let devices = transport::discover()?;
    if devices.is_empty() {
        println!("No FDCAN debugger attached");
        return Ok(());
    }

    for device in devices {
        let info = device.info();
        println!(
            "{:04x}:{:04x} bus {} addr {}  {}  serial {}  version {}",
            device.vendor_id(),
            device.product_id(),
            info.bus_number(),
            info.device_address(),
            device.product_name().unwrap_or_else(|| "?".to_string()),
            device.serial_number().unwrap_or_else(|| "?".to_string()),
            device.version().unwrap_or_else(|| "?".to_string()),
        );
    }
    Ok(())
}

async fn show_info(events: &EventSender) -> Result<()> {
    let (manager, id, transport) = open_active(events).await?;
    let client = ControlClient::new(transport);

    if let Some(session) = manager.get(id) {
        let device = session.device();
        println!("Session:           {id}");
        if let Some(product) = device.product_name() {
            println!("Product:           {product}");
        }
        if let Some(serial) = device.serial_number() {
            println!("Serial:            {serial}");
        }
    }

    let info = client
        .get_device_info()
        .await
        .context("Failed to read device info")?;
    println!("{info}");

    let format: FrameFormat = client.read_typed().await?;
    let mode: Mode = client.read_typed().await?;
    let retransmission: AutoRetransmission = client.read_typed().await?;
    println!("Frame format:      {format}");
    println!("Mode:              {mode}");
    println!("Retransmission:    {retransmission}");
    Ok(())
}

async fn read_register(events: &EventSender, register: Register) -> Result<()> {
    let (_manager, _id, transport) = open_active(events).await?;
    let value = ControlClient::new(transport)
        .read_register(register)
        .await
        .with_context(|| format!("Failed to read {register}"))?;
    println!("{register} = {value} ({value:#010x})");
    Ok(())
}

async fn write_register(events: &EventSender, register: Register, value: u32) -> Result<()> {
    let (_manager, _id, transport) = open_active(events).await?;
    ControlClient::new(transport)
        .write_register(register, value)
        .await
        .with_context(|| format!("Failed to write {register}"))?;
    info!("{register} set to {value:#010x}");
    Ok(())
}

/// Builds a controller for a freshly connected device and starts capturing
async fn begin_capture(
    transport: Arc<NusbTransport>,
    config: &CaptureConfig,
    events: &EventSender,
) -> Result<CaptureController<NusbTransport>> {
    let controller = CaptureController::new(transport, config, events.clone());
    controller.attach().await.context("Failed to reset device")?;
    controller.start().await.context("Failed to start capture")?;
    Ok(controller)
}

async fn capture(config: &CaptureConfig, events: &EventSender, count: Option<u64>) -> Result<()> {
    let mut rx = events.subscribe();
    let (mut manager, id, transport) = open_active(events).await?;
    let mut hotplug = transport::watch()?;

    let mut active = Some((id, begin_capture(transport, config, events).await?));
    info!("Capturing on {id} (Ctrl+C to stop)");
    println!("   seq        id fmt T BRS    Format   DLC  data");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut captured = 0u64;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = rx.recv() => match event {
                Ok(CaptureEvent::MessageCaptured(message)) => {
                    println!("{message}");
                    captured += 1;
                    if count.is_some_and(|limit| captured >= limit) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                Err(RecvError::Closed) => break,
            },
            Some(event) = hotplug.next() => {
                let departing = matches!(event, DeviceEvent::Disconnected(_));
                let Some(session) = manager.handle_event(event).await else {
                    continue;
                };
                if departing {
                    if active.as_ref().is_some_and(|(id, _)| *id == session) {
                        if let Some((_, controller)) = active.take() {
                            controller.detach();
                        }
                        warn!("Device removed, waiting for it to return");
                    }
                } else if active.is_none() {
                    let transport = manager.get(session).and_then(|s| s.transport()).cloned();
                    if let Some(transport) = transport {
                        match begin_capture(transport, config, events).await {
                            Ok(controller) => {
                                info!("Capturing on {session}");
                                active = Some((session, controller));
                            }
                            Err(e) => error!("{e:#}"),
                        }
                    }
                }
            }
        }
    }

    if let Some((_, controller)) = active {
        if let Err(e) = controller.stop().await {
            warn!(error = %e, "Failed to stop capture");
        }
    }
    info!(captured, "Capture finished");
    Ok(())
}
