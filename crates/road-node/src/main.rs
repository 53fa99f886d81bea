mod events;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use road_protocol::{
    AutoMode, DalekCrypto, Keep, MemoryKeep, RoadStack, SqliteKeep, StackConfig, SystemClock,
};
use road_transport::{TransportConfig, UdpTransport};

use events::{emit, now_secs, EventRemote, EventStarted, EventStopped};

/// Service loop cadence.
const SERVICE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "road-node", about = "Run a road stack over UDP")]
struct Cli {
    /// Name for this stack (used only when the keep is empty).
    #[arg(short, long, default_value = "road")]
    name: String,

    /// UDP address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:7530")]
    listen: SocketAddr,

    /// Accept joins from other stacks.
    #[arg(long)]
    main: bool,

    /// Auto-accept policy for unknown joiners: never, once or always.
    #[arg(long, default_value = "never")]
    auto: AutoMode,

    /// SQLite keep file. Without it, state lives in memory only.
    #[arg(long)]
    keep: Option<PathBuf>,

    /// Main stack to join on startup (repeatable).
    #[arg(long)]
    join: Vec<SocketAddr>,

    /// JSON file with `stack` (timeouts, presence) and `transport` sections.
    /// Flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn setup_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        eprintln!("\nCtrl+C received, shutting down...");
        r.store(false, Ordering::Relaxed);
    });
    running
}

/// Optional JSON configuration file.
#[derive(Default, Deserialize)]
#[serde(default)]
struct NodeFile {
    stack: StackConfig,
    transport: TransportConfig,
}

fn load_config(cli: &Cli) -> anyhow::Result<(StackConfig, TransportConfig)> {
    let file = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => NodeFile::default(),
    };
    let stack = StackConfig {
        name: cli.name.clone(),
        ..file.stack
    }
    .main(cli.main)
    .auto(cli.auto);
    stack.validate()?;
    Ok((stack, file.transport))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();
    let (config, transport_config) = load_config(&cli)?;
    let period = config.presence.period;

    let keep: Box<dyn Keep> = match &cli.keep {
        Some(path) => Box::new(
            SqliteKeep::open(path).with_context(|| format!("opening keep {}", path.display()))?,
        ),
        None => Box::new(MemoryKeep::new()),
    };
    let transport = UdpTransport::bind(cli.listen, transport_config)
        .with_context(|| format!("binding {}", cli.listen))?;
    let mut stack = RoadStack::open(
        config,
        Box::new(transport),
        keep,
        Arc::new(DalekCrypto),
        Arc::new(SystemClock::new()),
    )?;

    eprintln!("road-node v{}", env!("CARGO_PKG_VERSION"));
    emit(&EventStarted {
        event: "started",
        name: stack.local().name().to_string(),
        uid: stack.local().uid(),
        listen: stack.local_addr().to_string(),
        main: stack.local().main(),
        auto: stack.local().auto().to_string(),
        remotes: stack.remotes().count(),
        timestamp: now_secs(),
    });

    for addr in &cli.join {
        let uid = stack.join_addr(*addr, true)?;
        tracing::info!("joining {addr} as remote {uid}");
    }
    // Restored relationships go straight back through allow and alive
    stack.manage(true, true);

    let running = setup_ctrlc();
    let mut service = tokio::time::interval(SERVICE_INTERVAL);
    let mut presence = tokio::time::interval(period);
    presence.tick().await;

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            _ = service.tick() => {
                for event in stack.service_all() {
                    let name = stack
                        .remote(event.uid())
                        .map(|r| r.name().to_string())
                        .unwrap_or_default();
                    emit(&EventRemote::from_stack(&event, &name, start.elapsed().as_secs_f64()));
                }
            }
            _ = presence.tick() => {
                let started = stack.manage(true, false);
                if started > 0 {
                    tracing::debug!("presence: {started} transactions started");
                }
            }
        }
    }

    stack.close();
    let stats = stack.stats();
    emit(&EventStopped {
        event: "stopped",
        name: stack.local().name().to_string(),
        elapsed_s: start.elapsed().as_secs_f64(),
        packets_in: stats.packets_in,
        packets_out: stats.packets_out,
        packets_dropped: stats.packets_dropped,
    });
    Ok(())
}
