//! Weather Sensor Agent CLI
//!
//! Fuses decoded 433 MHz weather sensor payloads into a live sensor registry.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use weather_sensor_agent::{
    config::Config,
    events::{HubEvent, Topic},
    hub::{Hub, HubOptions},
    notify::LogNotifier,
    protocol::ProtocolRegistry,
    runtime,
    sensor::{CapabilityMapper, Catalog, CompositeId},
    settings::{read_app, read_protocols, FileSettings, MemorySettings, SettingsStore, KEY_APP},
    source::{LineInput, LineSource},
    stats::{ProtocolStats, StatsLog},
    PairedDevice, VERSION,
};

#[derive(Parser)]
#[command(name = "weather-sensor")]
#[command(version = VERSION)]
#[command(about = "State fusion for 433 MHz weather sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start reading payloads and tracking sensors
    Start {
        /// Protocol that decodes the input lines
        #[arg(long, default_value = "rtl433")]
        protocol: String,

        /// Read payloads from a file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Serve the HTTP query surface (requires server feature)
        #[arg(long)]
        serve: bool,

        /// Pair a sensor with a device, as ID=NAME (repeatable)
        #[arg(long = "pair", value_name = "ID=NAME")]
        pairs: Vec<String>,
    },

    /// Show settings and cumulative statistics
    Status,

    /// List known protocols and whether they are watched
    Protocols,

    /// Start watching a protocol
    Watch {
        /// Protocol id
        id: String,
    },

    /// Stop watching a protocol
    Unwatch {
        /// Protocol id
        id: String,
    },

    /// Set the inactivity threshold in seconds
    SetInactive {
        /// Seconds without data before a sensor is inactive
        secs: u64,
    },

    /// Set the notification mask (1 = active again, 2 = inactive)
    SetNotify {
        /// Bitmask
        mask: u32,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Start {
            protocol,
            input,
            serve,
            pairs,
        } => {
            cmd_start(&protocol, input, serve, &pairs);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Protocols => {
            cmd_protocols();
        }
        Commands::Watch { id } => {
            cmd_watch(&id, true);
        }
        Commands::Unwatch { id } => {
            cmd_watch(&id, false);
        }
        Commands::SetInactive { secs } => {
            cmd_update_app(|app| app.inactive = secs);
        }
        Commands::SetNotify { mask } => {
            cmd_update_app(|app| app.notify = mask);
        }
        Commands::Config { save } => {
            cmd_config(save);
        }
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    }
}

fn open_settings(config: &Config) -> Box<dyn SettingsStore> {
    match FileSettings::open(config.settings_path()) {
        Ok(settings) => Box::new(settings),
        Err(e) => {
            eprintln!("Warning: Could not open settings, changes will not persist: {e}");
            Box::new(MemorySettings::new())
        }
    }
}

fn build_mapper(config: &Config) -> CapabilityMapper {
    let overrides = config.data_path.join("translations.json");
    let catalog = Catalog::builtin(config.locale);
    if !overrides.exists() {
        return CapabilityMapper::new(Box::new(catalog));
    }
    match Catalog::builtin(config.locale).with_overrides_from(&overrides) {
        Ok(catalog) => CapabilityMapper::new(Box::new(catalog)),
        Err(e) => {
            eprintln!("Warning: Ignoring translations in {overrides:?}: {e}");
            CapabilityMapper::new(Box::new(catalog))
        }
    }
}

fn build_hub(config: &Config) -> Hub {
    Hub::new(
        ProtocolRegistry::builtin_in(config.timezone),
        open_settings(config),
        Box::new(LogNotifier),
        HubOptions {
            locale: config.locale,
            timezone: config.timezone,
            sweep_interval: config.sweep_interval,
            mapper: Some(build_mapper(config)),
        },
    )
}

fn parse_pair(text: &str) -> Option<(CompositeId, String)> {
    let (id, name) = text.rsplit_once('=')?;
    let id = id.parse().ok()?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((id, name.to_string()))
}

fn cmd_start(protocol: &str, input: Option<PathBuf>, serve: bool, pairs: &[String]) {
    println!("Weather Sensor Agent v{VERSION}");
    println!();

    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let mut hub = build_hub(&config);
    if !hub.query().protocols().iter().any(|p| p.id == protocol) {
        eprintln!("Error: Unknown protocol '{protocol}'");
        eprintln!("Run 'weather-sensor protocols' to list the available protocols.");
        std::process::exit(1);
    }

    for pairing in pairs {
        match parse_pair(pairing) {
            Some((id, name)) => {
                println!("  Paired {id} as {name}");
                hub.pair(id, Arc::new(PairedDevice::new(name, Utc::now())));
            }
            None => eprintln!("Warning: Ignoring malformed pairing '{pairing}' (expected ID=NAME)"),
        }
    }

    hub.bus_mut().subscribe(Topic::All, |event: &HubEvent| -> anyhow::Result<()> {
        if let HubEvent::Updated { id, timestamp } = event {
            println!("[{}] {} updated", timestamp.format("%H:%M:%S"), id);
        }
        Ok(())
    });

    println!("Starting agent...");
    println!("  Protocol: {protocol}");
    match &input {
        Some(path) => println!("  Input: {path:?}"),
        None => println!("  Input: stdin"),
    }
    println!("  Sweep interval: {}ms", config.sweep_interval.as_millis());
    println!(
        "  Inactive after: {}s",
        hub.monitor().settings().inactive
    );

    let session = StatsLog::new();
    let handle = runtime::spawn(hub, &config);

    #[cfg(feature = "server")]
    let server = if serve {
        start_server(&config, handle.clone())
    } else {
        None
    };

    #[cfg(not(feature = "server"))]
    if serve {
        eprintln!("Warning: --serve flag ignored (server feature not enabled at compile time)");
    }

    let line_input = match input {
        Some(path) => LineInput::File(path),
        None => LineInput::Stdin,
    };
    let mut source = LineSource::new(protocol, line_input);
    if let Err(e) = source.start(handle.clone()) {
        eprintln!("Error starting input: {e}");
        handle.shutdown();
        std::process::exit(1);
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    while running.load(Ordering::SeqCst) {
        if !handle.is_running() {
            eprintln!("Hub stopped unexpectedly");
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    println!();
    println!("Stopping agent...");
    source.stop();

    let stats = handle
        .call(|hub| hub.protocol_stats())
        .unwrap_or_default();

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown_tx)) = server {
        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(1));
    }

    handle.shutdown();

    println!();
    println!("{}", session.summary(&stats));
}

#[cfg(feature = "server")]
fn start_server(
    config: &Config,
    handle: weather_sensor_agent::HubHandle,
) -> Option<(tokio::runtime::Runtime, tokio::sync::oneshot::Sender<()>)> {
    use weather_sensor_agent::server::{run, ServerConfig};

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Warning: Could not start async runtime: {e}");
            return None;
        }
    };
    match runtime.block_on(run(ServerConfig::new(config.server_port), handle)) {
        Ok((addr, shutdown_tx)) => {
            println!("  Serving on http://{addr}");
            Some((runtime, shutdown_tx))
        }
        Err(e) => {
            eprintln!("Warning: Could not start server: {e}");
            None
        }
    }
}

fn cmd_status() {
    let config = load_config();
    let settings = open_settings(&config);

    println!("Weather Sensor Agent Status");
    println!("===========================");
    println!();

    if let Ok(host) = hostname::get() {
        println!("Host: {}", host.to_string_lossy());
    }
    println!("Data directory: {:?}", config.data_path);
    println!();

    let app = read_app(settings.as_ref()).unwrap_or_default();
    println!("Settings:");
    println!("  Inactive after: {}s", app.inactive);
    println!("  Notify mask: {}", app.notify);
    match read_protocols(settings.as_ref()) {
        Some(protocols) => {
            for (id, watch) in protocols {
                println!(
                    "  {id}: {}",
                    if watch.watching { "watching" } else { "not watching" }
                );
            }
        }
        None => println!("  Protocols: all (default)"),
    }
    println!();

    print_cumulative(&config.stats_path());
}

fn print_cumulative(path: &Path) {
    if !path.exists() {
        println!("No previous session data found.");
        return;
    }
    let totals = StatsLog::with_persistence(path.to_path_buf())
        .cumulative(&BTreeMap::<String, ProtocolStats>::new());
    println!("Cumulative Statistics:");
    for (protocol, stats) in totals {
        println!("  {protocol}: {} payloads, {} decoded", stats.total, stats.ok);
    }
}

fn cmd_protocols() {
    let config = load_config();
    let settings = open_settings(&config);
    let mut registry = ProtocolRegistry::builtin_in(config.timezone);
    registry.load_selection(settings.as_ref());

    for info in registry.infos(config.locale) {
        println!(
            "{} {:<12} {}  ({})",
            if info.watching { "*" } else { " " },
            info.id,
            info.name,
            info.hint
        );
    }
}

fn cmd_watch(id: &str, watching: bool) {
    let config = load_config();
    let mut hub = build_hub(&config);

    if let Err(e) = hub.set_watching(id, watching) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    if watching {
        println!("Watching {id}.");
    } else {
        println!("No longer watching {id}.");
    }
}

fn cmd_update_app(update: impl FnOnce(&mut weather_sensor_agent::AppSettings)) {
    let config = load_config();
    let mut settings = open_settings(&config);

    let mut app = read_app(settings.as_ref()).unwrap_or_default();
    update(&mut app);

    let value = match serde_json::to_value(app) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error encoding settings: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.set(KEY_APP, value) {
        eprintln!("Error saving settings: {e}");
        std::process::exit(1);
    }
    println!(
        "Settings saved: inactive after {}s, notify mask {}.",
        app.inactive, app.notify
    );
}

fn cmd_config(save: bool) {
    let config = load_config();

    if save {
        match config.save() {
            Ok(()) => println!("Saved configuration to {:?}", Config::config_path()),
            Err(e) => {
                eprintln!("Error saving configuration: {e}");
                std::process::exit(1);
            }
        }
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!("Settings file: {:?}", config.settings_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let (id, name) = parse_pair("Nexus-TH:42:1=Garden").unwrap();
        assert_eq!(id, CompositeId::new("Nexus-TH", "42", 1));
        assert_eq!(name, "Garden");

        assert!(parse_pair("Nexus-TH:42:1").is_none());
        assert!(parse_pair("Nexus-TH:42:1=").is_none());
        assert!(parse_pair("nonsense=Garden").is_none());
    }
}
