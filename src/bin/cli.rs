//! Signalgen CLI - Command-line probe
//!
//! Exercises any configured channel from the shell: receive a batch, send
//! generated samples, or probe the remote status, with the same retry and
//! observability behavior the library applies everywhere.

use clap::{Parser, Subcommand, ValueEnum};
use signalgen_core::{
    ChannelConfig, ChannelFactory, ChannelServices, ConsoleSink, ErrorAggregator, LogPipeline,
    LogSink, PerformanceTracker, ProfileFile, RotatingFileSink, Sample,
};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Signalgen CLI
#[derive(Parser, Debug)]
#[command(
    name = "signalgen",
    version,
    about = "Multi-protocol signal channel probe",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (per-operation timing)
    #[arg(short, long)]
    verbose: bool,

    /// Mirror channel logs to stdout
    #[arg(long)]
    log_console: bool,

    /// Write channel logs to rotating files in this directory
    #[arg(short = 'l', long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Endpoint selection shared by the channel commands.
#[derive(clap::Args, Debug)]
struct Endpoint {
    /// Protocol tag (http, modbus, signalr)
    #[arg(short = 't', long, default_value = "http")]
    protocol: String,

    /// Host address
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "SIGNALGEN_HOST")]
    host: String,

    /// Port number
    #[arg(short, long, default_value = "5001", env = "SIGNALGEN_PORT")]
    port: u16,

    /// HTTP base path or hub path
    #[arg(long)]
    path: Option<String>,

    /// Per-operation timeout (ms)
    #[arg(long, default_value = "1000")]
    timeout: u64,

    /// Total attempts before a failure surfaces
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Load endpoint settings from a named profile instead
    #[arg(long, conflicts_with_all = ["host", "port", "path"])]
    profile: Option<String>,

    /// Profile file path
    #[arg(long, default_value = "channels.toml")]
    profile_file: PathBuf,
}

impl Endpoint {
    /// Resolve to a protocol tag plus channel configuration, consulting the
    /// profile file when a profile name was given.
    fn resolve(&self) -> anyhow::Result<(String, ChannelConfig)> {
        if let Some(name) = &self.profile {
            let file = ProfileFile::load(&self.profile_file)
                .map_err(|e| anyhow::anyhow!("cannot load {:?}: {e}", self.profile_file))?;
            let profile = file
                .find(name)
                .ok_or_else(|| anyhow::anyhow!("no profile named {name:?}"))?;
            return Ok((profile.protocol.clone(), profile.config.clone()));
        }

        let mut config = ChannelConfig::new(&self.host, self.port)
            .with_timeout_ms(self.timeout)
            .with_retries(self.retries, ChannelConfig::default().backoff_base_ms);
        if let Some(path) = &self.path {
            config = config.with_path(path);
        }
        Ok((self.protocol.clone(), config))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Receive a batch of samples from the channel
    Receive {
        #[command(flatten)]
        endpoint: Endpoint,

        /// Number of samples to request
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Generate samples locally and send them through the channel
    Send {
        #[command(flatten)]
        endpoint: Endpoint,

        /// Number of samples to generate
        #[arg(short, long, default_value = "10")]
        count: usize,

        /// Lower frequency bound (Hz)
        #[arg(long, default_value = "40.0")]
        min_freq: f64,

        /// Upper frequency bound (Hz)
        #[arg(long, default_value = "70.0")]
        max_freq: f64,
    },

    /// Probe the remote status
    Status {
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// List all profiles in a profile file
    List {
        /// Profile file path
        #[arg(long, default_value = "channels.toml")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut sinks: Vec<Arc<dyn LogSink>> = Vec::new();
    if cli.log_console {
        sinks.push(Arc::new(ConsoleSink));
    }
    if let Some(dir) = &cli.log_dir {
        sinks.push(Arc::new(RotatingFileSink::new(dir, "signalgen")));
    }

    let services = ChannelServices::new(
        Arc::new(LogPipeline::new(sinks)),
        Arc::new(ErrorAggregator::new()),
        Arc::new(PerformanceTracker::new()),
    );
    let logs = services.logs.clone();
    let metrics = services.metrics.clone();
    let factory = ChannelFactory::new(services);

    let result = match &cli.command {
        Commands::Receive { endpoint, count } => receive(&cli, &factory, endpoint, *count).await,
        Commands::Send {
            endpoint,
            count,
            min_freq,
            max_freq,
        } => send(&cli, &factory, endpoint, *count, *min_freq, *max_freq).await,
        Commands::Status { endpoint } => status(&cli, &factory, endpoint).await,
        Commands::Profile { action } => handle_profile(&cli, action),
    };

    if cli.verbose {
        print_metrics(&metrics);
    }
    logs.shutdown().await;

    result
}

async fn receive(
    cli: &Cli,
    factory: &ChannelFactory,
    endpoint: &Endpoint,
    count: usize,
) -> anyhow::Result<()> {
    let (protocol, config) = endpoint.resolve()?;
    let channel = factory.create(&protocol, config)?;

    let samples = channel.receive_samples(count).await?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&samples)?),
        OutputFormat::Text => {
            println!("Received {} samples from {}", samples.len(), channel.endpoint());
            for sample in &samples {
                println!(
                    "  {}  {:>7.2} Hz  {:>8.2} pw  [{}]",
                    sample.timestamp.format("%H:%M:%S%.3f"),
                    sample.frequency,
                    sample.power,
                    sample.protocol_type
                );
            }
        }
    }
    Ok(())
}

async fn send(
    cli: &Cli,
    factory: &ChannelFactory,
    endpoint: &Endpoint,
    count: usize,
    min_freq: f64,
    max_freq: f64,
) -> anyhow::Result<()> {
    let (protocol, config) = endpoint.resolve()?;
    let channel = factory.create(&protocol, config)?;

    let samples = Sample::generate(count, min_freq, max_freq, &protocol);
    let delivered = channel.send_samples(&samples).await?;

    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "sent": samples.len(), "delivered": delivered })
        ),
        OutputFormat::Text => {
            if delivered {
                println!("Sent {} samples to {}", samples.len(), channel.endpoint());
            } else {
                println!("Nothing sent");
            }
        }
    }
    Ok(())
}

async fn status(cli: &Cli, factory: &ChannelFactory, endpoint: &Endpoint) -> anyhow::Result<()> {
    let (protocol, config) = endpoint.resolve()?;
    let channel = factory.create(&protocol, config)?;

    let up = channel.monitor_status().await?;
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "endpoint": channel.endpoint(), "up": up })),
        OutputFormat::Text => println!(
            "{} is {}",
            channel.endpoint(),
            if up { "up" } else { "down" }
        ),
    }
    if !up {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_profile(cli: &Cli, action: &ProfileAction) -> anyhow::Result<()> {
    match action {
        ProfileAction::List { file } => {
            let profiles = ProfileFile::load(file)
                .map_err(|e| anyhow::anyhow!("cannot load {file:?}: {e}"))?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profiles)?),
                OutputFormat::Text => {
                    if profiles.channels.is_empty() {
                        println!("No profiles.");
                    }
                    for p in &profiles.channels {
                        println!("{:<20} {:<8} {}:{}", p.name, p.protocol, p.config.host, p.config.port);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_metrics(metrics: &PerformanceTracker) {
    let snapshot = metrics.snapshot();
    if snapshot.is_empty() {
        return;
    }
    let mut rows: Vec<_> = snapshot.into_values().collect();
    rows.sort_by(|a, b| a.operation.cmp(&b.operation));

    eprintln!("{:-<64}", "");
    eprintln!(
        "{:<16} {:>6} {:>10} {:>10} {:>10}",
        "operation", "calls", "avg ms", "min ms", "max ms"
    );
    for m in rows {
        eprintln!(
            "{:<16} {:>6} {:>10.1} {:>10} {:>10}",
            m.operation,
            m.total_calls,
            m.average_duration_ms(),
            m.min_duration_ms,
            m.max_duration_ms
        );
    }
}
