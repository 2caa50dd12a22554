use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use pg_replay::capture::{read_capture_file, CapturedPacket};
use pg_replay::config::{
    CaptureConfig, ReplayConfig, ServerEndpoint, DEFAULT_CAPTURE_HOST, DEFAULT_CAPTURE_PORT,
    DEFAULT_RATE,
};
use pg_replay::stream::{ClientMessage, FlowTable};
use pg_replay::{Replayer, Result};

#[derive(Parser, Debug)]
#[command(name = "pg-replay")]
#[command(about = "Reconstructs and replays PostgreSQL traffic from packet captures", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to the pcap file")]
    pcap: PathBuf,

    #[arg(
        short = 'H',
        long,
        default_value = DEFAULT_CAPTURE_HOST,
        help = "PostgreSQL server address in the capture (empty or 0.0.0.0 matches any)"
    )]
    host: String,

    #[arg(
        short = 'P',
        long,
        default_value_t = DEFAULT_CAPTURE_PORT,
        help = "PostgreSQL server port in the capture"
    )]
    port: u16,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the reconstructed client messages
    Inspect {
        #[arg(long, value_enum, default_value = "both", help = "Which capture side to feed in")]
        filter: FilterSide,

        #[arg(long, help = "Emit one JSON record per message")]
        json: bool,
    },
    /// Replay the reconstructed client messages against a live server
    Replay {
        #[arg(long, default_value = "127.0.0.1", help = "Target host")]
        target_host: String,

        #[arg(long, default_value_t = 5432, help = "Target port")]
        target_port: u16,

        #[arg(long, default_value_t = DEFAULT_RATE, help = "Replay rate (1.0 = original spacing)")]
        rate: f64,

        #[arg(long, default_value_t = 3, help = "Write attempts per message")]
        max_retries: u32,

        #[arg(long, help = "Print query text in progress records")]
        print_query: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterSide {
    Both,
    Clients,
    Server,
}

impl FilterSide {
    fn keeps(self, endpoint: &ServerEndpoint, packet: &CapturedPacket) -> bool {
        match self {
            FilterSide::Both => true,
            FilterSide::Clients => endpoint.matches(packet.dst),
            FilterSide::Server => endpoint.matches(packet.src),
        }
    }
}

#[derive(Serialize)]
struct InspectRecord {
    index: usize,
    first_ts: DateTime<Utc>,
    last_ts: DateTime<Utc>,
    kind: String,
    len: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_complete_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ready_for_query_ts: Option<DateTime<Utc>>,
}

impl InspectRecord {
    fn new(index: usize, message: &ClientMessage) -> Self {
        Self {
            index,
            first_ts: message.first_ts,
            last_ts: message.last_ts,
            kind: message.kind_label(),
            len: message.len,
            query: message.query_text(),
            command_complete_ts: message.command_complete_ts,
            ready_for_query_ts: message.ready_for_query_ts,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.json_logs, cli.verbose);

    info!("Starting pg-replay v{}", env!("CARGO_PKG_VERSION"));

    let capture = CaptureConfig {
        pcap_path: cli.pcap,
        server_host: cli.host,
        server_port: cli.port,
    };

    let result = match cli.command {
        Command::Inspect { filter, json } => run_inspect(&capture, filter, json),
        Command::Replay {
            target_host,
            target_port,
            rate,
            max_retries,
            print_query,
        } => {
            let config = ReplayConfig {
                target_host,
                target_port,
                rate,
                max_retries,
                print_query,
            };
            run_replay(&capture, config).await
        }
    };

    if let Err(error) = &result {
        error!("{error}");
    }
    result
}

fn collect_messages(capture: &CaptureConfig, filter: FilterSide) -> Result<Vec<ClientMessage>> {
    let endpoint = capture.endpoint()?;
    let packets = read_capture_file(&capture.pcap_path, &endpoint)?;

    let mut table = FlowTable::new(endpoint);
    for packet in &packets {
        if !filter.keeps(&endpoint, packet) {
            continue;
        }
        if let Err(error) = table.route(packet) {
            debug!(%error, src = %packet.src, dst = %packet.dst, "packet skipped");
        }
    }

    let mut messages = table.collect();
    messages.sort_by_key(|message| message.first_ts);
    Ok(messages)
}

fn run_inspect(capture: &CaptureConfig, filter: FilterSide, json: bool) -> Result<()> {
    let messages = collect_messages(capture, filter)?;
    info!(messages = messages.len(), "reconstructed client messages");

    for (index, message) in messages.iter().enumerate() {
        if json {
            let record = InspectRecord::new(index + 1, message);
            println!("{}", serde_json::to_string(&record)?);
            continue;
        }
        println!(
            "{:>4} | {} | {} | {}",
            index + 1,
            message.first_ts.format("%Y-%m-%d %H:%M:%S%.6f"),
            message.kind_label(),
            message.query_text().unwrap_or_else(|| "-".to_string()),
        );
        if let Some(ts) = message.command_complete_ts {
            debug!(seq = index + 1, command_complete = %ts, "correlated");
        }
    }
    Ok(())
}

async fn run_replay(capture: &CaptureConfig, config: ReplayConfig) -> Result<()> {
    config.validate()?;
    let messages = collect_messages(capture, FilterSide::Both)?;
    if messages.is_empty() {
        info!("no messages extracted, nothing to replay");
        return Ok(());
    }

    let summary = Replayer::new(config, messages).run().await?;
    info!(
        succeeded = summary.succeeded,
        total = summary.total,
        elapsed = ?summary.elapsed,
        "replay finished"
    );
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_replay=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_replay=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
