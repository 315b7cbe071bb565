use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use netmeter::{Endpoint, LatencyMeter, Options, ThroughputMeter, Transport};
use std::path::{Path, PathBuf};
use tracing::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "netmeter",
    version,
    about = "Measure round-trip latency and one-way throughput between two hosts",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the meters over HTTP.
    Http {
        #[arg(help = "The address to serve on", long, default_value = ":8080")]
        addr: String,
    },
    /// Forward one unix socket connection to a TCP address.
    Relay {
        #[arg(help = "The unix socket path to accept on", long)]
        from: PathBuf,
        #[arg(help = "The TCP address to forward to", long)]
        to: String,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(help = "Run the client side (default: server)", short, long)]
    client: bool,

    #[arg(
        help = "Latency options file (JSON, or TOML by extension)",
        long,
        value_name = "FILE"
    )]
    lat_opt_file: Option<PathBuf>,

    #[arg(
        help = "Throughput options file (JSON, or TOML by extension)",
        long,
        value_name = "FILE"
    )]
    tp_opt_file: Option<PathBuf>,

    #[arg(help = "Run only the latency meter", long, conflicts_with = "tp")]
    lat: bool,

    #[arg(help = "Run only the throughput meter", long)]
    tp: bool,

    #[arg(help = "Bytes per message", long)]
    msg_size: Option<usize>,

    #[arg(help = "Number of messages (round trips for latency)", long)]
    num_msg: Option<usize>,

    #[arg(help = "Server address, \":PORT\" for all interfaces", long)]
    addr: Option<String>,

    #[arg(help = "Transport: tcp or unix", long)]
    network: Option<Transport>,

    #[arg(help = "Local port the client dials from (0: any)", long)]
    client_port: Option<u16>,

    #[arg(help = "Client time limit in milliseconds", long)]
    timeout: Option<u64>,
}

/// The meters to run, already validated.
#[derive(Debug, Default)]
struct Plan {
    latency: Option<LatencyMeter>,
    throughput: Option<ThroughputMeter>,
}

impl RunArgs {
    fn has_overrides(&self) -> bool {
        self.msg_size.is_some()
            || self.num_msg.is_some()
            || self.addr.is_some()
            || self.network.is_some()
            || self.client_port.is_some()
            || self.timeout.is_some()
    }

    fn apply(&self, mut options: Options) -> Options {
        if let Some(msg_size) = self.msg_size {
            options.msg_size = msg_size;
        }
        if let Some(num_msg) = self.num_msg {
            options.num_msg = num_msg;
        }
        if let Some(addr) = &self.addr {
            options.addr = addr.clone();
        }
        if let Some(network) = self.network {
            options.network = network;
        }
        if let Some(client_port) = self.client_port {
            options.client_port = client_port;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        options
    }

    fn plan(&self) -> anyhow::Result<Plan> {
        let (latency, throughput) = if self.lat_opt_file.is_some() || self.tp_opt_file.is_some() {
            if self.has_overrides() {
                warn!("option files given, ignoring field flags");
            }
            let latency = match &self.lat_opt_file {
                Some(path) => Some(
                    Options::load(path, Options::latency())
                        .with_context(|| format!("bad latency options file {}", path.display()))?,
                ),
                None => None,
            };
            let throughput = match &self.tp_opt_file {
                Some(path) => Some(
                    Options::load(path, Options::throughput()).with_context(|| {
                        format!("bad throughput options file {}", path.display())
                    })?,
                ),
                None => None,
            };
            (latency, throughput)
        } else if self.lat {
            (Some(self.apply(Options::latency())), None)
        } else if self.tp {
            (None, Some(self.apply(Options::throughput())))
        } else {
            if self.has_overrides() {
                warn!("field flags need --lat or --tp, running default profiles");
            }
            (Some(Options::latency()), Some(Options::throughput()))
        };

        Ok(Plan {
            latency: latency
                .map(LatencyMeter::new)
                .transpose()
                .context("invalid latency options")?,
            throughput: throughput
                .map(ThroughputMeter::new)
                .transpose()
                .context("invalid throughput options")?,
        })
    }
}

impl Plan {
    async fn run_clients(self) {
        if let Some(meter) = self.latency {
            info!("latency client options: {}", meter.options());
            match meter.client().await {
                Ok(result) => println!("{result}"),
                Err(e) => error!("latency client failed: {e}"),
            }
        }
        if let Some(meter) = self.throughput {
            info!("throughput client options: {}", meter.options());
            match meter.client().await {
                Ok(result) => println!("{result}"),
                Err(e) => error!("throughput client failed: {e}"),
            }
        }
    }

    async fn run_servers(self) {
        let latency = async {
            if let Some(meter) = &self.latency {
                info!("latency server options: {}", meter.options());
                match meter.server().await {
                    Ok(()) => info!("latency server done"),
                    Err(e) => error!("latency server failed: {e}"),
                }
            }
        };
        let throughput = async {
            if let Some(meter) = &self.throughput {
                info!("throughput server options: {}", meter.options());
                match meter.server().await {
                    Ok(received) => info!(received, "throughput server done"),
                    Err(e) => error!("throughput server failed: {e}"),
                }
            }
        };
        tokio::join!(latency, throughput);
    }
}

/// Builds the unix inbound and TCP upstream endpoints of a relay.
fn relay_endpoints(from: &Path, to: String) -> anyhow::Result<(Endpoint, Endpoint)> {
    let from = from
        .to_str()
        .with_context(|| format!("relay path {} is not valid UTF-8", from.display()))?;
    Ok((
        Endpoint::new(Transport::Unix, from),
        Endpoint::new(Transport::Tcp, to),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Http { addr }) => {
            let (_, addr) = Endpoint::new(Transport::Tcp, addr).listen_target();
            netmeter_http::serve(addr.as_str())
                .await
                .with_context(|| format!("failed to serve on {addr}"))?;
        }
        Some(Command::Relay { from, to }) => {
            let (from, to) = relay_endpoints(&from, to)?;
            match netmeter::relay::relay(&from, &to).await {
                Ok(stats) => info!(?stats, "relay finished"),
                Err(e) => error!("relay failed: {e}"),
            }
        }
        None => {
            let plan = cli.run.plan()?;
            if cli.run.client {
                plan.run_clients().await;
            } else {
                plan.run_servers().await;
            }
        }
    }
    Ok(())
}
