use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eip_commission::adapters::{self, list_ipv4_adapters};
use eip_commission::discovery::ArpTableResolver;
use eip_commission::domain::BootpRequestEvent;
use eip_commission::reporter::{ConsoleReporter, EventReporter};
use eip_commission::{
    BootpServer, Config, ConfigurationSequencer, DeviceConfiguration, DiscoveryEngine,
    RegistryEvent,
};

#[derive(Parser)]
#[command(name = "eip-commission")]
#[command(about = "Discover and commission EtherNet/IP devices")]
#[command(version)]
struct Cli {
    /// Settings file (default: $EIP_COMMISSION_CONFIG or /etc/eip-commission.conf)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Local adapter address to work from
    #[arg(short, long, global = true)]
    adapter: Option<Ipv4Addr>,

    /// Subnet mask of the local adapter
    #[arg(long, global = true)]
    adapter_mask: Option<Ipv4Addr>,

    /// Show more detail per event
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List local IPv4 adapters
    Adapters,

    /// Broadcast List Identity and show responding devices
    Scan {
        /// Number of discovery cycles
        #[arg(long, default_value_t = 1)]
        cycles: u32,

        /// Pause between cycles in milliseconds
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
    },

    /// Read the TCP/IP Interface settings of a device
    Read {
        /// Current device address
        target: Ipv4Addr,
    },

    /// Write new network settings to a device
    Configure {
        /// Current device address
        target: Ipv4Addr,

        #[arg(long)]
        ip: Ipv4Addr,

        #[arg(long)]
        mask: Ipv4Addr,

        #[arg(long)]
        gateway: Option<Ipv4Addr>,

        #[arg(long)]
        hostname: Option<String>,

        #[arg(long)]
        dns: Option<Ipv4Addr>,
    },

    /// Answer BootP requests from unconfigured devices
    Bootp {
        /// Assign this address to the first request and exit
        #[arg(long)]
        assign: Option<Ipv4Addr>,

        /// Mask sent with the assignment (default: adapter mask)
        #[arg(long)]
        mask: Option<Ipv4Addr>,

        /// Router sent with the assignment
        #[arg(long)]
        gateway: Option<Ipv4Addr>,

        /// Port to listen on
        #[arg(long, default_value_t = 68)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load settings")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let reporter = ConsoleReporter::new()
        .with_colors(!cli.no_color)
        .with_verbose(cli.verbose);

    match cli.command {
        Command::Adapters => {
            for adapter in list_ipv4_adapters() {
                println!("{}", adapter);
            }
            Ok(())
        }
        Command::Scan {
            cycles,
            interval_ms,
        } => {
            let (adapter, mask) = resolve_adapter(cli.adapter, cli.adapter_mask, &config)?;
            run_scan(adapter, mask, cycles, Duration::from_millis(interval_ms), &config, &reporter)
                .await
        }
        Command::Read { target } => {
            let sequencer = sequencer_for(cli.adapter, &config);
            let current = sequencer
                .read_interface_configuration(target)
                .await
                .with_context(|| format!("Failed to read settings from {}", target))?;

            let show = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
            println!("IP Address:  {}", show(current.ip_address.map(|v| v.to_string())));
            println!("Subnet Mask: {}", show(current.subnet_mask.map(|v| v.to_string())));
            println!("Gateway:     {}", show(current.gateway.map(|v| v.to_string())));
            println!("Hostname:    {}", show(current.hostname));
            println!("DNS Server:  {}", show(current.dns_server.map(|v| v.to_string())));
            Ok(())
        }
        Command::Configure {
            target,
            ip,
            mask,
            gateway,
            hostname,
            dns,
        } => {
            let mut desired = DeviceConfiguration::new(ip, mask);
            desired.gateway = gateway;
            desired.hostname = hostname;
            desired.dns_server = dns;

            let sequencer = sequencer_for(cli.adapter, &config);
            let result = sequencer
                .configure(target, &desired, |current, total, name| {
                    reporter.report_progress(current, total, name)
                })
                .await
                .with_context(|| format!("Failed to configure {}", target))?;

            reporter.report_write_result(target, &result);
            if !result.is_success() {
                bail!(
                    "{} of {} settings written: {}",
                    result.success_count(),
                    result.results.len(),
                    result.first_error_message().unwrap_or("unknown error")
                );
            }
            if target != ip {
                info!("{} now answers at {}", target, ip);
            }
            Ok(())
        }
        Command::Bootp {
            assign,
            mask,
            gateway,
            port,
        } => {
            let (adapter, adapter_mask) = resolve_adapter(cli.adapter, cli.adapter_mask, &config)?;
            run_bootp(
                adapter,
                mask.unwrap_or(adapter_mask),
                assign,
                gateway,
                port,
                &reporter,
            )
            .await
        }
    }
}

/// Adapter address and mask from flags, then settings, then the first
/// usable interface.
fn resolve_adapter(
    address: Option<Ipv4Addr>,
    mask: Option<Ipv4Addr>,
    config: &Config,
) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let address = address.or(config.adapter_address);
    let mask = mask.or(config.subnet_mask);

    match address {
        Some(address) => {
            let mask = match mask {
                Some(mask) => mask,
                None => {
                    adapters::find_by_address(address)
                        .ok_or_else(|| anyhow!("No local adapter has address {}", address))?
                        .mask
                }
            };
            Ok((address, mask))
        }
        None => {
            let adapter = adapters::default_adapter()
                .ok_or_else(|| anyhow!("No usable network adapter; pass --adapter"))?;
            info!("Using adapter {}", adapter);
            Ok((adapter.address, mask.unwrap_or(adapter.mask)))
        }
    }
}

fn sequencer_for(adapter: Option<Ipv4Addr>, config: &Config) -> ConfigurationSequencer {
    let sequencer = ConfigurationSequencer::new().with_settings(config.sequencer_settings());
    match adapter.or(config.adapter_address) {
        Some(adapter) => sequencer.with_local_adapter(adapter),
        None => sequencer,
    }
}

async fn run_scan(
    adapter: Ipv4Addr,
    mask: Ipv4Addr,
    cycles: u32,
    interval: Duration,
    config: &Config,
    reporter: &ConsoleReporter,
) -> Result<()> {
    let engine = DiscoveryEngine::with_settings(
        Arc::new(ArpTableResolver::default()),
        config.discovery_settings(),
    );
    let mut events = engine.subscribe();

    reporter.on_start(&format!("Scanning from {} (mask {})", adapter, mask));
    for cycle in 1..=cycles.max(1) {
        let summary = tokio::select! {
            summary = engine.run_cycle(adapter, mask) => summary.context("Scan failed")?,
            _ = tokio::signal::ctrl_c() => break,
        };
        drain_events(&mut events, reporter);
        info!("Cycle {}: {} device(s) registered", cycle, summary.registered);

        if cycle < cycles {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }
    reporter.on_stop();

    let devices = engine.devices().await;
    println!("{} device(s):", devices.len());
    for device in &devices {
        reporter.report_device(&RegistryEvent::Updated(device.clone()));
    }
    Ok(())
}

fn drain_events(events: &mut Receiver<RegistryEvent>, reporter: &ConsoleReporter) {
    loop {
        match events.try_recv() {
            Ok(event) => reporter.report_device(&event),
            Err(TryRecvError::Lagged(skipped)) => warn!("{} registry event(s) not shown", skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

async fn run_bootp(
    adapter: Ipv4Addr,
    mask: Ipv4Addr,
    assign: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    port: u16,
    reporter: &ConsoleReporter,
) -> Result<()> {
    let mut server = BootpServer::new().with_listen_port(port);
    let mut requests = server.start(adapter)?;
    reporter.on_start(&format!("Waiting for BootP requests on port {} ({})", port, adapter));

    loop {
        let event = tokio::select! {
            event = requests.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        reporter.report_bootp_request(&event);

        let decision = match assign {
            Some(ip) => Some((ip, mask, gateway)),
            None => prompt_assignment(&event, mask, gateway).await?,
        };
        let Some((ip, mask, gateway)) = decision else {
            continue;
        };

        let dest = server.send_reply(&event.packet, ip, mask, gateway).await?;
        println!("Sent {} to {} via {}", ip, event.packet.client_mac(), dest);
        if assign.is_some() {
            break;
        }
    }

    server.stop().await?;
    reporter.on_stop();
    Ok(())
}

/// Asks on stdin for `ip [mask] [gateway]`; a blank line skips the request.
async fn prompt_assignment(
    event: &BootpRequestEvent,
    default_mask: Ipv4Addr,
    default_gateway: Option<Ipv4Addr>,
) -> Result<Option<(Ipv4Addr, Ipv4Addr, Option<Ipv4Addr>)>> {
    print!("Assign to {} (ip [mask] [gateway], blank to skip): ", event.packet.client_mac());
    io::stdout().flush()?;

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .context("Input task failed")??;

    parse_assignment(&line, default_mask, default_gateway)
}

fn parse_assignment(
    line: &str,
    default_mask: Ipv4Addr,
    default_gateway: Option<Ipv4Addr>,
) -> Result<Option<(Ipv4Addr, Ipv4Addr, Option<Ipv4Addr>)>> {
    let mut parts = line.split_whitespace();
    let Some(ip) = parts.next() else {
        return Ok(None);
    };

    let ip: Ipv4Addr = ip.parse().with_context(|| format!("Invalid address: {}", ip))?;
    let mask = match parts.next() {
        Some(mask) => mask.parse().with_context(|| format!("Invalid mask: {}", mask))?,
        None => default_mask,
    };
    let gateway = match parts.next() {
        Some(gateway) => Some(
            gateway
                .parse()
                .with_context(|| format!("Invalid gateway: {}", gateway))?,
        ),
        None => default_gateway,
    };
    Ok(Some((ip, mask, gateway)))
}
