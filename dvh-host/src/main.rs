//! dvhost - multi-protocol digital-voice modem host
//!
//! Wires the mode arbiter to the modem, the protocol gateways, the lock file
//! and the remote control port, then runs the tick loop until Ctrl+C or a
//! fatal modem failure.

mod config;
mod listener;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dvh_mux::{
    run_arbiter, Arbiter, AsyncModem, FrameRelay, HostCommand, IdLookup, LockFile, ModemAdapter,
    NoMarker, PresenceMarker, ProtocolDescriptor, TracingSink, UdpNetwork,
};
use dvh_protocol::Protocol;
use dvh_sim::SimModem;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{HostConfig, ModemTransport};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - digital-voice modem host");
const COMMAND_CHANNEL_BUFFER: usize = 32;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print the default configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Run against a simulated modem
    #[arg(long = "simulate")]
    simulate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_config {
        return match serde_json::to_string_pretty(&HostConfig::default()) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("dvhost: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let (mut config, path) = match HostConfig::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("dvhost: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if cli.simulate {
        config.modem.simulate = true;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    match run(config).await {
        Ok(()) => {
            info!("dvhost stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: HostConfig) -> anyhow::Result<()> {
    config.validate()?;
    let arbiter_config = config.arbiter_config()?;

    let modem: Box<dyn ModemAdapter> = if config.modem.simulate {
        info!("Using simulated modem");
        Box::new(SimModem::new())
    } else {
        let modem = match config.modem.transport {
            ModemTransport::Serial => AsyncModem::open(&config.modem.port, config.modem.baud_rate),
            ModemTransport::Udp => {
                AsyncModem::connect_udp(config.modem.local, config.modem.address).await
            }
        }
        .context("modem could not be opened")?;
        Box::new(modem)
    };

    let dmr_ids = load_lookup(config.lookups.dmr_ids.as_ref(), Protocol::Dmr);
    let nxdn_ids = load_lookup(config.lookups.nxdn_ids.as_ref(), Protocol::Nxdn);

    let mut descriptors = Vec::with_capacity(config.protocols.len());
    for settings in &config.protocols {
        let protocol = settings.protocol;
        let mut descriptor =
            ProtocolDescriptor::from_settings(settings, Box::new(FrameRelay::new(protocol)));

        if let Some(network) = &settings.network {
            let adapter = UdpNetwork::bind(protocol, network)
                .await
                .with_context(|| format!("{} network could not bind {}", protocol, network.local))?;
            descriptor = descriptor.with_network(Box::new(adapter));
        }

        let lookup = match protocol {
            Protocol::Dmr => dmr_ids.clone(),
            Protocol::Nxdn => nxdn_ids.clone(),
            _ => None,
        };
        if let Some(lookup) = lookup {
            descriptor = descriptor.with_lookup(lookup);
        }

        info!(
            "Registered {} ({}, hang {}s RF / {}s net)",
            protocol,
            if settings.enabled { "enabled" } else { "disabled" },
            settings.rf_hang_secs,
            settings.net_hang_secs
        );
        descriptors.push(descriptor);
    }

    let marker: Box<dyn PresenceMarker> = match &config.general.lock_file {
        Some(path) => Box::new(LockFile::new(path)),
        None => Box::new(NoMarker),
    };

    let arbiter = Arbiter::new(
        arbiter_config,
        descriptors,
        modem,
        Box::new(TracingSink),
        marker,
    )
    .context("arbiter could not start")?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);

    if config.remote.enabled {
        let tcp = TcpListener::bind(config.remote.listen)
            .await
            .with_context(|| format!("remote control could not bind {}", config.remote.listen))?;
        tokio::spawn(listener::serve(tcp, cmd_tx.clone()));
    }

    let shutdown_tx = cmd_tx;
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(HostCommand::Shutdown).await;
        }
    });

    run_arbiter(arbiter, cmd_rx, config.tick()).await?;
    Ok(())
}

fn load_lookup(path: Option<&PathBuf>, protocol: Protocol) -> Option<Arc<IdLookup>> {
    let path = path?;
    match IdLookup::load(path) {
        Ok(lookup) => Some(Arc::new(lookup)),
        Err(e) => {
            warn!("{} talker names unavailable: {}", protocol, e);
            None
        }
    }
}
