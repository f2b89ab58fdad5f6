//! Mi Home toolkit entry point.
//!
//! One binary, three jobs:
//!
//! - `discover` finds miIO devices on the local network by UDP broadcast.
//! - `probe` checks whether one specific address answers the protocol.
//! - `devices` logs in to the cloud account and prints the registered
//!   devices with their tokens, which the local protocol needs.
//!
//! # Usage
//!
//! ```text
//! mihome discover [--timeout SECS] [--port PORT] [--target IP]... [--stop-on HEX_ID]
//! mihome probe <IP> [--device-id HEX_ID] [--attempts N] [--wait SECS] [--port PORT]
//! mihome devices [--username USER] [--password PASS] [--speakers-only | --model SUBSTRING]
//! ```
//!
//! # Configuration
//!
//! Defaults come from a TOML config file (see [`config`]); command-line
//! flags override the file. Environment variables cover the values that
//! are awkward on the command line:
//!
//! | Variable          | Description                           |
//! |-------------------|---------------------------------------|
//! | `MIHOME_CONFIG`   | Path to the TOML config file          |
//! | `MIHOME_USERNAME` | Cloud account username                |
//! | `MIHOME_PASSWORD` | Cloud account password                |
//! | `RUST_LOG`        | Log filter (default `info`)           |
//!
//! # Architecture overview
//!
//! ```text
//! mihome (this binary)
//!   discover/probe -> miio-discovery -> UDP broadcast on the LAN
//!   devices        -> micloud        -> account.xiaomi.com + api.io.mi.com
//! ```
//!
//! Logs go to stderr so command output stays pipeable.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use micloud::{CloudClient, CloudConfig};
use miio_discovery::{DiscoveryConfig, DiscoveryEngine};
use miio_proto::DeviceId;

mod config;

use config::{AccountConfig, DiscoverySettings};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN discovery and cloud token retrieval for Mi Home devices.
#[derive(Debug, Parser)]
#[command(
    name = "mihome",
    about = "LAN discovery and cloud token retrieval for Mi Home devices",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    ///
    /// Defaults to the platform config location; a missing file simply
    /// means built-in defaults.
    #[arg(long, global = true, env = "MIHOME_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the local network for devices.
    Discover {
        /// Session length in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Destination UDP port for probes.
        #[arg(long)]
        port: Option<u16>,

        /// Extra unicast address to probe; repeatable.
        ///
        /// Useful on networks where the access point filters broadcast
        /// traffic and devices only answer directed packets.
        #[arg(long = "target", value_name = "IP")]
        targets: Vec<String>,

        /// Stop as soon as this device id (8 hex chars) responds.
        #[arg(long, value_name = "HEX_ID")]
        stop_on: Option<String>,
    },

    /// Probe a single address for a protocol response.
    Probe {
        /// Address to probe.
        #[arg(value_name = "IP")]
        ip: String,

        /// Known device id (8 hex chars); enables the directed handshake
        /// that some devices require before they answer.
        #[arg(long, value_name = "HEX_ID")]
        device_id: Option<String>,

        /// Destination UDP port.
        #[arg(long)]
        port: Option<u16>,

        /// Attempts before giving up.
        #[arg(long)]
        attempts: Option<u32>,

        /// Seconds to wait for a reply after each attempt.
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Log in to the cloud account and list its devices and tokens.
    Devices {
        /// Account username: email, phone number, or numeric Mi id.
        #[arg(long, env = "MIHOME_USERNAME")]
        username: Option<String>,

        /// Account password.
        #[arg(long, env = "MIHOME_PASSWORD")]
        password: Option<String>,

        /// Only show WiFi speaker models.
        #[arg(long, conflicts_with = "model")]
        speakers_only: bool,

        /// Only show devices whose model contains this substring.
        #[arg(long, value_name = "SUBSTRING")]
        model: Option<String>,
    },
}

// ── Config resolution ─────────────────────────────────────────────────────────

/// Builds the engine configuration from the config file section alone.
fn discovery_config(settings: &DiscoverySettings) -> anyhow::Result<DiscoveryConfig> {
    let bind_address: IpAddr = settings
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}' in config", settings.bind_address))?;

    let mut probe_targets = Vec::with_capacity(settings.targets.len());
    for target in &settings.targets {
        let addr: IpAddr = target
            .parse()
            .with_context(|| format!("invalid probe target '{target}' in config"))?;
        probe_targets.push(addr);
    }

    let stop_on = settings
        .target_device_id
        .as_deref()
        .map(parse_device_id)
        .transpose()?;

    Ok(DiscoveryConfig {
        bind_address,
        port: settings.port,
        timeout: Duration::from_secs(settings.timeout_secs),
        probe_targets,
        stop_on,
        ..DiscoveryConfig::default()
    })
}

/// File settings with the `discover` flags layered on top.
fn resolve_discover(
    settings: &DiscoverySettings,
    timeout: Option<u64>,
    port: Option<u16>,
    extra_targets: &[String],
    stop_on: Option<&str>,
) -> anyhow::Result<DiscoveryConfig> {
    let mut config = discovery_config(settings)?;
    if let Some(secs) = timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(port) = port {
        config.port = port;
    }
    for target in extra_targets {
        let addr: IpAddr = target
            .parse()
            .with_context(|| format!("invalid probe target '{target}'"))?;
        config.probe_targets.push(addr);
    }
    if let Some(text) = stop_on {
        config.stop_on = Some(parse_device_id(text)?);
    }
    Ok(config)
}

/// File settings with the `probe` flags layered on top.
fn resolve_probe(
    settings: &DiscoverySettings,
    port: Option<u16>,
    attempts: Option<u32>,
    wait: Option<u64>,
) -> anyhow::Result<DiscoveryConfig> {
    let mut config = discovery_config(settings)?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(attempts) = attempts {
        config.probe_attempts = attempts;
    }
    if let Some(secs) = wait {
        config.probe_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Resolves cloud credentials: flags win over the config file.
fn resolve_credentials(
    account: &AccountConfig,
    username: Option<String>,
    password: Option<String>,
) -> anyhow::Result<CloudConfig> {
    let username = username.or_else(|| account.username.clone()).context(
        "no username: pass --username, set MIHOME_USERNAME, or add it to the config file",
    )?;
    let password = password.or_else(|| account.password.clone()).context(
        "no password: pass --password, set MIHOME_PASSWORD, or add it to the config file",
    )?;

    let mut config = CloudConfig::new(username, password);
    config.device_id = account.passport_device_id.clone();
    if let Some(url) = &account.api_base_url {
        config.api_base_url = url.clone();
    }
    Ok(config)
}

fn parse_device_id(text: &str) -> anyhow::Result<DeviceId> {
    text.parse()
        .with_context(|| format!("invalid device id '{text}' (expected 8 hex chars)"))
}

// ── Command handlers ──────────────────────────────────────────────────────────

fn run_discover(config: DiscoveryConfig) -> anyhow::Result<()> {
    let engine = DiscoveryEngine::new(config);
    let devices = engine.discover()?;

    if devices.is_empty() {
        println!("no devices responded");
        return Ok(());
    }

    let mut records: Vec<_> = devices.values().collect();
    records.sort_by_key(|record| record.addr);
    println!("{} device(s) responded:", records.len());
    for record in records {
        println!(
            "  {:<15}  id {}  type {}",
            record.addr, record.device_id, record.device_type
        );
    }
    Ok(())
}

fn run_probe(
    config: DiscoveryConfig,
    ip: IpAddr,
    device_id: Option<DeviceId>,
) -> anyhow::Result<()> {
    let attempts = config.probe_attempts;
    let engine = DiscoveryEngine::new(config);
    match engine.probe_device(ip, device_id)? {
        Some(record) => {
            println!("device at {} answered:", record.addr);
            println!("  id:   {}", record.device_id);
            println!("  type: {}", record.device_type);
            Ok(())
        }
        None => anyhow::bail!("no response from {ip} after {attempts} attempt(s)"),
    }
}

fn run_devices(config: CloudConfig, speakers_only: bool, model: Option<&str>) -> anyhow::Result<()> {
    let mut client = CloudClient::new(config)?;
    client.login()?;
    let devices = client.list_devices()?;

    let shown: Vec<_> = devices
        .iter()
        .filter(|device| match model {
            Some(substr) => device.model.contains(substr),
            None => !speakers_only || device.is_wifi_speaker(),
        })
        .collect();
    if shown.is_empty() {
        println!("no matching devices");
        return Ok(());
    }

    for device in shown {
        println!("{}", device.name);
        println!("  model:  {}", device.model);
        println!("  did:    {}", device.did);
        if let Some(ip) = &device.local_ip {
            println!("  ip:     {ip}");
        }
        if let Some(mac) = &device.mac {
            println!("  mac:    {mac}");
        }
        if let Some(token) = &device.token {
            println!("  token:  {token}");
        }
        println!("  online: {}", device.is_online);
        println!();
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity; logs go to stderr so stdout stays
    // clean for the command output itself.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let app_config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    match cli.command {
        Command::Discover {
            timeout,
            port,
            targets,
            stop_on,
        } => {
            let config = resolve_discover(
                &app_config.discovery,
                timeout,
                port,
                &targets,
                stop_on.as_deref(),
            )?;
            run_discover(config)
        }
        Command::Probe {
            ip,
            device_id,
            port,
            attempts,
            wait,
        } => {
            let config = resolve_probe(&app_config.discovery, port, attempts, wait)?;
            let ip: IpAddr = ip
                .parse()
                .with_context(|| format!("invalid address '{ip}'"))?;
            let device_id = device_id.as_deref().map(parse_device_id).transpose()?;
            run_probe(config, ip, device_id)
        }
        Command::Devices {
            username,
            password,
            speakers_only,
            model,
        } => {
            let config = resolve_credentials(&app_config.account, username, password)?;
            run_devices(config, speakers_only, model.as_deref())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
