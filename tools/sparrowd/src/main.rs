// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! sparrowd - Sparrow device management server.
//!
//! Bootstraps against a border router, configures its radio, then runs
//! the device server until interrupted: discovering devices, grabbing
//! them with the watchdog handshake and keeping them in the network.

use clap::Parser;
use sparrow::config::parse_value;
use sparrow::{DeviceServer, ServerConfig};

/// Sparrow device management server
#[derive(Parser, Debug)]
#[command(name = "sparrowd")]
#[command(version)]
#[command(about = "Grab Sparrow devices and keep them in the network")]
struct Args {
    /// Border router host used for bootstrap
    #[arg(short = 'a', long = "router")]
    router: Option<String>,

    /// Server address announced to devices (derived from the router
    /// prefix when unset)
    #[arg(short = 'b', long = "bind")]
    bind: Option<String>,

    /// Radio channel (0x/#/$/0b/0o literals accepted)
    #[arg(short = 'c', long = "channel", value_parser = parse_number)]
    channel: Option<u64>,

    /// Radio PAN id
    #[arg(short = 'P', long = "panid", value_parser = parse_number)]
    panid: Option<u64>,

    /// Grab every device heard on the network (non-zero enables)
    #[arg(short = 'g', long = "grab-all", value_parser = parse_number)]
    grab_all: Option<u64>,

    /// Comma-separated address-suffix allow-list for takeover
    #[arg(short = 't', long = "accept")]
    accept: Option<String>,

    /// Device address to manage from the start
    device: Option<String>,
}

fn parse_number(text: &str) -> Result<u64, String> {
    parse_value(text).ok_or_else(|| format!("invalid numeric literal: {text}"))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(router) = args.router {
        config.router_host = router;
    }
    if let Some(bind) = args.bind {
        config.server_host = Some(bind);
    }
    if let Some(channel) = args.channel {
        config.radio_channel = channel as u32;
    }
    if let Some(panid) = args.panid {
        config.radio_panid = panid as u32;
    }
    if let Some(grab_all) = args.grab_all {
        config.grab_all = grab_all != 0;
    }
    if let Some(accept) = args.accept {
        config.accept_nodes = Some(accept.split(',').map(str::to_string).collect());
    }

    let server = DeviceServer::new(config);
    if let Some(device) = args.device.as_deref() {
        server.add_device(device);
    }

    {
        let server = server.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            log::info!("[sparrowd] shutting down");
            server.stop();
        }) {
            log::warn!("[sparrowd] failed to install signal handler: {err}");
        }
    }

    if let Err(err) = server.setup() {
        log::error!("[sparrowd] bootstrap failed: {err}");
        eprintln!("No border router found. Please make sure a border router is running!");
        std::process::exit(1);
    }
    if let Err(err) = server.set_channel_panid() {
        log::warn!("[sparrowd] failed to set channel/PAN id: {err}");
    }

    println!(
        "Sparrow device server at [{}]:{} (channel {}, PAN id 0x{:04x})",
        server.server_address(),
        server.config().udp_port,
        server.config().radio_channel,
        server.config().radio_panid
    );

    if let Err(err) = server.serve() {
        log::error!("[sparrowd] server stopped with error: {err}");
        std::process::exit(1);
    }
    log::info!("[sparrowd] device server stopped");
}
