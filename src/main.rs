//! # netsim - Network Node Simulator Entry Point
//!
//! Loads the four configuration files (network topology, control descriptor,
//! default payloads, glitch payloads), builds the network controller and the
//! state-machine manager, starts every node, and runs until a
//! `CloseNetworkRequest` control call arrives or the process receives
//! `SIGINT`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use netsim::cli::Args;
use netsim::control;
use netsim::dispatcher::DispatchKind;
use netsim::interface::json::JsonInterface;
use netsim::logging;
use netsim::network::NetworkController;
use netsim::signal::{sync_handler, SignalBus};
use netsim::{config, statemachine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logging_guards = logging::init(args.verbose, args.quiet)?;

    let network_config = config::load_network(&args.network)
        .with_context(|| format!("loading network configuration from {}", args.network.display()))?;
    let descriptor = config::load_descriptor(&args.descriptor)
        .with_context(|| format!("loading control descriptor from {}", args.descriptor.display()))?;
    let default_payloads = config::load_default_payloads(&args.default_payloads)
        .with_context(|| format!("loading default payloads from {}", args.default_payloads.display()))?;
    let glitch_payloads = config::load_glitch_payloads(&args.glitch_payloads)
        .with_context(|| format!("loading glitch payloads from {}", args.glitch_payloads.display()))?;

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let descriptor = Arc::new(descriptor);

    let controller = Arc::new(NetworkController::init(
        &network_config,
        &descriptor,
        &default_payloads,
        &glitch_payloads,
        interface,
        bus.clone(),
    )?);
    let sm = Arc::new(statemachine::Manager::new());

    // Every control-protocol node gets the fixed handler table, plus an
    // internal handler on `CloseNetworkRequest` that lets the control call
    // end the process, not just stop the nodes.
    let shutdown = Arc::new(tokio::sync::Notify::new());
    for (name, node_config) in &network_config {
        if node_config.protocol.dispatch_kind() != DispatchKind::Control {
            continue;
        }
        control::register_control_handlers(&bus, name, descriptor.clone(), controller.clone(), sm.clone());
        let shutdown = shutdown.clone();
        controller.register_handler(
            name,
            "CloseNetworkRequest",
            sync_handler(move |_| {
                shutdown.notify_one();
                None
            }),
        );
    }

    controller.start().await.context("starting network nodes")?;
    info!(node_count = network_config.len(), "netsim running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
        _ = shutdown.notified() => {
            info!("received CloseNetworkRequest, shutting down");
        }
    }

    controller.stop().await;
    Ok(())
}
