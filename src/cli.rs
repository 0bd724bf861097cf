//! # Command-Line Interface Module
//!
//! Argument parsing for the `netsim` binary: which YAML files to load, and
//! how verbose stdout logging should be. Uses `clap`'s derive API.

use clap::builder::styling::{AnsiColor, Styles};
use clap::Parser;
use std::path::PathBuf;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// netsim - a programmable network node simulator
///
/// Starts every node named in the network configuration, including the
/// control node(s) a test driver talks to, and runs until a
/// `CloseNetworkRequest` control call arrives or the process receives
/// `SIGINT`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Path to the network configuration YAML (node topology, protocols,
    /// message catalogs).
    #[arg(short = 'n', long, default_value = "network.yaml")]
    pub network: PathBuf,

    /// Path to the control descriptor YAML (required/optional payload keys
    /// per control request type).
    #[arg(short = 'd', long, default_value = "control.yaml")]
    pub descriptor: PathBuf,

    /// Path to the default payload file for OUT/TWO_WAY messages.
    #[arg(long, default_value = "default_payloads.yaml")]
    pub default_payloads: PathBuf,

    /// Path to the glitch payload file used to seed fault-injection shadows.
    #[arg(long, default_value = "glitch_payloads.yaml")]
    pub glitch_payloads: PathBuf,

    /// Increase stdout log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Suppress all but error-level stdout logging.
    #[arg(short, long, help_heading = "Output and Logging")]
    pub quiet: bool,
}
