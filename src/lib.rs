//! # netsim
//!
//! A programmable network node simulator: a configurable set of network
//! endpoints (TCP/UDP/length-prefixed/messaging-socket protocols), each
//! carrying a typed message catalog, plus a control protocol a test driver
//! uses to inspect and mutate the simulated network while it runs.

pub mod cli;
pub mod config;
pub mod constants;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod interface;
pub mod logging;
pub mod network;
pub mod node;
pub mod signal;
pub mod statemachine;
pub mod wrappers;

pub use error::{NetError, NetResult};
pub use network::NetworkController;
pub use node::{Node, NodeConfig, Protocol, Role};
pub use signal::{Signal, SignalBus};

/// The current version of the simulator.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
