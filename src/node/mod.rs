//! Node runtime: one network endpoint per [`Node`], owning a server or
//! client transport for exactly one of the eight protocol variants, its
//! message catalog, send queue, and periodic-emission tasks.

pub mod framing;
pub mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::dispatcher::DispatchKind;
use crate::interface::MessageInterface;
use crate::signal::SignalBus;
use crate::wrappers::MessageWrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    SpecTcp,
    SpecUdp,
    ZmqReq,
    ZmqRep,
    ZmqPush,
    ZmqPull,
}

impl Protocol {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            "SPEC_TCP" => Protocol::SpecTcp,
            "SPEC_UDP" => Protocol::SpecUdp,
            "ZMQ_REQ" => Protocol::ZmqReq,
            "ZMQ_REP" => Protocol::ZmqRep,
            "ZMQ_PUSH" => Protocol::ZmqPush,
            "ZMQ_PULL" => Protocol::ZmqPull,
            other => anyhow::bail!("unknown protocol: {other}"),
        })
    }

    pub fn is_messaging_socket(&self) -> bool {
        matches!(
            self,
            Protocol::ZmqReq | Protocol::ZmqRep | Protocol::ZmqPush | Protocol::ZmqPull
        )
    }

    pub fn is_datagram(&self) -> bool {
        matches!(self, Protocol::Udp | Protocol::SpecUdp)
    }

    pub fn is_spec_framed(&self) -> bool {
        matches!(self, Protocol::SpecTcp | Protocol::SpecUdp)
    }

    pub fn dispatch_kind(&self) -> DispatchKind {
        match self {
            Protocol::Tcp | Protocol::Udp => DispatchKind::Opaque,
            Protocol::SpecTcp | Protocol::SpecUdp => DispatchKind::Spec,
            Protocol::ZmqReq | Protocol::ZmqRep | Protocol::ZmqPush | Protocol::ZmqPull => {
                DispatchKind::Control
            }
        }
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Protocol::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
    Bidirectional,
}

impl Role {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "SERVER" => Role::Server,
            "CLIENT" => Role::Client,
            "BIDIRECTIONAL" => Role::Bidirectional,
            other => anyhow::bail!("unknown role: {other}"),
        })
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Role::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    In,
    Out,
    TwoWay,
}

impl<'de> Deserialize<'de> for MessageDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.to_ascii_lowercase().as_str() {
            "in" => MessageDirection::In,
            "out" => MessageDirection::Out,
            "two_way" | "twoway" | "two-way" => MessageDirection::TwoWay,
            other => return Err(serde::de::Error::custom(format!("unknown direction: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageConfig {
    pub direction: MessageDirection,
    #[serde(default)]
    pub periodic: bool,
    #[serde(default)]
    pub interval: Option<f64>,
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub exclude_from_log: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub protocol: Protocol,
    pub role: Role,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub messages: HashMap<String, MessageConfig>,
}

pub(crate) enum SenderCmd {
    Send(Vec<u8>),
    Exit,
}

/// One network endpoint. Constructed by [`crate::network::NetworkController::init`]
/// from a [`NodeConfig`] entry, always held behind `Arc<Node>` once created
/// so its tasks can share ownership.
pub struct Node {
    pub name: String,
    pub role: Role,
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub messages: HashMap<String, MessageWrapper>,
    pub interface: Arc<dyn MessageInterface>,
    pub bus: Arc<SignalBus>,
    pub exclude_from_log: HashSet<String>,

    pub(crate) running: AtomicBool,
    pub(crate) connected: AtomicBool,
    pub(crate) last_message_sent: AsyncMutex<Option<String>>,
    pub(crate) last_response: AsyncMutex<Option<Value>>,
    pub(crate) sender_tx: AsyncMutex<Option<mpsc::UnboundedSender<SenderCmd>>>,
    pub(crate) periodic_active: AsyncMutex<HashSet<String>>,
    pub(crate) worker_handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        config: &NodeConfig,
        messages: HashMap<String, MessageWrapper>,
        interface: Arc<dyn MessageInterface>,
        bus: Arc<SignalBus>,
    ) -> Self {
        let exclude_from_log = config
            .messages
            .iter()
            .filter(|(_, m)| m.exclude_from_log)
            .map(|(name, _)| name.clone())
            .collect();
        Node {
            name: name.into(),
            role: config.role,
            protocol: config.protocol,
            host: config.host.clone(),
            port: config.port,
            messages,
            interface,
            bus,
            exclude_from_log,
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            last_message_sent: AsyncMutex::new(None),
            last_response: AsyncMutex::new(None),
            sender_tx: AsyncMutex::new(None),
            periodic_active: AsyncMutex::new(HashSet::new()),
            worker_handles: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn mark_connected(self: &Arc<Self>) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.bus
                .emit(&crate::signal::Signal::connected(&self.name), Value::Null)
                .await;
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
