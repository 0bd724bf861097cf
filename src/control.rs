//! Control handlers: the fixed request/reply surface registered on every
//! control node. Each handler validates its payload against the control
//! descriptor, executes the action against the [`NetworkController`]
//! (and, for the two state-machine-adjacent requests, the
//! [`crate::statemachine::Manager`]), and returns a reply envelope.
//!
//! Handler names are part of the external protocol and are preserved
//! bit-exact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::ControlDescriptor;
use crate::error::NetError;
use crate::network::NetworkController;
use crate::signal::{Signal, SignalBus};
use crate::statemachine::{Manager as StateMachineManager, RequirementState};

/// `{type: "SuccessReply", payload: {}}`.
fn success_reply() -> Value {
    serde_json::json!({ "type": "SuccessReply", "payload": {} })
}

/// `{type: "ErrorReply", payload: {error: kind, detail}}`. `kind` is either
/// one of [`NetError::kind_name`]'s tags, a handler-specific named error
/// (`RequiredKeyError`, `NeverReceivedMessage`, `ErrorFetchLastReceived`,
/// `UpdateGlobalVariableError`, ...), or an exception's class-name
/// equivalent for a handler body failure.
fn error_reply(kind: &str, detail: impl Into<String>) -> Value {
    serde_json::json!({ "type": "ErrorReply", "payload": { "error": kind, "detail": detail.into() } })
}

fn typed_reply(ty: &str, payload: Value) -> Value {
    serde_json::json!({ "type": ty, "payload": payload })
}

fn net_error_reply(err: NetError) -> Value {
    error_reply(err.kind_name(), err.detail())
}

/// Validate `payload` against `descriptor`: every `required` key must be
/// present, and every `optional` key absent from `payload` is filled from
/// its configured default. Returns the normalized payload object, or the
/// first missing required key's name.
fn validate_payload(descriptor: Option<&crate::config::RequestDescriptor>, payload: &Value) -> Result<Value, String> {
    let mut obj = payload.as_object().cloned().unwrap_or_default();
    if let Some(descriptor) = descriptor {
        for key in &descriptor.payload.required {
            if !obj.contains_key(key) {
                return Err(key.clone());
            }
        }
        for (key, default) in &descriptor.payload.optional {
            obj.entry(key.clone()).or_insert_with(|| default.clone());
        }
    }
    Ok(Value::Object(obj))
}

fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn get_node_name(payload: &Value) -> Option<&str> {
    // Use the provided node if present, else resolve from the message name.
    // A `null` or missing "node" key both mean "not provided".
    get_str(payload, "node")
}

/// Register the fixed handler set on `bus` for `node_name`, keyed
/// `(node_name, request_type)`, validating against `descriptor` before
/// dispatch. Exceptions from a handler body are not a concept this
/// implementation has (handlers return `NetResult`/plain values rather than
/// panicking); the "exception class name as error" contract is realized
/// entirely through [`NetError::kind_name`] and the handful of named
/// synthetic error kinds above.
pub fn register_control_handlers(
    bus: &SignalBus,
    node_name: &str,
    descriptor: Arc<ControlDescriptor>,
    network: Arc<NetworkController>,
    sm: Arc<StateMachineManager>,
) {
    macro_rules! connect {
        ($request_type:literal, $handler:expr) => {{
            let descriptor = descriptor.clone();
            let handler_fn = $handler;
            let node_name_owned = node_name.to_string();
            bus.connect(
                Signal::message(node_name, $request_type),
                Arc::new(move |payload: Value| {
                    let descriptor = descriptor.clone();
                    let handler_fn = handler_fn.clone();
                    let node_name_owned = node_name_owned.clone();
                    Box::pin(async move {
                        let entry = descriptor.get($request_type);
                        let validated = match validate_payload(entry, &payload) {
                            Ok(v) => v,
                            Err(missing_key) => {
                                warn!(node = %node_name_owned, request = $request_type, key = %missing_key, "control request missing required key");
                                return Some(error_reply("RequiredKeyError", missing_key));
                            }
                        };
                        Some(handler_fn(validated).await)
                    })
                }),
            );
        }};
    }

    let net = network.clone();
    connect!("SendMessageRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            match net.send_message(&message, node.as_deref()).await {
                Ok(()) => success_reply(),
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("StartPeriodicMessageRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            let interval = payload.get("interval").and_then(Value::as_f64).unwrap_or(1.0);
            match net.start_periodic(&message, node.as_deref(), interval).await {
                Ok(()) => success_reply(),
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("StopPeriodicMessageRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            match net.stop_periodic(&message, node.as_deref()).await {
                Ok(()) => success_reply(),
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("MessageCountRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            match net.in_wrapper(&message, node.as_deref()) {
                Ok(n) => {
                    let count = n.messages.get(&message).and_then(|w| w.as_in()).map(|w| w.counter()).unwrap_or(0);
                    typed_reply("MessageCountReply", serde_json::json!({ "count": count }))
                }
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("LastReceivedTimeRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            match net.in_wrapper(&message, node.as_deref()) {
                Ok(n) => {
                    let time = n.messages.get(&message).and_then(|w| w.as_in()).map(|w| w.last_time()).unwrap_or(-1);
                    if time < 0 {
                        error_reply("NeverReceivedMessage", format!("\"{message}\" has never been received"))
                    } else {
                        typed_reply("LastReceivedTimeReply", serde_json::json!({ "time": time }))
                    }
                }
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("FetchLastReceivedRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let message = get_str(&payload, "message").unwrap_or_default().to_string();
            let node = get_node_name(&payload).map(str::to_string);
            let number = payload.get("number").and_then(Value::as_u64).map(|n| n as usize);
            match net.in_wrapper(&message, node.as_deref()) {
                Ok(n) => {
                    let in_wrapper = n.messages.get(&message).and_then(|w| w.as_in());
                    match in_wrapper.and_then(|w| w.last(number)) {
                        Some(messages) => {
                            typed_reply("FetchLastReceivedReply", serde_json::json!({ "messages": messages }))
                        }
                        None => error_reply(
                            "ErrorFetchLastReceived",
                            format!("fewer than the requested number of \"{message}\" have been received"),
                        ),
                    }
                }
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("UpdateDataRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let node = get_node_name(&payload).map(str::to_string);
            let glitch = payload.get("glitch").and_then(Value::as_bool).unwrap_or(false);
            let data = payload.get("data").and_then(Value::as_object).cloned().unwrap_or_default();
            for (path, value) in data {
                if let Err(e) = net.update_data(&path, value, node.as_deref(), glitch) {
                    return net_error_reply(e);
                }
            }
            success_reply()
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("GetDataRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let node = get_node_name(&payload).map(str::to_string);
            let glitch = payload.get("glitch").and_then(Value::as_bool).unwrap_or(false);
            let paths: Vec<String> = payload
                .get("paths")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let mut out: HashMap<String, Value> = HashMap::new();
            for path in paths {
                match net.get_data(&path, node.as_deref(), glitch, true) {
                    Ok(value) => {
                        out.insert(path, value);
                    }
                    Err(e) => return net_error_reply(e),
                }
            }
            typed_reply("GetDataReply", serde_json::json!({ "data": out }))
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("ResetDataRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let node = match get_node_name(&payload) {
                Some(n) => n.to_string(),
                None => return error_reply("NODE_NOT_FOUND", "\"node\" is required"),
            };
            let messages: Option<Vec<String>> = payload
                .get("messages")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect());
            match net.reset_data(&node, messages.as_deref()) {
                Ok(()) => success_reply(),
                Err(e) => net_error_reply(e),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("ConnectionRequest", Arc::new(move |payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            let wait = payload.get("wait").and_then(Value::as_bool).unwrap_or(false);
            if !wait {
                let connected = net.get_connection_result(true);
                return typed_reply("ConnectionReply", serde_json::json!({ "connected": connected }));
            }
            for _ in 0..60 {
                if net.get_connection_result(true) {
                    return typed_reply("ConnectionReply", serde_json::json!({ "connected": true }));
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            typed_reply("ConnectionReply", serde_json::json!({ "connected": net.get_connection_result(true) }))
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let sm_clone = sm.clone();
    connect!("RequirementStateRequest", Arc::new(move |payload: Value| {
        let sm_clone = sm_clone.clone();
        Box::pin(async move {
            let name = get_str(&payload, "name").unwrap_or_default();
            match sm_clone.requirements.get(name) {
                Some(state) => typed_reply(
                    "RequirementStateReply",
                    serde_json::json!({ "state": state.as_str() }),
                ),
                None => error_reply("NOT_FOUND", format!("requirement \"{name}\" is not tracked")),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let net = network.clone();
    connect!("CloseNetworkRequest", Arc::new(move |_payload: Value| {
        let net = net.clone();
        Box::pin(async move {
            net.stop().await;
            success_reply()
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let sm_clone = sm.clone();
    connect!("UpdateSMPropertyRequest", Arc::new(move |payload: Value| {
        let sm_clone = sm_clone.clone();
        Box::pin(async move {
            let machine = get_str(&payload, "machine").unwrap_or_default();
            let property = get_str(&payload, "property").unwrap_or_default();
            let value = payload.get("value").cloned().unwrap_or(Value::Null);
            match sm_clone.update_property(machine, property, value) {
                Ok(()) => success_reply(),
                Err(e) => error_reply("GENERIC", e.to_string()),
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);

    let sm_clone = sm;
    connect!("UpdateGlobalVariable", Arc::new(move |payload: Value| {
        let sm_clone = sm_clone.clone();
        Box::pin(async move {
            let name = get_str(&payload, "name").unwrap_or_default();
            let value = payload.get("value").cloned().unwrap_or(Value::Null);
            if sm_clone.globals.update(name, value) {
                success_reply()
            } else {
                error_reply("UpdateGlobalVariableError", format!("global \"{name}\" is not defined"))
            }
        }) as crate::signal::BoxFuture<'static, Value>
    }) as Arc<dyn Fn(Value) -> crate::signal::BoxFuture<'static, Value> + Send + Sync>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlDescriptor, RequestDescriptor, PayloadDescriptor};
    use crate::interface::json::JsonInterface;
    use crate::node::{MessageConfig, MessageDirection, NodeConfig, Role};
    use std::collections::HashMap as Map;

    fn network_with_one_node() -> Arc<NetworkController> {
        let mut messages = Map::new();
        messages.insert(
            "Ping".to_string(),
            MessageConfig { direction: MessageDirection::In, periodic: false, interval: None, reply: None, exclude_from_log: false },
        );
        let mut config = Map::new();
        config.insert(
            "A".to_string(),
            NodeConfig {
                protocol: crate::node::Protocol::SpecTcp,
                role: Role::Server,
                host: "127.0.0.1".to_string(),
                port: 0,
                log_level: None,
                messages,
            },
        );
        Arc::new(
            NetworkController::init(
                &config,
                &ControlDescriptor::default(),
                &Default::default(),
                &Default::default(),
                Arc::new(JsonInterface::new()),
                Arc::new(SignalBus::new()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_required_key_returns_required_key_error() {
        let bus = SignalBus::new();
        let net = network_with_one_node();
        let sm = Arc::new(StateMachineManager::new());
        let mut descriptor = ControlDescriptor::default();
        descriptor.insert(
            "SendMessageRequest".to_string(),
            RequestDescriptor {
                payload: PayloadDescriptor { required: vec!["message".to_string()], optional: Default::default() },
            },
        );
        register_control_handlers(&bus, "control", Arc::new(descriptor), net, sm);
        let replies = bus
            .emit(&Signal::message("control", "SendMessageRequest"), serde_json::json!({}))
            .await;
        assert_eq!(replies[0]["type"], "ErrorReply");
        assert_eq!(replies[0]["payload"]["error"], "RequiredKeyError");
    }

    #[tokio::test]
    async fn requirement_state_request_reports_tracked_state() {
        let bus = SignalBus::new();
        let net = network_with_one_node();
        let sm = Arc::new(StateMachineManager::new());
        sm.requirements.add("req1");
        sm.requirements.set("req1", RequirementState::Pass);
        register_control_handlers(&bus, "control", Arc::new(ControlDescriptor::default()), net, sm);
        let replies = bus
            .emit(&Signal::message("control", "RequirementStateRequest"), serde_json::json!({"name": "req1"}))
            .await;
        assert_eq!(replies[0]["type"], "RequirementStateReply");
        assert_eq!(replies[0]["payload"]["state"], "PASS");
    }

    #[tokio::test]
    async fn update_global_variable_errors_when_absent() {
        let bus = SignalBus::new();
        let net = network_with_one_node();
        let sm = Arc::new(StateMachineManager::new());
        register_control_handlers(&bus, "control", Arc::new(ControlDescriptor::default()), net, sm);
        let replies = bus
            .emit(&Signal::message("control", "UpdateGlobalVariable"), serde_json::json!({"name": "missing", "value": 1}))
            .await;
        assert_eq!(replies[0]["type"], "ErrorReply");
        assert_eq!(replies[0]["payload"]["error"], "UpdateGlobalVariableError");
    }
}
