//! Per-node dispatch strategy: turns a received byte buffer into a
//! signal-bus emission and produces the reply bytes (if any) the receiver
//! task writes back on the same connection.

use serde_json::Value;
use tracing::{debug, warn};

use crate::interface::MessageInterface;
use crate::signal::{Signal, SignalBus};
use crate::wrappers::MessageWrapper;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Opaque,
    Spec,
    Control,
}

/// A handler reply that wants to supply raw bytes back through the Spec
/// dispatcher's reply channel is shaped `{"__bytes__": [..byte values..]}`;
/// every other truthy reply contributes nothing to the wire (the handler is
/// expected to have driven any response via direct `send_message` calls
/// instead, as in an echo scenario).
fn reply_as_bytes(reply: &Value) -> Option<Vec<u8>> {
    let arr = reply.get("__bytes__")?.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        out.push(v.as_u64()? as u8);
    }
    Some(out)
}

pub struct DispatchOutcome {
    /// Reply buffers to write back, in handler order. Empty for opaque/spec
    /// dispatch when no handler supplied `__bytes__`, and for control
    /// dispatch this holds exactly one element (the single reply envelope,
    /// or the literal `"No answer"` fallback).
    pub replies: Vec<Vec<u8>>,
}

/// Dispatch a received buffer for a node whose strategy is [`DispatchKind::Opaque`]:
/// log the buffer and return the literal bytes `"success"`.
pub fn dispatch_opaque(node_name: &str, buf: &[u8]) -> DispatchOutcome {
    debug!(node = node_name, len = buf.len(), "opaque dispatch");
    DispatchOutcome {
        replies: vec![b"success".to_vec()],
    }
}

/// Dispatch a received buffer for a node whose strategy is [`DispatchKind::Spec`].
pub async fn dispatch_spec(
    node_name: &str,
    buf: &[u8],
    interface: &dyn MessageInterface,
    messages: &HashMap<String, MessageWrapper>,
    bus: &SignalBus,
) -> DispatchOutcome {
    let message_type = match interface.message_type_of(buf) {
        Ok(ty) => ty,
        Err(e) => {
            warn!(node = node_name, error = %e, "spec dispatch: failed to resolve message type");
            return DispatchOutcome { replies: Vec::new() };
        }
    };
    let parsed = match interface.parse(buf) {
        Ok(v) => v,
        Err(e) => {
            warn!(node = node_name, error = %e, "spec dispatch: decode failed");
            return DispatchOutcome { replies: Vec::new() };
        }
    };
    let data = parsed.get("data").cloned().unwrap_or(parsed.clone());
    if let Some(MessageWrapper::In(in_wrapper)) = messages.get(&message_type) {
        in_wrapper.record(data.clone());
    } else if let Some(MessageWrapper::TwoWay(tw)) = messages.get(&message_type) {
        tw.incoming.record(data.clone());
    }
    let replies = bus.emit(&Signal::message(node_name, &message_type), data).await;
    DispatchOutcome {
        replies: replies.iter().filter_map(reply_as_bytes).collect(),
    }
}

/// Dispatch a received buffer for a node whose strategy is [`DispatchKind::Control`]:
/// deserialize `{type, payload}`, emit `(node, type)`, serialize the first
/// reply back into envelope bytes; with no reply, return the literal JSON
/// bytes `"No answer"`.
pub async fn dispatch_control(node_name: &str, buf: &[u8], bus: &SignalBus) -> DispatchOutcome {
    let envelope: Value = match serde_json::from_slice(buf) {
        Ok(v) => v,
        Err(e) => {
            warn!(node = node_name, error = %e, "control dispatch: envelope decode failed");
            let error_reply = serde_json::json!({
                "type": "ErrorReply",
                "payload": {"error": "GENERIC", "detail": e.to_string()},
            });
            return DispatchOutcome {
                replies: vec![serde_json::to_vec(&error_reply).unwrap_or_default()],
            };
        }
    };
    let request_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
    let replies = bus.emit(&Signal::message(node_name, &request_type), payload).await;
    let reply_bytes = match replies.first() {
        Some(reply) => serde_json::to_vec(reply).unwrap_or_default(),
        None => serde_json::to_vec(&Value::String("No answer".to_string())).unwrap_or_default(),
    };
    DispatchOutcome {
        replies: vec![reply_bytes],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::json::JsonInterface;
    use crate::signal::sync_handler;
    use crate::wrappers::InWrapper;
    use std::sync::Arc;

    #[tokio::test]
    async fn spec_dispatch_increments_in_wrapper_and_emits_on_bus() {
        let iface = JsonInterface::new();
        let bus = SignalBus::new();
        let mut messages: HashMap<String, MessageWrapper> = HashMap::new();
        messages.insert("Ping".to_string(), MessageWrapper::In(InWrapper::new()));
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = seen.clone();
        bus.connect(
            Signal::message("A", "Ping"),
            sync_handler(move |data| {
                *seen2.lock() = Some(data.clone());
                None
            }),
        );
        let frame = iface.serialize("Ping", &serde_json::json!({"seq": 7}));
        let outcome = dispatch_spec("A", &frame, &iface, &messages, &bus).await;
        assert!(outcome.replies.is_empty());
        assert_eq!(*seen.lock(), Some(serde_json::json!({"seq": 7})));
        assert_eq!(messages.get("Ping").unwrap().as_in().unwrap().counter(), 1);
    }

    #[tokio::test]
    async fn control_dispatch_falls_back_to_no_answer() {
        let bus = SignalBus::new();
        let envelope = serde_json::json!({"type": "PingRequest", "payload": {}});
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let outcome = dispatch_control("control", &bytes, &bus).await;
        assert_eq!(outcome.replies.len(), 1);
        let decoded: Value = serde_json::from_slice(&outcome.replies[0]).unwrap();
        assert_eq!(decoded, Value::String("No answer".to_string()));
    }

    #[tokio::test]
    async fn control_dispatch_returns_first_handler_reply() {
        let bus = SignalBus::new();
        bus.connect(
            Signal::message("control", "PingRequest"),
            sync_handler(|_| Some(serde_json::json!({"type": "SuccessReply", "payload": {}}))),
        );
        let envelope = serde_json::json!({"type": "PingRequest", "payload": {}});
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let outcome = dispatch_control("control", &bytes, &bus).await;
        let decoded: Value = serde_json::from_slice(&outcome.replies[0]).unwrap();
        assert_eq!(decoded["type"], "SuccessReply");
    }
}
