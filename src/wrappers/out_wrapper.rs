//! OUT-message wrapper: current payload, glitch shadow copy, periodic
//! emission flag/interval. The most intricate data structure outside the
//! transport.
//!
//! All mutations and reads hold the wrapper's lock for the duration of the
//! traversal, so a send in progress (which calls [`OutWrapper::serialize`])
//! and a path update can never interleave within a single message tree.

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{NetError, NetResult};
use crate::interface::{MessageInterface, PathSegment};

use super::{get_list_mut, get_path, set_path};

struct Inner {
    current: Option<Value>,
    glitch_payload: Value,
    periodic: bool,
    interval: f64,
    is_glitching: bool,
}

pub struct OutWrapper {
    message_name: String,
    default_payload: Option<Value>,
    inner: Mutex<Inner>,
}

impl OutWrapper {
    pub fn new(message_name: impl Into<String>, default_payload: Option<Value>) -> Self {
        OutWrapper {
            message_name: message_name.into(),
            default_payload,
            inner: Mutex::new(Inner {
                current: None,
                glitch_payload: Value::Object(Default::default()),
                periodic: false,
                interval: 1.0,
                is_glitching: false,
            }),
        }
    }

    /// `current := interface.decode(message_name, default_payload)`; if
    /// there is no configured default, `current := interface.zero(message_name)`.
    /// Also drops any glitch state, per `reset_data`'s documented contract of
    /// dropping any glitch state.
    pub fn reset(&self, interface: &dyn MessageInterface) {
        let mut inner = self.inner.lock();
        inner.current = Some(match &self.default_payload {
            Some(payload) => interface.decode(&self.message_name, payload),
            None => interface.zero(&self.message_name),
        });
        inner.glitch_payload = Value::Object(Default::default());
        inner.is_glitching = false;
    }

    pub fn is_glitching(&self) -> bool {
        self.inner.lock().is_glitching
    }

    pub fn set_glitching(&self, glitching: bool) {
        self.inner.lock().is_glitching = glitching;
    }

    /// Preload the glitch shadow from a configured glitch payload template
    /// without marking the wrapper as glitching — the shadow sits ready
    /// until a control call (or a configured `glitch=true` update) flips
    /// `is_glitching` on.
    pub fn seed_glitch(&self, value: Value) {
        self.inner.lock().glitch_payload = value;
    }

    pub fn set_periodic(&self, periodic: bool, interval: Option<f64>) {
        let mut inner = self.inner.lock();
        inner.periodic = periodic;
        if let Some(interval) = interval {
            inner.interval = interval;
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.inner.lock().periodic
    }

    pub fn interval(&self) -> f64 {
        self.inner.lock().interval
    }

    /// Update operation. `glitch=false` walks/replaces `current`, decoding
    /// the terminal value via the interface. `glitch=true` walks/replaces
    /// `glitch_payload` as a plain nested map with no decoding and implicitly
    /// marks the wrapper as glitching, since the only reason to mutate the
    /// glitch shadow is to have it observed on the next send.
    pub fn update(
        &self,
        interface: &dyn MessageInterface,
        path: &str,
        value: Value,
        glitch: bool,
    ) -> NetResult<()> {
        let segments = PathSegment::parse_path(path);
        let mut inner = self.inner.lock();
        if glitch {
            set_path(&mut inner.glitch_payload, &segments, value)?;
            inner.is_glitching = true;
            return Ok(());
        }
        if segments.is_empty() {
            inner.current = Some(interface.decode(&self.message_name, &value));
            return Ok(());
        }
        let current = inner
            .current
            .get_or_insert_with(|| interface.zero(&self.message_name));
        let decoded = interface.decode(&self.message_name, &value);
        set_path(current, &segments, decoded)
    }

    /// Get operation: symmetric traversal over `current` or
    /// `glitch_payload`, with optional `to_dict` conversion and deep copy.
    pub fn get(
        &self,
        interface: &dyn MessageInterface,
        path: &str,
        glitch: bool,
        to_dict: bool,
    ) -> NetResult<Value> {
        let segments = PathSegment::parse_path(path);
        let inner = self.inner.lock();
        let root = if glitch {
            &inner.glitch_payload
        } else {
            inner
                .current
                .as_ref()
                .ok_or_else(|| NetError::NotFound("message has never been reset".to_string()))?
        };
        let terminal = get_path(root, &segments)?;
        let value = if to_dict {
            interface.to_dict(terminal)
        } else {
            terminal.clone()
        };
        // `copy` here means "decouple the caller from the live payload";
        // every path here already returns an owned clone, so the
        // copy-vs-no-copy distinction collapses to this single code path.
        Ok(value)
    }

    /// Serialize the payload that would be sent on the wire right now: the
    /// glitch shadow if `is_glitching`, else `current`.
    pub fn serialize(&self, interface: &dyn MessageInterface) -> NetResult<Vec<u8>> {
        let inner = self.inner.lock();
        if inner.is_glitching {
            let decoded = interface.decode(&self.message_name, &inner.glitch_payload);
            Ok(interface.serialize(&self.message_name, &decoded))
        } else {
            let current = inner
                .current
                .as_ref()
                .ok_or_else(|| NetError::NotFound("message has never been reset".to_string()))?;
            Ok(interface.serialize(&self.message_name, current))
        }
    }

    pub fn add_items_to_list(&self, path: &str, items: Vec<Value>, glitch: bool) -> NetResult<()> {
        let segments = PathSegment::parse_path(path);
        let mut inner = self.inner.lock();
        let root = if glitch {
            &mut inner.glitch_payload
        } else {
            inner.current.get_or_insert_with(|| Value::Object(Default::default()))
        };
        let list = get_list_mut(root, &segments)?;
        list.extend(items);
        Ok(())
    }

    /// Remove items at `indexes` from the list addressed by `path`. An
    /// out-of-range index returns `INDEX_OUT_OF_RANGE`; a non-list target
    /// returns `NOT_A_LIST`.
    pub fn remove_items_from_list(&self, path: &str, mut indexes: Vec<usize>, glitch: bool) -> NetResult<()> {
        let segments = PathSegment::parse_path(path);
        let mut inner = self.inner.lock();
        let root = if glitch {
            &mut inner.glitch_payload
        } else {
            inner.current.get_or_insert_with(|| Value::Object(Default::default()))
        };
        let list = get_list_mut(root, &segments)?;
        for idx in &indexes {
            if *idx >= list.len() {
                return Err(NetError::IndexOutOfRange(format!(
                    "index {idx} out of range (len {})",
                    list.len()
                )));
            }
        }
        // Remove highest indexes first so earlier removals don't shift the
        // positions of indexes still pending removal.
        indexes.sort_unstable_by(|a, b| b.cmp(a));
        for idx in indexes {
            list.remove(idx);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::json::JsonInterface;

    #[test]
    fn reset_produces_default_payload() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("Pong", Some(serde_json::json!({"seq": 0})));
        w.reset(&iface);
        let value = w.get(&iface, "seq", false, false).unwrap();
        assert_eq!(value, Value::from(0));
    }

    #[test]
    fn update_then_get_round_trips() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("Pong", Some(serde_json::json!({"seq": 0})));
        w.reset(&iface);
        w.update(&iface, "seq", Value::from(42), false).unwrap();
        assert_eq!(w.get(&iface, "seq", false, false).unwrap(), Value::from(42));
    }

    #[test]
    fn glitch_update_does_not_affect_current() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("Pong", Some(serde_json::json!({"seq": 0})));
        w.reset(&iface);
        w.update(&iface, "seq", Value::from(99), true).unwrap();
        assert!(w.is_glitching());
        assert_eq!(w.get(&iface, "seq", false, false).unwrap(), Value::from(0));
        assert_eq!(w.get(&iface, "seq", true, false).unwrap(), Value::from(99));
    }

    #[test]
    fn reset_clears_glitch_state() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("Pong", Some(serde_json::json!({"seq": 0})));
        w.reset(&iface);
        w.update(&iface, "seq", Value::from(99), true).unwrap();
        w.reset(&iface);
        assert!(!w.is_glitching());
    }

    #[test]
    fn remove_out_of_range_index_is_an_error() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("List", Some(serde_json::json!({"items": [1, 2, 3]})));
        w.reset(&iface);
        let err = w.remove_items_from_list("items", vec![5], false).unwrap_err();
        assert_eq!(err.kind_name(), "INDEX_OUT_OF_RANGE");
    }

    #[test]
    fn remove_valid_index_shrinks_list() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("List", Some(serde_json::json!({"items": [1, 2, 3]})));
        w.reset(&iface);
        w.remove_items_from_list("items", vec![1], false).unwrap();
        assert_eq!(
            w.get(&iface, "items", false, false).unwrap(),
            serde_json::json!([1, 3])
        );
    }

    #[test]
    fn get_on_absent_field_is_not_found() {
        let iface = JsonInterface::new();
        let w = OutWrapper::new("Pong", Some(serde_json::json!({"seq": 0})));
        w.reset(&iface);
        let err = w.get(&iface, "missing", false, false).unwrap_err();
        assert_eq!(err.kind_name(), "NOT_FOUND");
    }
}
