//! Per-message runtime state: [`in_wrapper::InWrapper`] for incoming
//! messages, [`out_wrapper::OutWrapper`] for outgoing messages, and
//! [`twoway_wrapper::TwoWayWrapper`], the union of both for bidirectional
//! message types. Path-addressed get/update/reset on the OUT wrapper is the
//! most intricate piece outside the transport; the traversal helpers here
//! are shared by `OutWrapper` and are generic over `serde_json::Value`, the
//! in-memory representation the shipped
//! [`crate::interface::json::JsonInterface`] uses.

pub mod in_wrapper;
pub mod out_wrapper;
pub mod twoway_wrapper;

pub use in_wrapper::InWrapper;
pub use out_wrapper::OutWrapper;
pub use twoway_wrapper::TwoWayWrapper;

use serde_json::Value;

use crate::error::{NetError, NetResult};
use crate::interface::PathSegment;

/// Bounded ring buffer capacity for IN-message history.
pub const MAX_LENGTH_IN_MESSAGES_DEQUE: usize = 10;

/// Read the subtree of `root` addressed by `segments`: `NOT_FOUND` for an
/// absent field name or a traversal through a null subtree,
/// `INDEX_OUT_OF_RANGE` for a list index past the end, `NOT_A_LIST` for an
/// index segment applied to a non-array value.
pub fn get_path<'a>(root: &'a Value, segments: &[PathSegment]) -> NetResult<&'a Value> {
    let mut cur = root;
    for seg in segments {
        match seg {
            PathSegment::Field(name) => match cur {
                Value::Object(map) => match map.get(name) {
                    Some(v) if !v.is_null() => cur = v,
                    Some(_) => {
                        return Err(NetError::NotFound(format!(
                            "field \"{name}\" is null"
                        )))
                    }
                    None => return Err(NetError::NotFound(format!("field \"{name}\" not found"))),
                },
                _ => return Err(NetError::NotFound(format!("field \"{name}\" not found"))),
            },
            PathSegment::Index(idx) => match cur {
                Value::Array(items) => {
                    if *idx >= items.len() {
                        return Err(NetError::IndexOutOfRange(format!(
                            "index {idx} out of range (len {})",
                            items.len()
                        )));
                    }
                    cur = &items[*idx];
                }
                _ => return Err(NetError::NotAList(format!("index {idx} on non-list value"))),
            },
        }
    }
    Ok(cur)
}

/// Walk `root` by every segment except the last, then set the terminal
/// field/index to `value`: walk a path of length N-1, then the last segment
/// `k` sets field `k` of the navigated subtree.
pub fn set_path(root: &mut Value, segments: &[PathSegment], value: Value) -> NetResult<()> {
    if segments.is_empty() {
        *root = value;
        return Ok(());
    }
    let (last, init) = segments.split_last().expect("non-empty checked above");
    let mut cur = root;
    for seg in init {
        match seg {
            PathSegment::Field(name) => {
                if !cur.is_object() {
                    return Err(NetError::NotFound(format!("field \"{name}\" not found")));
                }
                let map = cur.as_object_mut().expect("checked is_object");
                cur = map
                    .entry(name.clone())
                    .or_insert_with(|| Value::Object(Default::default()));
            }
            PathSegment::Index(idx) => {
                let items = cur
                    .as_array_mut()
                    .ok_or_else(|| NetError::NotAList(format!("index {idx} on non-list value")))?;
                if *idx >= items.len() {
                    return Err(NetError::IndexOutOfRange(format!(
                        "index {idx} out of range (len {})",
                        items.len()
                    )));
                }
                cur = &mut items[*idx];
            }
        }
    }
    match last {
        PathSegment::Field(name) => {
            if !cur.is_object() {
                *cur = Value::Object(Default::default());
            }
            cur.as_object_mut()
                .expect("coerced to object above")
                .insert(name.clone(), value);
        }
        PathSegment::Index(idx) => {
            let items = cur
                .as_array_mut()
                .ok_or_else(|| NetError::NotAList(format!("index {idx} on non-list value")))?;
            if *idx >= items.len() {
                return Err(NetError::IndexOutOfRange(format!(
                    "index {idx} out of range (len {})",
                    items.len()
                )));
            }
            items[*idx] = value;
        }
    }
    Ok(())
}

/// Direction tag parsed from YAML config (`direction: in|out|two_way`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    TwoWay,
}

/// Per-message state: incoming, outgoing, or bidirectional.
pub enum MessageWrapper {
    In(InWrapper),
    Out(OutWrapper),
    TwoWay(TwoWayWrapper),
}

impl MessageWrapper {
    pub fn as_in(&self) -> Option<&InWrapper> {
        match self {
            MessageWrapper::In(w) => Some(w),
            MessageWrapper::TwoWay(w) => Some(&w.incoming),
            MessageWrapper::Out(_) => None,
        }
    }

    pub fn as_out(&self) -> Option<&OutWrapper> {
        match self {
            MessageWrapper::Out(w) => Some(w),
            MessageWrapper::TwoWay(w) => Some(&w.outgoing),
            MessageWrapper::In(_) => None,
        }
    }

    pub fn is_out(&self) -> bool {
        self.as_out().is_some()
    }
}

/// Resolve the list addressed by `segments` (the full list, not an element
/// of it) for `add_items`/`remove_items`.
pub fn get_list_mut<'a>(root: &'a mut Value, segments: &[PathSegment]) -> NetResult<&'a mut Vec<Value>> {
    let target = if segments.is_empty() {
        root
    } else {
        let mut cur = root;
        for seg in segments {
            match seg {
                PathSegment::Field(name) => {
                    cur = cur
                        .as_object_mut()
                        .and_then(|m| m.get_mut(name))
                        .ok_or_else(|| NetError::NotFound(format!("field \"{name}\" not found")))?;
                }
                PathSegment::Index(idx) => {
                    let items = cur
                        .as_array_mut()
                        .ok_or_else(|| NetError::NotAList(format!("index {idx} on non-list value")))?;
                    if *idx >= items.len() {
                        return Err(NetError::IndexOutOfRange(format!(
                            "index {idx} out of range (len {})",
                            items.len()
                        )));
                    }
                    cur = &mut items[*idx];
                }
            }
        }
        cur
    };
    target
        .as_array_mut()
        .ok_or_else(|| NetError::NotAList("addressed value is not a list".to_string()))
}
