//! IN-message wrapper: counter, last-receive time, bounded ring buffer of
//! recent payloads.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::Value;

use super::MAX_LENGTH_IN_MESSAGES_DEQUE;

struct Inner {
    counter: u64,
    last_time: i64,
    ring: VecDeque<Value>,
}

/// Per-message state for a received message type. All three fields share a
/// single lock: the dispatcher task mutates them on every dispatch, control
/// handlers read them concurrently, and `counter == number of dispatches`
/// must hold under concurrent reads.
pub struct InWrapper {
    inner: Mutex<Inner>,
}

impl InWrapper {
    pub fn new() -> Self {
        InWrapper {
            inner: Mutex::new(Inner {
                counter: 0,
                last_time: -1,
                ring: VecDeque::with_capacity(MAX_LENGTH_IN_MESSAGES_DEQUE),
            }),
        }
    }

    /// Record an arriving payload: increment the counter, stamp the current
    /// wall-clock second, and push to the ring buffer, evicting the oldest
    /// entry once the buffer is at capacity.
    pub fn record(&self, payload: Value) {
        let mut inner = self.inner.lock();
        inner.counter += 1;
        inner.last_time = now_unix_seconds();
        if inner.ring.len() == MAX_LENGTH_IN_MESSAGES_DEQUE {
            inner.ring.pop_front();
        }
        inner.ring.push_back(payload);
    }

    pub fn counter(&self) -> u64 {
        self.inner.lock().counter
    }

    pub fn last_time(&self) -> i64 {
        self.inner.lock().last_time
    }

    /// Return the last `number` received payloads in arrival order, or all
    /// of them if `number` is `None`. Always returns a list, matching the
    /// control protocol's `FetchLastReceivedReply{messages}` contract.
    pub fn last(&self, number: Option<usize>) -> Option<Vec<Value>> {
        let inner = self.inner.lock();
        let n = number.unwrap_or(inner.ring.len());
        if n > inner.ring.len() {
            return None;
        }
        let skip = inner.ring.len() - n;
        Some(inner.ring.iter().skip(skip).cloned().collect())
    }
}

impl Default for InWrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_tracks_number_of_records() {
        let w = InWrapper::new();
        assert_eq!(w.counter(), 0);
        assert_eq!(w.last_time(), -1);
        w.record(Value::from(1));
        w.record(Value::from(2));
        assert_eq!(w.counter(), 2);
        assert!(w.last_time() >= 0);
    }

    #[test]
    fn ring_buffer_caps_at_max_length_and_keeps_arrival_order() {
        let w = InWrapper::new();
        for i in 0..15 {
            w.record(Value::from(i));
        }
        let all = w.last(None).unwrap();
        assert_eq!(all.len(), MAX_LENGTH_IN_MESSAGES_DEQUE);
        assert_eq!(all.first().unwrap(), &Value::from(5));
        assert_eq!(all.last().unwrap(), &Value::from(14));
    }

    #[test]
    fn last_n_returns_most_recent_n_in_order() {
        let w = InWrapper::new();
        for i in 1..=3 {
            w.record(Value::from(i));
        }
        let last_two = w.last(Some(2)).unwrap();
        assert_eq!(last_two, vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn requesting_more_than_counter_returns_none() {
        let w = InWrapper::new();
        w.record(Value::from(1));
        assert!(w.last(Some(5)).is_none());
    }
}
