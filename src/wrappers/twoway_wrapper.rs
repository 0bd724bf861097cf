//! TWO_WAY wrapper: the union of [`InWrapper`] and [`OutWrapper`] for a
//! message type that is received on one occasion and sent on another.

use super::{InWrapper, OutWrapper};

pub struct TwoWayWrapper {
    pub incoming: InWrapper,
    pub outgoing: OutWrapper,
}

impl TwoWayWrapper {
    pub fn new(message_name: impl Into<String>, default_payload: Option<serde_json::Value>) -> Self {
        TwoWayWrapper {
            incoming: InWrapper::new(),
            outgoing: OutWrapper::new(message_name, default_payload),
        }
    }
}
