//! Named constants that are part of the observable external protocol and
//! must be preserved bit-exact across clients and test drivers.

use std::time::Duration;

pub const ZMQ_CONNECTION_REQUEST: &[u8] = b"__ping__";
pub const ZMQ_CONNECTION_REPLY: &[u8] = b"__pong__";

pub const CLIENT_CONNECTION_ATTEMPTS: u32 = 50;
pub const SERVER_SOCKET_TIMEOUT: Duration = Duration::from_millis(500);
pub const CONNECTION_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const PING_PONG_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
