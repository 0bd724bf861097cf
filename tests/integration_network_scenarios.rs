//! End-to-end scenarios driving real TCP sockets against a running
//! [`NetworkController`]: echo, counter/ring, periodic emission, glitch
//! injection, connection-wait polling, and control-protocol error
//! propagation. Distinct, fixed, high-numbered ports keep the tests from
//! colliding with each other or with anything else on the test host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use netsim::config::{ControlDescriptor, PayloadFile};
use netsim::constants::{ZMQ_CONNECTION_REPLY, ZMQ_CONNECTION_REQUEST};
use netsim::control::register_control_handlers;
use netsim::interface::json::JsonInterface;
use netsim::interface::MessageInterface;
use netsim::network::NetworkController;
use netsim::node::framing::{read_socket_frame, read_spec_frame, write_socket_frame};
use netsim::node::{MessageConfig, MessageDirection, NodeConfig, Protocol, Role};
use netsim::signal::{sync_handler, Signal, SignalBus};
use netsim::statemachine::Manager as StateMachineManager;
use tokio::net::TcpStream;

fn message(direction: MessageDirection, periodic: bool, interval: Option<f64>) -> MessageConfig {
    MessageConfig {
        direction,
        periodic,
        interval,
        reply: None,
        exclude_from_log: false,
    }
}

fn spec_tcp_server(port: u16, messages: HashMap<String, MessageConfig>) -> HashMap<String, NodeConfig> {
    let mut config = HashMap::new();
    config.insert(
        "A".to_string(),
        NodeConfig {
            protocol: Protocol::SpecTcp,
            role: Role::Server,
            host: "127.0.0.1".to_string(),
            port,
            log_level: None,
            messages,
        },
    );
    config
}

async fn connect_retrying(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("could not connect to 127.0.0.1:{port}");
}

#[tokio::test]
async fn echo_spec_tcp_replies_with_the_same_sequence() {
    let port = 19101;
    let mut messages = HashMap::new();
    messages.insert("Ping".to_string(), message(MessageDirection::In, false, None));
    messages.insert("Pong".to_string(), message(MessageDirection::Out, false, None));
    let config = spec_tcp_server(port, messages);

    let mut defaults = PayloadFile::default();
    defaults.insert("Pong".to_string(), serde_json::json!({"seq": 0}));

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &ControlDescriptor::default(),
            &defaults,
            &PayloadFile::default(),
            interface.clone(),
            bus.clone(),
        )
        .unwrap(),
    );

    let echo_controller = controller.clone();
    bus.connect(
        Signal::message("A", "Ping"),
        sync_handler(move |data| {
            let seq = data.get("seq").cloned().unwrap_or(serde_json::json!(0));
            let controller = echo_controller.clone();
            tokio::spawn(async move {
                controller.update_data("Pong.seq", seq, None, false).unwrap();
                controller.send_message("Pong", None).await.unwrap();
            });
            None
        }),
    );

    controller.start().await.unwrap();

    let mut client = connect_retrying(port).await;
    let ping = interface.serialize("Ping", &serde_json::json!({"seq": 42}));
    use tokio::io::AsyncWriteExt;
    client.write_all(&ping).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(1), read_spec_frame(&mut client, interface.as_ref()))
        .await
        .expect("reply within one second")
        .unwrap()
        .unwrap();
    let parsed = interface.parse(&reply).unwrap();
    assert_eq!(parsed["data"]["seq"], 42);

    controller.stop().await;
}

#[tokio::test]
async fn counter_and_ring_track_received_pings() {
    let port = 19102;
    let mut messages = HashMap::new();
    messages.insert("Ping".to_string(), message(MessageDirection::In, false, None));
    let config = spec_tcp_server(port, messages);

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &ControlDescriptor::default(),
            &PayloadFile::default(),
            &PayloadFile::default(),
            interface.clone(),
            bus,
        )
        .unwrap(),
    );
    controller.start().await.unwrap();

    let mut client = connect_retrying(port).await;
    use tokio::io::AsyncWriteExt;
    for seq in 1..=3 {
        let frame = interface.serialize("Ping", &serde_json::json!({"seq": seq}));
        client.write_all(&frame).await.unwrap();
    }
    // Give the receiver loop a moment to process all three frames.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let node = controller.in_wrapper("Ping", None).unwrap();
    let in_wrapper = node.messages.get("Ping").unwrap().as_in().unwrap();
    assert_eq!(in_wrapper.counter(), 3);
    let last_two = in_wrapper.last(Some(2)).unwrap();
    assert_eq!(last_two, vec![serde_json::json!({"seq": 2}), serde_json::json!({"seq": 3})]);

    controller.stop().await;
}

#[tokio::test]
async fn periodic_emission_starts_and_stops() {
    let port = 19103;
    let mut messages = HashMap::new();
    messages.insert("Heartbeat".to_string(), message(MessageDirection::Out, false, None));
    let config = spec_tcp_server(port, messages);

    let mut defaults = PayloadFile::default();
    defaults.insert("Heartbeat".to_string(), serde_json::json!({"beat": true}));

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &ControlDescriptor::default(),
            &defaults,
            &PayloadFile::default(),
            interface.clone(),
            bus,
        )
        .unwrap(),
    );
    controller.start().await.unwrap();
    let mut client = connect_retrying(port).await;

    controller.start_periodic("Heartbeat", None, 0.1).await.unwrap();

    let mut seen = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), read_spec_frame(&mut client, interface.as_ref())).await
        {
            Ok(Ok(Some(_))) => seen += 1,
            _ => continue,
        }
    }
    assert!(seen >= 4, "expected at least 4 heartbeats, saw {seen}");

    controller.stop_periodic("Heartbeat", None).await.unwrap();
    assert!(!controller.is_periodic_active("Heartbeat", None).await.unwrap());

    controller.stop().await;
}

#[tokio::test]
async fn glitch_payload_overrides_default_until_reset() {
    let port = 19104;
    let mut messages = HashMap::new();
    messages.insert("Pong".to_string(), message(MessageDirection::Out, false, None));
    let config = spec_tcp_server(port, messages);

    let mut defaults = PayloadFile::default();
    defaults.insert("Pong".to_string(), serde_json::json!({"seq": 0}));

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &ControlDescriptor::default(),
            &defaults,
            &PayloadFile::default(),
            interface.clone(),
            bus,
        )
        .unwrap(),
    );
    controller.start().await.unwrap();
    let mut client = connect_retrying(port).await;

    controller.update_data("Pong.seq", serde_json::json!(99), None, true).unwrap();
    controller.send_message("Pong", None).await.unwrap();
    let reply = read_spec_frame(&mut client, interface.as_ref()).await.unwrap().unwrap();
    assert_eq!(interface.parse(&reply).unwrap()["data"]["seq"], 99);

    controller.reset_data("A", None).unwrap();
    controller.send_message("Pong", None).await.unwrap();
    let reply = read_spec_frame(&mut client, interface.as_ref()).await.unwrap().unwrap();
    assert_eq!(interface.parse(&reply).unwrap()["data"]["seq"], 0);

    controller.stop().await;
}

#[tokio::test]
async fn connection_result_becomes_true_once_the_client_connects() {
    let port = 19105;
    let mut config = HashMap::new();
    config.insert(
        "Server".to_string(),
        NodeConfig {
            protocol: Protocol::Tcp,
            role: Role::Server,
            host: "127.0.0.1".to_string(),
            port,
            log_level: None,
            messages: HashMap::new(),
        },
    );
    config.insert(
        "Client".to_string(),
        NodeConfig {
            protocol: Protocol::Tcp,
            role: Role::Client,
            host: "127.0.0.1".to_string(),
            port,
            log_level: None,
            messages: HashMap::new(),
        },
    );

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &ControlDescriptor::default(),
            &PayloadFile::default(),
            &PayloadFile::default(),
            interface,
            bus,
        )
        .unwrap(),
    );

    // Start only the client first; it spends up to a minute retrying the
    // connect, same as a real client node started before its peer server.
    controller.node("Client").unwrap().clone();
    let client_controller = controller.clone();
    tokio::spawn(async move {
        crate::start_node_only(&client_controller, "Client").await;
    });
    assert!(!controller.get_connection_result(true));

    tokio::time::sleep(Duration::from_millis(50)).await;
    crate::start_node_only(&controller, "Server").await;

    let connected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if controller.get_connection_result(true) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or(false);
    assert!(connected, "expected both nodes connected within two seconds");

    controller.stop().await;
}

async fn start_node_only(controller: &NetworkController, name: &str) {
    let node = controller.node(name).unwrap();
    netsim::node::runtime::start(node).await.unwrap();
}

#[tokio::test]
async fn control_protocol_reports_update_global_variable_error() {
    let port = 19106;
    let mut config = HashMap::new();
    config.insert(
        "Control".to_string(),
        NodeConfig {
            protocol: Protocol::ZmqRep,
            role: Role::Server,
            host: "127.0.0.1".to_string(),
            port,
            log_level: None,
            messages: HashMap::new(),
        },
    );

    let bus = Arc::new(SignalBus::new());
    let interface = Arc::new(JsonInterface::new());
    let descriptor = Arc::new(ControlDescriptor::default());
    let controller = Arc::new(
        NetworkController::init(
            &config,
            &descriptor,
            &PayloadFile::default(),
            &PayloadFile::default(),
            interface,
            bus.clone(),
        )
        .unwrap(),
    );
    let sm = Arc::new(StateMachineManager::new());
    register_control_handlers(&bus, "Control", descriptor, controller.clone(), sm);

    controller.start().await.unwrap();
    let mut client = connect_retrying(port).await;

    write_socket_frame(&mut client, ZMQ_CONNECTION_REQUEST).await.unwrap();
    let pong = read_socket_frame(&mut client).await.unwrap().unwrap();
    assert_eq!(pong, ZMQ_CONNECTION_REPLY);

    let request = serde_json::json!({
        "type": "UpdateGlobalVariable",
        "payload": {"name": "missing", "value": 1},
    });
    write_socket_frame(&mut client, &serde_json::to_vec(&request).unwrap()).await.unwrap();
    let reply = read_socket_frame(&mut client).await.unwrap().unwrap();
    let decoded: serde_json::Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(decoded["type"], "ErrorReply");
    assert_eq!(decoded["payload"]["error"], "UpdateGlobalVariableError");

    controller.stop().await;
}
