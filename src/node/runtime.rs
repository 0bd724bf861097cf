//! Connection lifecycle, sender queue, receiver loop — the "common
//! contract" every node implements regardless of protocol.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{
    CLIENT_CONNECTION_ATTEMPTS, PING_PONG_ATTEMPT_TIMEOUT, SERVER_SOCKET_TIMEOUT,
    ZMQ_CONNECTION_REPLY, ZMQ_CONNECTION_REQUEST,
};
use crate::dispatcher::{dispatch_control, dispatch_opaque, dispatch_spec};

use super::framing::{read_opaque_frame, read_socket_frame, read_spec_frame, write_socket_frame};
use super::{Node, Protocol, Role, SenderCmd};

/// Shared handle the sender task and periodic tasks write outgoing bytes
/// through; updated by the transport-specific accept/connect logic whenever
/// the "current" connection changes.
enum WriteSink {
    Tcp(WriteHalf<TcpStream>),
    Udp(Arc<UdpSocket>, SocketAddr),
}

type SharedSink = Arc<AsyncMutex<Option<WriteSink>>>;

/// `start()`: idempotent; transitions running false→true, spawns worker
/// tasks, binds/connects as role dictates.
pub async fn start(node: Arc<Node>) -> Result<()> {
    if node.running.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let (tx, rx) = mpsc::unbounded_channel();
    *node.sender_tx.lock().await = Some(tx);
    let sink: SharedSink = Arc::new(AsyncMutex::new(None));

    let result = match node.protocol {
        Protocol::Tcp | Protocol::SpecTcp => match node.role {
            Role::Client => spawn_tcp_client(node.clone(), sink.clone()).await,
            Role::Server | Role::Bidirectional => spawn_tcp_server(node.clone(), sink.clone()).await,
        },
        Protocol::Udp | Protocol::SpecUdp => spawn_udp(node.clone(), sink.clone()).await,
        _ if node.protocol.is_messaging_socket() => {
            spawn_messaging_socket(node.clone(), sink.clone()).await
        }
        _ => unreachable!("all protocol variants handled above"),
    };

    if let Err(e) = result {
        node.running.store(false, Ordering::SeqCst);
        return Err(e);
    }

    spawn_sender_task(node.clone(), rx, sink).await;
    info!(node = %node.name, "node started");
    Ok(())
}

/// `stop()`: deactivates every periodic message, enqueues an EXIT sentinel
/// on the sender queue, joins workers, closes the socket. Idempotent.
pub async fn stop(node: Arc<Node>) {
    if !node.running.swap(false, Ordering::SeqCst) {
        return;
    }
    node.periodic_active.lock().await.clear();
    if let Some(tx) = node.sender_tx.lock().await.take() {
        let _ = tx.send(SenderCmd::Exit);
    }
    let mut handles = node.worker_handles.lock().await;
    for handle in handles.drain(..) {
        handle.abort();
    }
    info!(node = %node.name, "node stopped");
}

/// `send_message(name)`: obtain serialized bytes from the OUT wrapper
/// (glitch shadow if glitching), enqueue on the sender queue. If not
/// running, silently dropped with a logged warning.
pub async fn send_message(node: &Arc<Node>, name: &str) -> Result<()> {
    if !node.is_running() {
        warn!(node = %node.name, message = name, "send_message on a non-running node; dropped");
        return Ok(());
    }
    let wrapper = node
        .messages
        .get(name)
        .and_then(|w| w.as_out())
        .ok_or_else(|| anyhow!("\"{name}\" is not an outgoing message on node \"{}\"", node.name))?;
    let bytes = wrapper
        .serialize(node.interface.as_ref())
        .map_err(|e| anyhow!("serialize failed for \"{name}\": {}", e.detail()))?;
    *node.last_message_sent.lock().await = Some(name.to_string());
    send_buffer(node, bytes).await
}

/// `send_buffer(bytes)`: enqueue raw bytes.
pub async fn send_buffer(node: &Arc<Node>, bytes: Vec<u8>) -> Result<()> {
    let guard = node.sender_tx.lock().await;
    match guard.as_ref() {
        Some(tx) => {
            let _ = tx.send(SenderCmd::Send(bytes));
            Ok(())
        }
        None => Err(anyhow!("node \"{}\" has no active sender queue", node.name)),
    }
}

/// Single task per node; pulls from an unbounded FIFO queue; on the EXIT
/// sentinel it returns. Enqueue order is preserved as wire order.
async fn spawn_sender_task(node: Arc<Node>, mut rx: mpsc::UnboundedReceiver<SenderCmd>, sink: SharedSink) {
    let handle = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SenderCmd::Exit => break,
                SenderCmd::Send(bytes) => {
                    let mut guard = sink.lock().await;
                    match guard.as_mut() {
                        Some(WriteSink::Tcp(w)) => {
                            if let Err(e) = w.write_all(&bytes).await {
                                warn!(node = %node.name, error = %e, "send failed");
                            }
                            let _ = w.flush().await;
                        }
                        Some(WriteSink::Udp(socket, addr)) => {
                            if let Err(e) = socket.send_to(&bytes, *addr).await {
                                warn!(node = %node.name, error = %e, "send failed");
                            }
                        }
                        None => {
                            warn!(node = %node.name, "send attempted before any connection established");
                        }
                    }
                }
            }
        }
    });
    node.worker_handles.lock().await.push(handle);
}

/// Turn off Nagle's algorithm on a freshly connected/accepted stream, same
/// as the teacher's `ipc::tcp_socket` does on every stream it hands out:
/// this simulator's framed messages are small and latency-sensitive (the
/// control protocol waits synchronously on replies), so coalescing delay
/// only hurts.
fn set_low_latency(stream: &TcpStream) -> Result<()> {
    socket2::SockRef::from(stream).set_nodelay(true)?;
    Ok(())
}

async fn spawn_tcp_client(node: Arc<Node>, sink: SharedSink) -> Result<()> {
    let addr = node.address();
    let stream = connect_with_retry(&addr).await?;
    if let Err(e) = set_low_latency(&stream) {
        warn!(node = %node.name, error = %e, "failed to set TCP_NODELAY");
    }
    let (read_half, write_half) = tokio::io::split(stream);
    *sink.lock().await = Some(WriteSink::Tcp(write_half));
    node.mark_connected().await;
    let handle = tokio::spawn(receiver_loop_tcp(node.clone(), read_half, sink.clone()));
    node.worker_handles.lock().await.push(handle);
    Ok(())
}

async fn spawn_tcp_server(node: Arc<Node>, sink: SharedSink) -> Result<()> {
    let listener = TcpListener::bind(node.address())
        .await
        .with_context(|| format!("binding TCP server node \"{}\"", node.name))?;
    let handle = tokio::spawn(async move {
        loop {
            if !node.is_running() {
                break;
            }
            match tokio::time::timeout(SERVER_SOCKET_TIMEOUT, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    debug!(node = %node.name, %peer, "accepted connection");
                    if let Err(e) = set_low_latency(&stream) {
                        warn!(node = %node.name, error = %e, "failed to set TCP_NODELAY");
                    }
                    let (read_half, write_half) = tokio::io::split(stream);
                    *sink.lock().await = Some(WriteSink::Tcp(write_half));
                    node.mark_connected().await;
                    let node2 = node.clone();
                    let sink2 = sink.clone();
                    tokio::spawn(receiver_loop_tcp(node2, read_half, sink2));
                }
                Ok(Err(e)) => warn!(node = %node.name, error = %e, "accept failed"),
                Err(_timeout) => continue,
            }
        }
    });
    node.worker_handles.lock().await.push(handle);
    Ok(())
}

/// Receiver task: one per accepted connection (server) or one total
/// (client). Reads frames and hands each buffer to the dispatcher; any
/// reply bytes are written back on the same connection. On EOF or error the
/// receiver terminates the connection; the node stays running.
async fn receiver_loop_tcp(node: Arc<Node>, mut read_half: ReadHalf<TcpStream>, sink: SharedSink) {
    loop {
        if !node.is_running() {
            break;
        }
        let frame = if node.protocol.is_spec_framed() {
            read_spec_frame(&mut read_half, node.interface.as_ref()).await
        } else {
            read_opaque_frame(&mut read_half).await
        };
        match frame {
            Ok(Some(buf)) => {
                let outcome = match node.protocol.dispatch_kind() {
                    crate::dispatcher::DispatchKind::Opaque => dispatch_opaque(&node.name, &buf),
                    crate::dispatcher::DispatchKind::Spec => {
                        dispatch_spec(&node.name, &buf, node.interface.as_ref(), &node.messages, &node.bus).await
                    }
                    crate::dispatcher::DispatchKind::Control => {
                        dispatch_control(&node.name, &buf, &node.bus).await
                    }
                };
                for reply in outcome.replies {
                    let mut guard = sink.lock().await;
                    if let Some(WriteSink::Tcp(w)) = guard.as_mut() {
                        if let Err(e) = w.write_all(&reply).await {
                            warn!(node = %node.name, error = %e, "reply write failed");
                            break;
                        }
                        let _ = w.flush().await;
                    }
                }
            }
            Ok(None) => {
                debug!(node = %node.name, "peer closed connection");
                break;
            }
            Err(e) => {
                warn!(node = %node.name, error = %e, "receiver terminated");
                break;
            }
        }
    }
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream> {
    let mut attempts = 0;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                attempts += 1;
                if attempts >= CLIENT_CONNECTION_ATTEMPTS {
                    return Err(anyhow!(
                        "failed to connect to {addr} after {attempts} attempts: {e}"
                    ));
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn spawn_udp(node: Arc<Node>, sink: SharedSink) -> Result<()> {
    match node.role {
        Role::Client => {
            let socket = UdpSocket::bind("0.0.0.0:0").await?;
            socket.connect(node.address()).await?;
            let socket = Arc::new(socket);
            // Plain UDP clients are connected immediately upon socket
            // creation — no handshake is needed (spec's connection
            // semantics table reserves ping/pong-gated "connected" for
            // messaging-socket clients only).
            let peer: SocketAddr = node.address().parse()?;
            *sink.lock().await = Some(WriteSink::Udp(socket.clone(), peer));
            node.mark_connected().await;
            let handle = tokio::spawn(receiver_loop_udp(node.clone(), socket, sink.clone(), true));
            node.worker_handles.lock().await.push(handle);
        }
        Role::Server | Role::Bidirectional => {
            let socket = Arc::new(UdpSocket::bind(node.address()).await?);
            node.mark_connected().await;
            let handle = tokio::spawn(receiver_loop_udp(node.clone(), socket, sink.clone(), false));
            node.worker_handles.lock().await.push(handle);
        }
    }
    Ok(())
}

async fn receiver_loop_udp(node: Arc<Node>, socket: Arc<UdpSocket>, sink: SharedSink, is_client: bool) {
    let mut buf = vec![0u8; 65536];
    loop {
        if !node.is_running() {
            break;
        }
        let recv = tokio::time::timeout(SERVER_SOCKET_TIMEOUT, socket.recv_from(&mut buf)).await;
        let (n, peer) = match recv {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(node = %node.name, error = %e, "udp recv failed");
                break;
            }
            Err(_timeout) => continue,
        };
        if !is_client {
            // Server role: remember the most recent peer so API-driven
            // sends and periodic emission have somewhere to go.
            *sink.lock().await = Some(WriteSink::Udp(socket.clone(), peer));
        }
        let frame = buf[..n].to_vec();
        let outcome = match node.protocol.dispatch_kind() {
            crate::dispatcher::DispatchKind::Opaque => dispatch_opaque(&node.name, &frame),
            crate::dispatcher::DispatchKind::Spec => {
                dispatch_spec(
                    &node.name,
                    &frame,
                    node.interface.as_ref(),
                    &node.messages,
                    &node.bus,
                )
                .await
            }
            crate::dispatcher::DispatchKind::Control => {
                dispatch_control(&node.name, &frame, &node.bus).await
            }
        };
        for reply in outcome.replies {
            if let Err(e) = socket.send_to(&reply, peer).await {
                warn!(node = %node.name, error = %e, "udp reply send failed");
            }
        }
    }
}

/// Messaging-socket modes (ZMQ_REQ/REP/PUSH/PULL), implemented over TCP with
/// this crate's own length-prefixed wire representation.
async fn spawn_messaging_socket(node: Arc<Node>, sink: SharedSink) -> Result<()> {
    match node.protocol {
        Protocol::ZmqReq | Protocol::ZmqPush => {
            let stream = connect_with_retry(&node.address()).await?;
            if let Err(e) = set_low_latency(&stream) {
                warn!(node = %node.name, error = %e, "failed to set TCP_NODELAY");
            }
            let (mut read_half, mut write_half) = tokio::io::split(stream);
            // Handshake: send ping, wait for pong, before marking connected.
            write_socket_frame(&mut write_half, ZMQ_CONNECTION_REQUEST).await?;
            let pong = tokio::time::timeout(
                PING_PONG_ATTEMPT_TIMEOUT,
                read_socket_frame(&mut read_half),
            )
            .await
            .map_err(|_| anyhow!("ping/pong handshake timed out"))??;
            if pong.as_deref() != Some(ZMQ_CONNECTION_REPLY) {
                return Err(anyhow!("unexpected handshake reply"));
            }
            node.mark_connected().await;
            *sink.lock().await = Some(WriteSink::Tcp(write_half));
            if node.protocol == Protocol::ZmqReq {
                let handle = tokio::spawn(req_client_loop(node.clone(), read_half, sink.clone()));
                node.worker_handles.lock().await.push(handle);
            }
            // PUSH clients send only; nothing further to read.
        }
        Protocol::ZmqRep | Protocol::ZmqPull => {
            let listener = TcpListener::bind(node.address())
                .await
                .with_context(|| format!("binding messaging-socket node \"{}\"", node.name))?;
            let is_rep = node.protocol == Protocol::ZmqRep;
            let handle = tokio::spawn(async move {
                loop {
                    if !node.is_running() {
                        break;
                    }
                    match tokio::time::timeout(SERVER_SOCKET_TIMEOUT, listener.accept()).await {
                        Ok(Ok((stream, peer))) => {
                            debug!(node = %node.name, %peer, "accepted messaging-socket connection");
                            if let Err(e) = set_low_latency(&stream) {
                                warn!(node = %node.name, error = %e, "failed to set TCP_NODELAY");
                            }
                            let (read_half, write_half) = tokio::io::split(stream);
                            *sink.lock().await = Some(WriteSink::Tcp(write_half));
                            let node2 = node.clone();
                            let sink2 = sink.clone();
                            tokio::spawn(rep_or_pull_loop(node2, read_half, sink2, is_rep));
                        }
                        Ok(Err(e)) => warn!(node = %node.name, error = %e, "accept failed"),
                        Err(_timeout) => continue,
                    }
                }
            });
            node.worker_handles.lock().await.push(handle);
        }
        _ => unreachable!("non-messaging-socket protocol routed to spawn_messaging_socket"),
    }
    Ok(())
}

/// REQ client: on send, recv the reply synchronously, store it as
/// `last_response`, then dequeue the next send. This loop owns the read
/// half; the sender task (writing through `sink`) and this loop run
/// concurrently, matching "send enqueues; this task awaits the matching
/// reply" without blocking the shared sender queue on I/O itself.
async fn req_client_loop(node: Arc<Node>, mut read_half: ReadHalf<TcpStream>, _sink: SharedSink) {
    loop {
        if !node.is_running() {
            break;
        }
        match tokio::time::timeout(SERVER_SOCKET_TIMEOUT, read_socket_frame(&mut read_half)).await {
            Ok(Ok(Some(bytes))) => {
                let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                *node.last_response.lock().await = Some(value);
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!(node = %node.name, error = %e, "req client read failed");
                break;
            }
            Err(_timeout) => continue,
        }
    }
}

/// REP server: on `__ping__` reply with `__pong__` and mark connected;
/// otherwise dispatch and send the reply. PULL server: same handshake, but
/// never replies to real traffic (receive-only).
async fn rep_or_pull_loop(node: Arc<Node>, mut read_half: ReadHalf<TcpStream>, sink: SharedSink, is_rep: bool) {
    loop {
        if !node.is_running() {
            break;
        }
        let frame = match tokio::time::timeout(SERVER_SOCKET_TIMEOUT, read_socket_frame(&mut read_half)).await
        {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!(node = %node.name, error = %e, "receiver terminated");
                break;
            }
            Err(_timeout) => continue,
        };
        if frame == ZMQ_CONNECTION_REQUEST {
            let mut guard = sink.lock().await;
            if let Some(WriteSink::Tcp(w)) = guard.as_mut() {
                if let Err(e) = write_socket_frame(w, ZMQ_CONNECTION_REPLY).await {
                    warn!(node = %node.name, error = %e, "pong send failed");
                }
            }
            drop(guard);
            node.mark_connected().await;
            continue;
        }
        if !is_rep {
            // PULL: dispatch for side effects only, no reply channel.
            dispatch_control(&node.name, &frame, &node.bus).await;
            continue;
        }
        let outcome = dispatch_control(&node.name, &frame, &node.bus).await;
        for reply in outcome.replies {
            let mut guard = sink.lock().await;
            if let Some(WriteSink::Tcp(w)) = guard.as_mut() {
                if let Err(e) = write_socket_frame(w, &reply).await {
                    warn!(node = %node.name, error = %e, "reply send failed");
                }
            }
        }
    }
}


/// `activate_periodic_message`/`start_periodic`: spawns a dedicated task
/// that loops while the periodic flag for this (node, name) remains true,
/// calling `send_message(name)` then sleeping `interval` seconds. At-most-
/// one periodic task per (node, name) is enforced by checking the flag
/// before spawning.
pub async fn start_periodic(node: Arc<Node>, name: String, interval: f64) -> Result<()> {
    let out = node
        .messages
        .get(&name)
        .and_then(|w| w.as_out())
        .ok_or_else(|| anyhow!("\"{name}\" is not an outgoing message on node \"{}\"", node.name))?;
    {
        let mut active = node.periodic_active.lock().await;
        if active.contains(&name) {
            return Err(anyhow!("periodic message \"{name}\" is already active"));
        }
        active.insert(name.clone());
    }
    out.set_periodic(true, Some(interval));
    let node2 = node.clone();
    let name2 = name.clone();
    let handle = tokio::spawn(async move {
        loop {
            let still_active = node2.periodic_active.lock().await.contains(&name2);
            if !still_active || !node2.is_running() {
                break;
            }
            if let Err(e) = send_message(&node2, &name2).await {
                warn!(node = %node2.name, message = %name2, error = %e, "periodic send failed");
            }
            sleep(Duration::from_secs_f64(interval)).await;
        }
    });
    node.worker_handles.lock().await.push(handle);
    Ok(())
}

/// `stop_periodic`: deactivates the (node, message) periodic flag; the task
/// exits within one interval.
pub async fn stop_periodic(node: &Arc<Node>, name: &str) -> Result<()> {
    let mut active = node.periodic_active.lock().await;
    if !active.remove(name) {
        return Err(anyhow!("periodic message \"{name}\" is not active"));
    }
    if let Some(out) = node.messages.get(name).and_then(|w| w.as_out()) {
        out.set_periodic(false, None);
    }
    Ok(())
}

pub async fn is_periodic_active(node: &Node, name: &str) -> bool {
    node.periodic_active.lock().await.contains(name)
}
