//! Gossip layer: signed-envelope broadcast over a WebSocket mesh
//!
//! Every node is server and client at once; accepted and dialed sockets
//! land in the same registry and take part in the same flood-fill. A
//! socket's identity is whatever envelope key last arrived on it, which is
//! what the vote timeout uses to punish silent validators.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};

use stakemesh_ledger::{Transaction, MIN_STAKE};

use crate::envelope::{ChainData, Envelope, MessageKind, VoteData};
use crate::node::NodeInner;
use crate::{sync, vote, GOSSIP_DEDUP_WINDOW};

/// What the per-socket writer task accepts.
pub(crate) enum Outbound {
    Frame(String),
    Close,
}

/// One registered peer connection.
pub(crate) struct PeerSocket {
    pub sender: mpsc::UnboundedSender<Outbound>,
    /// Public key of whoever last signed an envelope on this socket.
    pub identity: Option<String>,
}

/// Bind the listener and accept peer connections in the background.
pub(crate) async fn run_listener(inner: Arc<NodeInner>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", inner.port)).await?;
    tracing::info!("listening for peers on port {}", inner.port);

    tokio::spawn(async move {
        while let Ok((stream, peer_addr)) = listener.accept().await {
            let inner = inner.clone();
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => register_socket(inner, ws),
                    Err(e) => tracing::warn!("handshake failed from {}: {}", peer_addr, e),
                }
            });
        }
    });

    Ok(())
}

/// Dial every seed peer; failures are logged and skipped.
pub(crate) async fn dial_peers(inner: &Arc<NodeInner>) -> usize {
    let mut connected = 0;
    for url in &inner.peers {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!("connected to peer {}", url);
                register_socket(inner.clone(), ws);
                connected += 1;
            }
            Err(e) => tracing::warn!("failed to dial peer {}: {}", url, e),
        }
    }
    connected
}

/// Add a socket to the registry and spawn its writer and reader tasks.
fn register_socket<S>(inner: Arc<NodeInner>, ws: WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let id = inner.next_socket_id.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (sender, mut receiver) = mpsc::unbounded_channel::<Outbound>();

    inner.sockets.lock().insert(
        id,
        PeerSocket {
            sender,
            identity: None,
        },
    );

    tokio::spawn(async move {
        while let Some(out) = receiver.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_frame(&inner, id, &text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("socket {} read error: {}", id, e);
                    break;
                }
            }
        }
        on_socket_closed(&inner, id);
    });
}

/// The inbound pipeline: parse, reject, dedup, flood, bind, dispatch.
pub(crate) fn handle_frame(inner: &Arc<NodeInner>, socket_id: u64, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("dropping unparseable frame: {}", e);
            return;
        }
    };

    if envelope.key.is_empty() || envelope.id.is_empty() || envelope.sign.is_none() {
        return;
    }
    if inner.seen_ids.lock().contains(&envelope.id) {
        return;
    }
    if !envelope.verify() {
        tracing::debug!("dropping envelope with bad signature from {}", short(&envelope.key));
        return;
    }
    record_seen(inner, &envelope.id);

    // Forward verbatim to every other open socket.
    flood_except(inner, socket_id, text);

    if let Some(socket) = inner.sockets.lock().get_mut(&socket_id) {
        socket.identity = Some(envelope.key.clone());
    }

    dispatch(inner, envelope);
}

fn dispatch(inner: &Arc<NodeInner>, envelope: Envelope) {
    match envelope.kind {
        MessageKind::Validators => {
            broadcast(
                inner,
                MessageKind::Validator,
                Some(Value::String(inner.public_key.clone())),
                None,
            );
        }
        MessageKind::Validator => {
            if let Some(Value::String(pubkey)) = envelope.data {
                add_validator(inner, pubkey, true);
            }
        }
        MessageKind::HelloValidator => {
            if let Some(Value::String(pubkey)) = envelope.data {
                add_validator(inner, pubkey, false);
            }
        }
        MessageKind::GetChain => {
            send_chain_snapshot(inner, envelope.key);
        }
        MessageKind::Chain => {
            if envelope.recipient.as_deref() != Some(inner.public_key.as_str()) {
                return;
            }
            match envelope.data.map(serde_json::from_value::<ChainData>) {
                Some(Ok(data)) => sync::on_chain_snapshot(inner, envelope.key, data),
                _ => tracing::debug!("dropping malformed CHAIN payload"),
            }
        }
        MessageKind::NewTransaction => {
            let Some(Value::String(serialized)) = envelope.data else {
                return;
            };
            match Transaction::deserialize(&serialized) {
                Ok(tx) => vote::on_new_transaction(inner, tx),
                Err(e) => tracing::debug!("dropping malformed transaction: {}", e),
            }
        }
        MessageKind::Transaction => {
            match envelope.data.map(serde_json::from_value::<VoteData>) {
                Some(Ok(data)) => vote::on_peer_vote(inner, envelope.key, data),
                _ => tracing::debug!("dropping malformed TRANSACTION payload"),
            }
        }
    }
}

/// Add a peer to the validator set if its on-chain stake qualifies.
///
/// `greet` acknowledges a fresh `VALIDATOR` announcement with
/// `HELLO_VALIDATOR`; the acknowledgement itself gets no further reply.
fn add_validator(inner: &Arc<NodeInner>, pubkey: String, greet: bool) {
    if pubkey == inner.public_key {
        return;
    }
    if inner.accounts.stake_of(&pubkey) < MIN_STAKE {
        tracing::debug!("ignoring under-staked validator {}", short(&pubkey));
        return;
    }
    if inner.validators.lock().insert(pubkey.clone()) {
        tracing::info!("validator joined: {}", short(&pubkey));
    }
    if greet {
        broadcast(
            inner,
            MessageKind::HelloValidator,
            Some(Value::String(inner.public_key.clone())),
            None,
        );
    }
}

/// Answer `GET_CHAIN` with a snapshot addressed to the requester.
fn send_chain_snapshot(inner: &Arc<NodeInner>, requester: String) {
    let (records_json, root) = {
        let chain = inner.chain.lock();
        (
            serde_json::to_string(&chain.transactions)
                .expect("chain serialization should not fail"),
            chain.root(),
        )
    };
    let data = serde_json::to_value(ChainData {
        transactions: records_json,
        root,
    })
    .expect("chain payload serialization should not fail");
    broadcast(inner, MessageKind::Chain, Some(data), Some(requester));
}

/// Sign and flood an envelope of our own to every open socket.
pub(crate) fn broadcast(
    inner: &Arc<NodeInner>,
    kind: MessageKind,
    data: Option<Value>,
    recipient: Option<String>,
) {
    let mut envelope = Envelope::new(kind, data, recipient, inner.public_key.clone());
    if let Err(e) = envelope.sign(&inner.keypair) {
        tracing::error!("failed to sign envelope: {}", e);
        return;
    }
    // Record our own id so a flood echo is never reprocessed.
    record_seen(inner, &envelope.id);

    let text = serde_json::to_string(&envelope).expect("envelope serialization should not fail");
    for socket in inner.sockets.lock().values() {
        let _ = socket.sender.send(Outbound::Frame(text.clone()));
    }
}

fn flood_except(inner: &Arc<NodeInner>, except: u64, text: &str) {
    for (id, socket) in inner.sockets.lock().iter() {
        if *id != except {
            let _ = socket.sender.send(Outbound::Frame(text.to_string()));
        }
    }
}

fn record_seen(inner: &Arc<NodeInner>, id: &str) {
    let mut seen = inner.seen_ids.lock();
    seen.push_back(id.to_string());
    while seen.len() > GOSSIP_DEDUP_WINDOW {
        seen.pop_front();
    }
}

/// Cleanup when a socket's reader task ends.
///
/// The validator set is defined by live membership, so any close empties
/// it and asks the mesh to re-announce.
fn on_socket_closed(inner: &Arc<NodeInner>, id: u64) {
    if inner.sockets.lock().remove(&id).is_none() {
        return;
    }
    tracing::info!("socket {} closed", id);
    inner.validators.lock().clear();
    broadcast(inner, MessageKind::Validators, None, None);
    schedule_exit_watchdog(inner, Duration::from_secs(5));
}

/// After `delay`, exit for a supervisor restart if no peer is left.
pub(crate) fn schedule_exit_watchdog(inner: &Arc<NodeInner>, delay: Duration) {
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if inner.sockets.lock().is_empty() {
            if inner.exit_on_disconnect {
                tracing::info!("no peers connected, exiting for supervisor restart");
                std::process::exit(0);
            }
            tracing::warn!("no peers connected");
        }
    });
}

/// Close every socket bound to one of the given identities.
pub(crate) fn close_sockets_with_identity(inner: &Arc<NodeInner>, identities: &HashSet<String>) {
    for (id, socket) in inner.sockets.lock().iter() {
        if let Some(identity) = &socket.identity {
            if identities.contains(identity) {
                tracing::warn!(
                    "closing socket {} of silent validator {}",
                    id,
                    short(identity)
                );
                let _ = socket.sender.send(Outbound::Close);
            }
        }
    }
}

/// Truncated key for logs.
pub(crate) fn short(key: &str) -> &str {
    &key[..key.len().min(8)]
}
