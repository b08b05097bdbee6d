//! Multiplexed relay client: one WebSocket connection per relay URL,
//! exponential-backoff reconnect with subscription re-issue, parallel
//! fanout publish, and per-subscription serialized, id-deduplicated handler
//! invocation.
//!
//! Mutable state (connections, open subscriptions, the dedup cache) lives
//! entirely inside one background task; callers talk to it over an `mpsc`
//! command channel, the same actor shape the coordinators use for ride state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;
use wayfare_core::bounded_cache::BoundedHashCache;
use wayfare_core::subscription::Closeable;
use wayfare_core::Event;

use crate::message::{parse_relay_message, ClientMessage, RelayMessage};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const DEDUP_CACHE_SIZE: usize = 20_000;
const DEDUP_CACHE_TTL_SECS: u64 = 3_600;

pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Object-safe seam between a coordinator and whatever it talks to a relay
/// network through. `RelayClient` is the only production implementation;
/// tests stand in a simulated relay behind the same two calls so a
/// coordinator never has to know which one it's driving.
#[async_trait]
pub trait RelayHandle: Send + Sync {
    async fn publish(&self, event: Event) -> PublishOutcome;
    async fn subscribe(&self, sub_id: String, filters: Vec<Value>, handler: EventHandler);
}

#[async_trait]
impl RelayHandle for RelayClient {
    async fn publish(&self, event: Event) -> PublishOutcome {
        RelayClient::publish(self, event).await
    }

    async fn subscribe(&self, sub_id: String, filters: Vec<Value>, handler: EventHandler) {
        RelayClient::subscribe(self, sub_id, filters, handler).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// At least one relay acknowledged the event.
    Accepted,
    /// Every relay rejected or was unreachable.
    Rejected,
}

enum Command {
    Publish {
        event: Event,
        reply: oneshot::Sender<PublishOutcome>,
    },
    Subscribe {
        sub_id: String,
        filters: Vec<Value>,
        handler: EventHandler,
        reply: oneshot::Sender<()>,
    },
    Close {
        sub_id: String,
    },
    Shutdown,
}

/// Handle returned by `subscribe`; implements [`Closeable`] so it plugs
/// directly into `wayfare_core::subscription::SubscriptionRegistry`.
pub struct SubHandle {
    sub_id: String,
    commands: mpsc::Sender<Command>,
}

#[async_trait]
impl Closeable for SubHandle {
    async fn close(&self) {
        let _ = self.commands.send(Command::Close { sub_id: self.sub_id.clone() }).await;
    }
}

#[derive(Clone)]
pub struct RelayClient {
    commands: mpsc::Sender<Command>,
}

struct OpenSubscription {
    filters: Vec<Value>,
    handler: EventHandler,
}

struct RelayConn {
    url: Url,
    outbound: mpsc::Sender<WsMessage>,
}

impl RelayClient {
    /// Spawns the actor task and starts one connection loop per URL.
    pub fn connect(urls: Vec<Url>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_actor(urls, rx, tx.clone()));
        Self { commands: tx }
    }

    pub async fn publish(&self, event: Event) -> PublishOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Publish { event, reply: reply_tx })
            .await
            .is_err()
        {
            return PublishOutcome::Rejected;
        }
        reply_rx.await.unwrap_or(PublishOutcome::Rejected)
    }

    pub async fn subscribe(&self, sub_id: impl Into<String>, filters: Vec<Value>, handler: EventHandler) -> SubHandle {
        let sub_id = sub_id.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .commands
            .send(Command::Subscribe {
                sub_id: sub_id.clone(),
                filters,
                handler,
                reply: reply_tx,
            })
            .await;
        let _ = reply_rx.await;
        SubHandle {
            sub_id,
            commands: self.commands.clone(),
        }
    }

    pub async fn close_all(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

async fn run_actor(urls: Vec<Url>, mut commands: mpsc::Receiver<Command>, self_tx: mpsc::Sender<Command>) {
    let connections: Arc<Mutex<HashMap<Url, RelayConn>>> = Arc::new(Mutex::new(HashMap::new()));
    let subscriptions: Arc<Mutex<HashMap<String, OpenSubscription>>> = Arc::new(Mutex::new(HashMap::new()));
    let seen = Arc::new(Mutex::new(BoundedHashCache::new(DEDUP_CACHE_SIZE, DEDUP_CACHE_TTL_SECS)));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<RelayMessage>(1024);

    for url in urls {
        spawn_connection_loop(url, connections.clone(), subscriptions.clone(), inbound_tx.clone());
    }

    loop {
        tokio::select! {
            Some(cmd) = commands.recv() => {
                match cmd {
                    Command::Publish { event, reply } => {
                        let outcome = fanout_publish(&connections, event).await;
                        let _ = reply.send(outcome);
                    }
                    Command::Subscribe { sub_id, filters, handler, reply } => {
                        subscriptions.lock().await.insert(sub_id.clone(), OpenSubscription { filters: filters.clone(), handler });
                        issue_subscription(&connections, &sub_id, &filters).await;
                        let _ = reply.send(());
                    }
                    Command::Close { sub_id } => {
                        subscriptions.lock().await.remove(&sub_id);
                        issue_close(&connections, &sub_id).await;
                    }
                    Command::Shutdown => {
                        let conns = connections.lock().await;
                        for conn in conns.values() {
                            let _ = conn.outbound.send(WsMessage::Close(None)).await;
                        }
                        break;
                    }
                }
            }
            Some(msg) = inbound_rx.recv() => {
                handle_relay_message(&subscriptions, &seen, msg).await;
            }
            else => break,
        }
    }
    let _ = self_tx; // keep a clone alive for reconnect tasks' use of the channel type
}

async fn handle_relay_message(
    subscriptions: &Arc<Mutex<HashMap<String, OpenSubscription>>>,
    seen: &Arc<Mutex<BoundedHashCache>>,
    msg: RelayMessage,
) {
    match msg {
        RelayMessage::Event { sub_id, event } => {
            {
                let mut seen = seen.lock().await;
                if seen.contains_key(event.id.as_bytes()) {
                    return;
                }
                seen.insert(*event.id.as_bytes());
            }
            let subs = subscriptions.lock().await;
            if let Some(sub) = subs.get(&sub_id) {
                (sub.handler)(event);
            }
        }
        RelayMessage::Eose { sub_id } => debug!(sub_id, "EOSE"),
        RelayMessage::Ok { id, ok, message } => {
            if !ok {
                warn!(id, message, "relay rejected publish");
            }
        }
        RelayMessage::Notice { message } => info!(message, "relay NOTICE"),
    }
}

async fn fanout_publish(connections: &Arc<Mutex<HashMap<Url, RelayConn>>>, event: Event) -> PublishOutcome {
    let conns = connections.lock().await;
    if conns.is_empty() {
        return PublishOutcome::Rejected;
    }
    let wire = ClientMessage::event(event).to_wire().to_string();
    let mut any_sent = false;
    for conn in conns.values() {
        if conn.outbound.send(WsMessage::Text(wire.clone())).await.is_ok() {
            any_sent = true;
        }
    }
    // A full success criterion would await each relay's OK frame; the
    // actor treats "queued to at least one live socket" as accepted and
    // lets the OK/NOTICE stream report rejections asynchronously.
    if any_sent {
        PublishOutcome::Accepted
    } else {
        PublishOutcome::Rejected
    }
}

async fn issue_subscription(connections: &Arc<Mutex<HashMap<Url, RelayConn>>>, sub_id: &str, filters: &[Value]) {
    let wire = ClientMessage::req(sub_id, filters.to_vec()).to_wire().to_string();
    let conns = connections.lock().await;
    for conn in conns.values() {
        let _ = conn.outbound.send(WsMessage::Text(wire.clone())).await;
    }
}

async fn issue_close(connections: &Arc<Mutex<HashMap<Url, RelayConn>>>, sub_id: &str) {
    let wire = ClientMessage::close(sub_id).to_wire().to_string();
    let conns = connections.lock().await;
    for conn in conns.values() {
        let _ = conn.outbound.send(WsMessage::Text(wire.clone())).await;
    }
}

/// Owns one relay's connection lifecycle: connect, forward outbound frames,
/// forward parsed inbound frames, and on disconnect back off exponentially
/// and reconnect, re-issuing every currently-open subscription against the
/// fresh socket so a dropped connection never leaves a subscription dark.
fn spawn_connection_loop(
    url: Url,
    connections: Arc<Mutex<HashMap<Url, RelayConn>>>,
    subscriptions: Arc<Mutex<HashMap<String, OpenSubscription>>>,
    inbound_tx: mpsc::Sender<RelayMessage>,
) {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws_stream, _response)) => {
                    info!(%url, "relay connected");
                    backoff = INITIAL_BACKOFF;
                    let (mut write, mut read) = ws_stream.split();
                    let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(256);
                    connections.lock().await.insert(
                        url.clone(),
                        RelayConn {
                            url: url.clone(),
                            outbound: out_tx.clone(),
                        },
                    );

                    {
                        let subs = subscriptions.lock().await;
                        for (sub_id, sub) in subs.iter() {
                            let wire = ClientMessage::req(sub_id, sub.filters.clone()).to_wire().to_string();
                            let _ = out_tx.send(WsMessage::Text(wire)).await;
                        }
                        if !subs.is_empty() {
                            debug!(%url, count = subs.len(), "re-issued open subscriptions after reconnect");
                        }
                    }

                    loop {
                        tokio::select! {
                            Some(frame) = out_rx.recv() => {
                                if write.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        if let Some(parsed) = parse_relay_message(&text) {
                                            let _ = inbound_tx.send(parsed).await;
                                        }
                                    }
                                    Some(Ok(WsMessage::Close(_))) | None => break,
                                    Some(Err(e)) => {
                                        warn!(%url, error = %e, "relay read error");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    connections.lock().await.remove(&url);
                    warn!(%url, "relay disconnected, reconnecting");
                }
                Err(e) => {
                    error!(%url, error = %e, "relay connect failed");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_outcome_equality() {
        assert_eq!(PublishOutcome::Accepted, PublishOutcome::Accepted);
        assert_ne!(PublishOutcome::Accepted, PublishOutcome::Rejected);
    }
}
