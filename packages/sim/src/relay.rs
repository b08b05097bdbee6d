//! In-process simulated relay: an `Arc<Mutex<..>>`-backed event store and
//! subscriber table implementing the same `REQ`/`EVENT`/`EOSE`/`CLOSE`
//! contract a real relay speaks over WebSocket, minus the socket. Scenario
//! tests drive rider and driver logic against this instead of a live relay
//! so the end-to-end scenarios run as ordinary `#[tokio::test]`s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use wayfare_core::{Event, Kind};
use wayfare_relay::{EventHandler, PublishOutcome, RelayHandle};

/// A REQ filter, simplified from the wire's JSON-object form to the fields
/// the scenarios actually need: kind and/or a `#p`-tagged recipient pubkey.
#[derive(Debug, Clone, Default)]
pub struct SimFilter {
    pub kinds: Vec<Kind>,
    pub p_tag: Option<String>,
}

impl SimFilter {
    pub fn kind(kind: Kind) -> Self {
        Self { kinds: vec![kind], p_tag: None }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k.as_u32() == event.kind) {
            return false;
        }
        if let Some(ref p) = self.p_tag {
            if event.tag_values("p").iter().any(|v| v == p) {
                return true;
            }
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub enum SimRelayMessage {
    Event { sub_id: String, event: Event },
    Eose { sub_id: String },
}

struct Subscription {
    filters: Vec<SimFilter>,
    tx: mpsc::Sender<SimRelayMessage>,
}

struct Inner {
    /// Replaceable-kind events keyed by (pubkey, kind); everything else
    /// lives in `log` in publish order.
    replaceable: HashMap<(String, u32), Event>,
    log: Vec<Event>,
    subs: HashMap<String, Subscription>,
    /// Pubkeys currently unreachable, so publishes addressed to them (via a
    /// `#p` filter) are silently dropped. Models a driver that has gone
    /// offline mid-handshake.
    offline: std::collections::HashSet<String>,
}

#[derive(Clone)]
pub struct SimRelay {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRelay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                replaceable: HashMap::new(),
                log: Vec::new(),
                subs: HashMap::new(),
                offline: std::collections::HashSet::new(),
            })),
        }
    }

    pub async fn set_offline(&self, pubkey_hex: &str, offline: bool) {
        let mut inner = self.inner.lock().await;
        if offline {
            inner.offline.insert(pubkey_hex.to_string());
        } else {
            inner.offline.remove(pubkey_hex);
        }
    }

    /// Publishes an event: stores it (replacing the prior one if the kind
    /// is replaceable), then fans it out to every open subscription whose
    /// filters match. A recipient named in a `#p` tag who is marked offline
    /// never sees the event, live or on replay.
    pub async fn publish(&self, event: Event) {
        let mut inner = self.inner.lock().await;

        let recipients_offline = event
            .tag_values("p")
            .iter()
            .any(|p| inner.offline.contains(*p));
        if recipients_offline {
            return;
        }

        if Kind::from_u32(event.kind).is_some_and(|k| k.is_replaceable()) {
            inner
                .replaceable
                .insert((event.pubkey.to_hex(), event.kind), event.clone());
        } else {
            inner.log.push(event.clone());
        }

        let matching: Vec<(String, mpsc::Sender<SimRelayMessage>)> = inner
            .subs
            .iter()
            .filter(|(_, sub)| sub.filters.iter().any(|f| f.matches(&event)))
            .map(|(sub_id, sub)| (sub_id.clone(), sub.tx.clone()))
            .collect();
        drop(inner);

        for (sub_id, tx) in matching {
            let _ = tx.send(SimRelayMessage::Event { sub_id, event: event.clone() }).await;
        }
    }

    /// Opens a subscription: replays every stored event matching `filters`,
    /// sends `EOSE`, then streams future matches live.
    pub async fn req(&self, sub_id: impl Into<String>, filters: Vec<SimFilter>) -> mpsc::Receiver<SimRelayMessage> {
        let sub_id = sub_id.into();
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock().await;

        let mut backlog: Vec<Event> = inner
            .replaceable
            .values()
            .filter(|e| filters.iter().any(|f| f.matches(e)))
            .cloned()
            .collect();
        backlog.extend(inner.log.iter().filter(|e| filters.iter().any(|f| f.matches(e))).cloned());

        inner.subs.insert(sub_id.clone(), Subscription { filters, tx: tx.clone() });
        drop(inner);

        for event in backlog {
            let _ = tx.send(SimRelayMessage::Event { sub_id: sub_id.clone(), event }).await;
        }
        let _ = tx.send(SimRelayMessage::Eose { sub_id: sub_id.clone() }).await;

        rx
    }

    pub async fn close(&self, sub_id: &str) {
        self.inner.lock().await.subs.remove(sub_id);
    }

    pub async fn open_subscription_count(&self) -> usize {
        self.inner.lock().await.subs.len()
    }
}

/// Adapts [`SimRelay`]'s receiver-based `req`/`publish` pair to the
/// callback-based [`RelayHandle`] the coordinators are written against, so a
/// scenario can hand a real coordinator a simulated relay exactly where it
/// expects a `RelayClient`. Each `subscribe` spawns one task translating the
/// filter JSON the coordinators send into [`SimFilter`] and forwarding every
/// delivered event to the handler until the receiver closes.
#[derive(Clone)]
pub struct SimRelayHandle {
    relay: SimRelay,
}

impl SimRelayHandle {
    pub fn new(relay: SimRelay) -> Self {
        Self { relay }
    }
}

fn filters_from_json(filters: &[serde_json::Value]) -> Vec<SimFilter> {
    filters
        .iter()
        .map(|f| {
            let kinds = f
                .get("kinds")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().filter_map(|k| k.as_u64().and_then(|n| Kind::from_u32(n as u32))).collect())
                .unwrap_or_default();
            let p_tag = f
                .get("#p")
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            SimFilter { kinds, p_tag }
        })
        .collect()
}

#[async_trait]
impl RelayHandle for SimRelayHandle {
    async fn publish(&self, event: Event) -> PublishOutcome {
        self.relay.publish(event).await;
        PublishOutcome::Accepted
    }

    async fn subscribe(&self, sub_id: String, filters: Vec<serde_json::Value>, handler: EventHandler) {
        let mut rx = self.relay.req(sub_id, filters_from_json(&filters)).await;
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let SimRelayMessage::Event { event, .. } = msg {
                    handler(event);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Keypair, Secp256k1, SecretKey};
    use wayfare_core::event::{sign, EventDraft};
    use wayfare_core::Id32;

    fn keypair() -> (SecretKey, Id32) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let kp = Keypair::from_secret_key(&secp, &sk);
        let (xonly, _) = kp.x_only_public_key();
        (sk, Id32(xonly.serialize()))
    }

    fn event(sk: &SecretKey, pk: Id32, kind: Kind, tags: Vec<Vec<String>>) -> Event {
        sign(
            EventDraft { pubkey: pk, created_at: 1_700_000_000, kind: kind.as_u32(), tags, content: "{}".into() },
            sk,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn req_replays_backlog_then_sends_eose() {
        let relay = SimRelay::new();
        let (sk, pk) = keypair();
        relay.publish(event(&sk, pk, Kind::Offer, vec![])).await;

        let mut rx = relay.req("sub1", vec![SimFilter::kind(Kind::Offer)]).await;
        match rx.recv().await.unwrap() {
            SimRelayMessage::Event { .. } => {}
            other => panic!("expected Event, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            SimRelayMessage::Eose { .. } => {}
            other => panic!("expected Eose, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replaceable_kind_keeps_only_newest_per_pubkey() {
        let relay = SimRelay::new();
        let (sk, pk) = keypair();
        relay.publish(event(&sk, pk, Kind::Availability, vec![])).await;
        relay.publish(event(&sk, pk, Kind::Availability, vec![vec!["g".into(), "9q8yy".into()]])).await;

        let mut rx = relay.req("sub1", vec![SimFilter::kind(Kind::Availability)]).await;
        let first = rx.recv().await.unwrap();
        let SimRelayMessage::Event { event, .. } = first else { panic!("expected event") };
        assert_eq!(event.tag_value("g"), Some("9q8yy"));
        assert!(matches!(rx.recv().await.unwrap(), SimRelayMessage::Eose { .. }));
    }

    #[tokio::test]
    async fn offline_recipient_never_sees_addressed_events() {
        let relay = SimRelay::new();
        let (sk, pk) = keypair();
        relay.set_offline("driver-1", true).await;
        relay
            .publish(event(&sk, pk, Kind::Offer, vec![vec!["p".into(), "driver-1".into()]]))
            .await;

        let mut rx = relay.req("sub1", vec![SimFilter { kinds: vec![Kind::Offer], p_tag: Some("driver-1".into()) }]).await;
        assert!(matches!(rx.recv().await.unwrap(), SimRelayMessage::Eose { .. }));
    }

    #[tokio::test]
    async fn close_stops_further_delivery() {
        let relay = SimRelay::new();
        let (sk, pk) = keypair();
        let mut rx = relay.req("sub1", vec![SimFilter::kind(Kind::Offer)]).await;
        assert!(matches!(rx.recv().await.unwrap(), SimRelayMessage::Eose { .. }));

        relay.close("sub1").await;
        assert_eq!(relay.open_subscription_count().await, 0);

        relay.publish(event(&sk, pk, Kind::Offer, vec![])).await;
        assert!(rx.recv().await.is_none());
    }
}
