//! Name-addressable subscription handles with create-before-close semantics.
//!
//! A [`SubscriptionRegistry`] does not itself talk to relays; it tracks the
//! opaque handles a [`crate::SubHandle`]-producing relay client hands back,
//! keyed by a caller-chosen name (`"DRIVER_STATE"`, `"CHAT"`, ...) or grouped
//! under a dynamic key (one handle per counterparty pubkey).

use std::collections::HashMap;

use async_trait::async_trait;

/// Anything that can be told to stop listening. Implemented by the relay
/// client's subscription handle; mocked directly in tests.
#[async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self);
}

pub struct SubscriptionRegistry<H: Closeable> {
    singles: HashMap<String, H>,
    groups: HashMap<String, HashMap<String, H>>,
}

impl<H: Closeable> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self {
            singles: HashMap::new(),
            groups: HashMap::new(),
        }
    }
}

impl<H: Closeable> SubscriptionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` under `key`. If a handle already exists there, the
    /// new one is stored first and the old one closed after, so there is no
    /// window in which `key` has no live subscription.
    pub async fn set(&mut self, key: &str, handle: H) {
        let old = self.singles.insert(key.to_string(), handle);
        if let Some(old) = old {
            old.close().await;
        }
    }

    pub fn get(&self, key: &str) -> Option<&H> {
        self.singles.get(key)
    }

    pub async fn close(&mut self, key: &str) {
        if let Some(handle) = self.singles.remove(key) {
            handle.close().await;
        }
    }

    pub async fn close_all(&mut self, keys: &[&str]) {
        for key in keys {
            self.close(key).await;
        }
    }

    pub async fn close_everything(&mut self) {
        let keys: Vec<String> = self.singles.keys().cloned().collect();
        for key in keys {
            self.close(&key).await;
        }
        let groups: Vec<String> = self.groups.keys().cloned().collect();
        for group in groups {
            self.close_group(&group).await;
        }
    }

    pub async fn set_in_group(&mut self, group: &str, subkey: &str, handle: H) {
        let entry = self.groups.entry(group.to_string()).or_default();
        let old = entry.insert(subkey.to_string(), handle);
        if let Some(old) = old {
            old.close().await;
        }
    }

    pub async fn close_in_group(&mut self, group: &str, subkey: &str) {
        if let Some(entry) = self.groups.get_mut(group) {
            if let Some(handle) = entry.remove(subkey) {
                handle.close().await;
            }
        }
    }

    pub async fn close_group(&mut self, group: &str) {
        if let Some(entry) = self.groups.remove(group) {
            for (_, handle) in entry {
                handle.close().await;
            }
        }
    }

    pub fn group_contains(&self, group: &str, subkey: &str) -> bool {
        self.groups
            .get(group)
            .map(|g| g.contains_key(subkey))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandle(Arc<AtomicUsize>);

    #[async_trait]
    impl Closeable for CountingHandle {
        async fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn set_closes_previous_handle_after_installing_new_one() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry: SubscriptionRegistry<CountingHandle> = SubscriptionRegistry::new();

        registry.set("DRIVERS", CountingHandle(closed.clone())).await;
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        registry.set("DRIVERS", CountingHandle(closed.clone())).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_all_closes_every_named_key() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry: SubscriptionRegistry<CountingHandle> = SubscriptionRegistry::new();
        registry.set("OFFERS", CountingHandle(closed.clone())).await;
        registry.set("CHAT", CountingHandle(closed.clone())).await;

        registry.close_all(&["OFFERS", "CHAT", "MISSING"]).await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn group_operations_scope_to_the_group() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry: SubscriptionRegistry<CountingHandle> = SubscriptionRegistry::new();
        registry
            .set_in_group("PROFILES", "pubkey-a", CountingHandle(closed.clone()))
            .await;
        registry
            .set_in_group("PROFILES", "pubkey-b", CountingHandle(closed.clone()))
            .await;

        assert!(registry.group_contains("PROFILES", "pubkey-a"));
        registry.close_group("PROFILES").await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(!registry.group_contains("PROFILES", "pubkey-a"));
    }
}
