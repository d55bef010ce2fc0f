//! Subscriber bookkeeping on the host.
//!
//! Downstream events are delivered to endpoints that announced themselves on
//! `EVENT_ON`/`EVENT_ONCE`. Upstream events are delivered to listeners the host
//! registered through [`Publisher::on`](super::Publisher::on).

use crate::subscription::SubscribeMode;
use crate::transfer::Arg;
use crate::transport::EndpointRef;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Host-side listener for an upstream event.
pub type HostListener = Arc<dyn Fn(&Arg) + Send + Sync>;

#[derive(Default)]
struct EventEndpoints {
    on: Vec<EndpointRef>,
    once: Vec<EndpointRef>,
}

/// Endpoints subscribed to each downstream event.
#[derive(Default)]
pub(crate) struct EndpointSubscriptions {
    events: HashMap<String, EventEndpoints>,
}

impl EndpointSubscriptions {
    /// Record a subscription. An endpoint appears at most once per list.
    pub(crate) fn add(&mut self, event: &str, mode: SubscribeMode, endpoint: EndpointRef) {
        let entry = self.events.entry(event.to_string()).or_default();
        let list = match mode {
            SubscribeMode::On => &mut entry.on,
            SubscribeMode::Once => &mut entry.once,
        };
        if !list.iter().any(|existing| existing.id() == endpoint.id()) {
            list.push(endpoint);
        }
    }

    /// Endpoints that should receive the next emission of `event`.
    ///
    /// Destroyed endpoints are pruned first. Each live endpoint is returned once
    /// even if it sits in both lists, and the once list is cleared.
    pub(crate) fn take_recipients(&mut self, event: &str) -> Vec<EndpointRef> {
        let Some(entry) = self.events.get_mut(event) else {
            return Vec::new();
        };

        let before = entry.on.len() + entry.once.len();
        entry.on.retain(|endpoint| !endpoint.is_destroyed());
        entry.once.retain(|endpoint| !endpoint.is_destroyed());
        let pruned = before - (entry.on.len() + entry.once.len());
        if pruned > 0 {
            debug!("Pruned {} destroyed endpoint(s) from event '{}'", pruned, event);
        }

        let mut seen = HashSet::new();
        let recipients = entry
            .on
            .iter()
            .chain(entry.once.iter())
            .filter(|endpoint| seen.insert(endpoint.id()))
            .cloned()
            .collect();
        entry.once.clear();
        recipients
    }

    /// Forget every endpoint subscribed to `event`.
    pub(crate) fn clear(&mut self, event: &str) {
        self.events.remove(event);
    }

    pub(crate) fn subscriber_count(&self, event: &str) -> usize {
        self.events
            .get(event)
            .map(|entry| {
                entry
                    .on
                    .iter()
                    .chain(entry.once.iter())
                    .filter(|endpoint| !endpoint.is_destroyed())
                    .map(|endpoint| endpoint.id())
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct ListenerLists {
    on: Vec<(u64, HostListener)>,
    once: Vec<(u64, HostListener)>,
}

/// Host listeners for upstream events.
#[derive(Default)]
pub(crate) struct HostListeners {
    events: HashMap<String, ListenerLists>,
    next_id: u64,
}

impl HostListeners {
    pub(crate) fn add(&mut self, event: &str, mode: SubscribeMode, listener: HostListener) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let lists = self.events.entry(event.to_string()).or_default();
        match mode {
            SubscribeMode::On => lists.on.push((id, listener)),
            SubscribeMode::Once => lists.once.push((id, listener)),
        }
        id
    }

    pub(crate) fn remove(&mut self, event: &str, id: u64) {
        if let Some(lists) = self.events.get_mut(event) {
            lists.on.retain(|(existing, _)| *existing != id);
            lists.once.retain(|(existing, _)| *existing != id);
        }
    }

    pub(crate) fn clear(&mut self, event: &str) {
        self.events.remove(event);
    }

    /// Listeners to run for one delivery; once-listeners are consumed.
    pub(crate) fn take_for_dispatch(&mut self, event: &str) -> Vec<HostListener> {
        let Some(lists) = self.events.get_mut(event) else {
            return Vec::new();
        };
        let mut listeners: Vec<HostListener> =
            lists.on.iter().map(|(_, listener)| listener.clone()).collect();
        listeners.extend(lists.once.drain(..).map(|(_, listener)| listener));
        listeners
    }
}
