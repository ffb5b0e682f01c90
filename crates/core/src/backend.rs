//! The backend's resource collection: a [Collection] plus the registry
//! of subscribed distributors and the only-functional gate.

use crate::Collection;
use culvert_api::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// How many undelivered diffs a subscriber channel may hold before the
/// subscriber is considered stuck and evicted.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The sending half of a subscriber's event channel.
pub type DiffSender = mpsc::Sender<ResourceDiff>;
/// The receiving half of a subscriber's event channel.
pub type DiffReceiver = mpsc::Receiver<ResourceDiff>;

/// What we track per subscribed distributor: the channels updates go to
/// and the request that tells us which types it wants. A distributor may
/// hold several channels, one per open stream.
#[derive(Debug)]
struct EventRecipient {
    request: ResourceRequest,
    senders: Vec<DiffSender>,
}

/// The collection of resources the backend distributes.
///
/// Wraps a [Collection] with a registry of subscribers and the
/// only-functional gate. The hashrings carry their own locks; the
/// registry has its own, which is never held while a ring lock is held.
#[derive(Debug)]
pub struct BackendResources {
    collection: Collection,
    only_functional: AtomicBool,
    recipients: RwLock<HashMap<String, EventRecipient>>,
}

impl BackendResources {
    /// Wrap a fully registered collection.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            only_functional: AtomicBool::new(false),
            recipients: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped collection.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Whether only functional resources are handed out right now.
    pub fn only_functional(&self) -> bool {
        self.only_functional.load(Ordering::Relaxed)
    }

    /// Set the only-functional gate. Recomputed by the ingestion loop
    /// after each cycle; below the threshold the backend distributes
    /// everything, so clients are not starved after a cold start or a
    /// prober outage.
    pub fn set_only_functional(&self, only: bool) {
        self.only_functional.store(only, Ordering::Relaxed);
    }

    /// Add the given resource. If it already exists but its oid changed,
    /// the stored resource is updated. Subscribers owning the resource
    /// hear about new and changed resources; submissions for
    /// unregistered types are dropped.
    pub fn add(&self, r: DynResource) {
        let Some(ring) = self.collection.ring(r.resource_type()) else {
            return;
        };
        let event = ring.add_or_update(r.clone());
        if event != ResourceEvent::Unchanged {
            self.propagate_update(r, event);
        }
    }

    /// Remove expired resources from every ring, emitting a gone event
    /// for each.
    pub fn prune(&self) {
        for rtype in self.collection.types() {
            let ring = self.collection.ring(rtype).expect("typed ring");
            for r in ring.prune() {
                self.propagate_update(r, ResourceEvent::Gone);
            }
        }
    }

    /// The resources of the requested type for the given distributor,
    /// with non-functional resources filtered out while the gate is up.
    pub fn get(&self, dist_name: &str, rtype: &str) -> Vec<DynResource> {
        let only_functional = self.only_functional();
        self.collection
            .get(dist_name, rtype)
            .into_iter()
            .filter(|r| {
                !only_functional
                    || r.test_result().status == ResourceStatus::Functional
            })
            .collect()
    }

    /// Register a channel to be informed about resource updates for the
    /// request's origin and types.
    pub fn subscribe(&self, request: ResourceRequest, sender: DiffSender) {
        let mut recipients =
            self.recipients.write().expect("poisoned recipient lock");
        let dist_name = request.request_origin.clone();
        tracing::info!(%dist_name, "registered update channel");
        match recipients.entry(dist_name) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().senders.push(sender);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(EventRecipient {
                    request,
                    senders: vec![sender],
                });
            }
        }
    }

    /// Unregister a single channel. The distributor's entry survives if
    /// it still holds other channels.
    pub fn unsubscribe(&self, dist_name: &str, sender: &DiffSender) {
        let mut recipients =
            self.recipients.write().expect("poisoned recipient lock");
        if let Some(recipient) = recipients.get_mut(dist_name) {
            recipient.senders.retain(|s| !s.same_channel(sender));
            if recipient.senders.is_empty() {
                recipients.remove(dist_name);
            }
            tracing::info!(dist_name, "unregistered update channel");
        }
    }

    /// Send the update to every subscriber that asked for the resource's
    /// type and owns the resource per the type's stencil. A full channel
    /// means the subscriber stopped consuming; it is evicted rather than
    /// allowed to stall the ingestion side.
    fn propagate_update(&self, r: DynResource, event: ResourceEvent) {
        let Some(ring) = self.collection.ring(r.resource_type()) else {
            return;
        };
        let Some(diff) = ResourceDiff::singleton(event, r.clone()) else {
            return;
        };

        let mut stuck: Vec<(String, DiffSender)> = Vec::new();
        {
            let recipients =
                self.recipients.read().expect("poisoned recipient lock");
            for (dist_name, recipient) in recipients.iter() {
                if !recipient.request.has_resource_type(r.resource_type()) {
                    continue;
                }
                if !ring.does_dist_own_resource(&*r, dist_name) {
                    continue;
                }
                for sender in &recipient.senders {
                    // Full means the subscriber stopped consuming, closed
                    // means it went away without unsubscribing. Either
                    // way the channel is dead weight.
                    if sender.try_send(diff.clone()).is_err() {
                        stuck.push((dist_name.clone(), sender.clone()));
                    }
                }
            }
        }

        for (dist_name, sender) in stuck {
            tracing::warn!(%dist_name, "subscriber stuck, evicting channel");
            self.unsubscribe(&dist_name, &sender);
        }
    }
}
