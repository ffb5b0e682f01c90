//! The hashring container: a sorted, lock-protected index of resources
//! keyed by their uid.

use culvert_api::*;
use std::sync::RwLock;

/// A node in a hashring.
#[derive(Debug, Clone)]
pub struct Hashnode {
    /// The resource's uid, the sort key of the ring.
    pub uid: Hashkey,
    /// The resource itself.
    pub resource: DynResource,
    /// When this node was last added or refreshed.
    pub last_update: Timestamp,
}

impl Hashnode {
    fn new(resource: DynResource) -> Self {
        Self {
            uid: resource.uid(),
            resource,
            last_update: Timestamp::now(),
        }
    }
}

/// A filter predicate over resources, as produced by a stencil.
pub type FilterFunc = Box<dyn Fn(&dyn Resource) -> bool + Send + Sync>;

/// A hashring of resources.
///
/// Nodes are kept strictly sorted ascending by uid, and uids are unique.
/// Lookups are circular: a key greater than every node wraps to the
/// first node. All mutation goes through the interior write lock, so the
/// ring is shared as `&Hashring` between the ingestion side and readers.
#[derive(Debug, Default)]
pub struct Hashring(RwLock<Vec<Hashnode>>);

impl Hashring {
    /// Construct a new, empty hashring.
    pub fn new() -> Self {
        Self::default()
    }

    fn from_nodes(nodes: Vec<Hashnode>) -> Self {
        Self(RwLock::new(nodes))
    }

    /// The number of resources on the ring.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if the ring holds no resources.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Add the given resource to the hashring. If the resource is
    /// already present, its node timestamp is refreshed and an error is
    /// returned. The error is soft: ingestion treats "already present"
    /// as a refresh, not a failure.
    pub fn add(&self, r: DynResource) -> CvtResult<()> {
        let to_test = {
            let mut nodes = self.write();
            match Self::position(&nodes, r.uid()) {
                Ok(i) => {
                    nodes[i].last_update = Timestamp::now();
                    return Err(CvtError::other(
                        "resource already present in hashring",
                    ));
                }
                Err(i) => {
                    let to_test = Self::pick_probe_target(&nodes, &r);
                    nodes.insert(i, Hashnode::new(r));
                    to_test
                }
            }
        };
        if let Some(r) = to_test {
            Self::spawn_probe(r);
        }
        Ok(())
    }

    /// Add the given resource to the hashring, or, if its uid is already
    /// present, refresh the node and replace the stored value iff the
    /// oid changed. The returned event tells the caller whether
    /// subscribers need to hear about it.
    pub fn add_or_update(&self, r: DynResource) -> ResourceEvent {
        let (event, to_test) = {
            let mut nodes = self.write();
            let to_test = Self::pick_probe_target(&nodes, &r);
            let event = match Self::position(&nodes, r.uid()) {
                Ok(i) => {
                    nodes[i].last_update = Timestamp::now();
                    if nodes[i].resource.oid() != r.oid() {
                        nodes[i].resource = r;
                        ResourceEvent::Changed
                    } else {
                        ResourceEvent::Unchanged
                    }
                }
                Err(i) => {
                    nodes.insert(i, Hashnode::new(r));
                    ResourceEvent::New
                }
            };
            (event, to_test)
        };
        if let Some(r) = to_test {
            Self::spawn_probe(r);
        }
        event
    }

    /// Remove the resource with the given resource's uid from the ring.
    pub fn remove(&self, r: &dyn Resource) -> CvtResult<()> {
        let mut nodes = self.write();
        match Self::position(&nodes, r.uid()) {
            Ok(i) => {
                nodes.remove(i);
                Ok(())
            }
            Err(_) => Err(CvtError::other("could not find key in hashring")),
        }
    }

    /// Retrieve the resource whose uid is the smallest uid greater than
    /// or equal to the given key, wrapping around to the first node. An
    /// empty ring is an error.
    pub fn get(&self, k: Hashkey) -> CvtResult<DynResource> {
        let nodes = self.read();
        if nodes.is_empty() {
            return Err(CvtError::other("hashring is empty"));
        }
        let i = match Self::position(&nodes, k) {
            Ok(i) => i,
            Err(i) => i % nodes.len(),
        };
        Ok(nodes[i].resource.clone())
    }

    /// Retrieve the resource whose uid equals the given key exactly.
    pub fn get_exact(&self, k: Hashkey) -> CvtResult<DynResource> {
        let nodes = self.read();
        match Self::position(&nodes, k) {
            Ok(i) => Ok(nodes[i].resource.clone()),
            Err(_) => Err(CvtError::other("could not find key in hashring")),
        }
    }

    /// Retrieve `num` consecutive resources starting at the circular
    /// position of the given key. Asking for more resources than the
    /// ring holds is an error. Deterministic for identical ring
    /// contents.
    pub fn get_many(
        &self,
        k: Hashkey,
        num: usize,
    ) -> CvtResult<Vec<DynResource>> {
        let nodes = self.read();
        if num > nodes.len() {
            return Err(CvtError::other(
                "requested more resources than the hashring has",
            ));
        }
        let start = match Self::position(&nodes, k) {
            Ok(i) => i,
            Err(i) => i % nodes.len().max(1),
        };
        Ok((0..num)
            .map(|j| nodes[(start + j) % nodes.len()].resource.clone())
            .collect())
    }

    /// A sort-order snapshot of all resources on the ring.
    pub fn get_all(&self) -> Vec<DynResource> {
        self.read().iter().map(|n| n.resource.clone()).collect()
    }

    /// A new hashring holding the subset of resources for which the
    /// predicate holds, preserving node order and timestamps.
    pub fn filter(&self, f: &FilterFunc) -> Hashring {
        let nodes = self
            .read()
            .iter()
            .filter(|n| f(&*n.resource))
            .cloned()
            .collect();
        Hashring::from_nodes(nodes)
    }

    /// Remove and return every resource whose node has not been
    /// refreshed within the resource's expiry window.
    pub fn prune(&self) -> Vec<DynResource> {
        let now = Timestamp::now();
        let mut pruned = Vec::new();
        self.write().retain(|n| {
            if now.saturating_duration_since(n.last_update)
                > n.resource.expiry()
            {
                pruned.push(n.resource.clone());
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Apply a resource diff to the ring: new resources are added,
    /// changed resources are updated, gone resources are removed.
    /// "Already present" and "not found" are tolerated, a diff may
    /// legitimately race a prune.
    pub fn apply_diff(&self, diff: &ResourceDiff) {
        for (rtype, resources) in &diff.new {
            tracing::debug!(
                count = resources.len(),
                %rtype,
                "adding resources"
            );
            for r in resources {
                let _ = self.add(r.clone());
            }
        }
        for (rtype, resources) in &diff.changed {
            tracing::debug!(
                count = resources.len(),
                %rtype,
                "updating resources"
            );
            for r in resources {
                self.add_or_update(r.clone());
            }
        }
        for (rtype, resources) in &diff.gone {
            tracing::debug!(
                count = resources.len(),
                %rtype,
                "removing resources"
            );
            for r in resources {
                let _ = self.remove(&**r);
            }
        }
    }

    /// Decide whether submitting `r` warrants a probe, and which
    /// incarnation to probe. The probe is skipped iff the uid already
    /// exists with an equal oid, the existing node has been probed
    /// before, and that probe is younger than the resource's expiry.
    /// When the existing incarnation is content-identical it is the one
    /// probed: it carries the installed test func and the shared state
    /// the ring serves.
    fn pick_probe_target(
        nodes: &[Hashnode],
        r: &DynResource,
    ) -> Option<DynResource> {
        if let Ok(i) = Self::position(nodes, r.uid()) {
            let old = &nodes[i].resource;
            if old.oid() == r.oid() {
                let result = old.test_result();
                if result.status != ResourceStatus::Untested {
                    if let Some(last) = result.last_tested {
                        if Timestamp::now().saturating_duration_since(last)
                            < old.expiry()
                        {
                            return None;
                        }
                    }
                }
                return Some(old.clone());
            }
        }
        Some(r.clone())
    }

    /// Probes run detached so the ring's lock is never held across user
    /// code or network io. Outside a tokio runtime (plain unit tests)
    /// the probe is skipped.
    fn spawn_probe(r: DynResource) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { r.test().await });
            }
            Err(_) => {
                tracing::debug!(uid = %r.uid(), "no runtime, skipping probe");
            }
        }
    }

    fn position(nodes: &[Hashnode], k: Hashkey) -> Result<usize, usize> {
        nodes.binary_search_by(|n| n.uid.cmp(&k))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Hashnode>> {
        self.0.read().expect("poisoned hashring lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Hashnode>> {
        self.0.write().expect("poisoned hashring lock")
    }

    /// Force a node's last_update back in time so expiry paths can be
    /// exercised without waiting.
    #[cfg(test)]
    pub(crate) fn backdate(&self, uid: Hashkey, to: Timestamp) -> bool {
        let mut nodes = self.write();
        match Self::position(&nodes, uid) {
            Ok(i) => {
                nodes[i].last_update = to;
                true
            }
            Err(_) => false,
        }
    }

    /// A node's last_update, for assertions on refresh behavior.
    #[cfg(test)]
    pub(crate) fn last_update(&self, uid: Hashkey) -> Option<Timestamp> {
        let nodes = self.read();
        Self::position(&nodes, uid).ok().map(|i| nodes[i].last_update)
    }
}
