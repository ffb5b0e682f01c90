//! The typed resource collection: resource type tag to split hashring.

use crate::{build_stencil, Hashring, SplitHashring};
use culvert_api::*;
use std::collections::HashMap;

/// Maps a resource type (e.g. "obfs4") to its split hashring.
///
/// Types are registered once, at startup; afterwards the collection is
/// only shared immutably and all mutation happens inside the rings'
/// own locks.
#[derive(Debug, Default)]
pub struct Collection {
    rings: HashMap<String, SplitHashring>,
}

impl Collection {
    /// Construct a new, empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type. Unpartitioned types get a plain ring;
    /// partitioned types get a stencil built from the distributor
    /// proportions. Re-registering an existing type keeps the existing
    /// ring and stencil untouched.
    pub fn add_resource_type(
        &mut self,
        rtype: &str,
        unpartitioned: bool,
        proportions: &HashMap<String, u32>,
    ) {
        if self.rings.contains_key(rtype) {
            tracing::warn!(rtype, "resource type already registered, keeping");
            return;
        }
        tracing::info!(rtype, unpartitioned, "creating split hashring");
        let ring = if unpartitioned {
            SplitHashring::unpartitioned()
        } else {
            SplitHashring::partitioned(build_stencil(proportions))
        };
        self.rings.insert(rtype.to_string(), ring);
    }

    /// The split hashring registered for the given type.
    pub fn ring(&self, rtype: &str) -> Option<&SplitHashring> {
        self.rings.get(rtype)
    }

    /// The registered resource type tags.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.rings.keys().map(|k| k.as_str())
    }

    /// The resources of the requested type allocated to the given
    /// distributor. An unknown type yields an empty result, not an
    /// error: distributors may be configured for types this backend
    /// does not carry.
    pub fn get(&self, dist_name: &str, rtype: &str) -> Vec<DynResource> {
        self.get_ring(dist_name, rtype).get_all()
    }

    /// The hashring of the requested type for the given distributor.
    pub fn get_ring(&self, dist_name: &str, rtype: &str) -> Hashring {
        let Some(ring) = self.rings.get(rtype) else {
            tracing::debug!(rtype, "requested type not in collection");
            return Hashring::new();
        };
        match ring.get_for_dist(dist_name) {
            Ok(sub) => sub,
            Err(err) => {
                tracing::warn!(?err, dist_name, "failed to slice ring");
                Hashring::new()
            }
        }
    }

    /// Apply a resource diff, dispatching each entry to its type's ring.
    /// Entries for unregistered types are dropped.
    pub fn apply_diff(&self, diff: &ResourceDiff) {
        let one = |rmap: &ResourceMap,
                       apply: &dyn Fn(&SplitHashring, &DynResource)| {
            for (rtype, resources) in rmap {
                let Some(ring) = self.rings.get(rtype) else {
                    tracing::debug!(%rtype, "diff entry for unknown type");
                    continue;
                };
                for r in resources {
                    apply(ring, r);
                }
            }
        };
        one(&diff.new, &|ring, r| {
            let _ = ring.add(r.clone());
        });
        one(&diff.changed, &|ring, r| {
            ring.add_or_update(r.clone());
        });
        one(&diff.gone, &|ring, r| {
            let _ = ring.remove(&**r);
        });
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.rings.keys().collect();
        keys.sort();
        let parts: Vec<String> = keys
            .iter()
            .map(|k| format!("{} {}", self.rings[*k].len(), k))
            .collect();
        f.write_str(&parts.join(", "))
    }
}
