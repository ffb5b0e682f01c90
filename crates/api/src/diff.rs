//! Differential resource change events.
//!
//! The backend informs subscribed distributors of resource changes by
//! sending [ResourceDiff]s: three typed bags of new, changed, and gone
//! resources. A diff can be applied onto any data structure that
//! implements a collection of resources, e.g. a hashring.

use crate::*;
use std::collections::HashMap;

/// Maps a resource type tag to a list of resources of that type.
pub type ResourceMap = HashMap<String, Vec<DynResource>>;

/// The lifecycle event a hashring reports for a submitted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    /// The resource was already present with an identical oid.
    Unchanged,
    /// The resource was not present before.
    New,
    /// The resource was present but its oid differs.
    Changed,
    /// The resource was removed.
    Gone,
}

/// A diff that contains new, changed, and gone resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceDiff {
    /// Resources not seen before.
    pub new: ResourceMap,
    /// Resources whose observable content changed.
    pub changed: ResourceMap,
    /// Resources that expired or were withdrawn.
    pub gone: ResourceMap,
}

impl ResourceDiff {
    /// Build a diff carrying a single resource under the given event.
    /// Returns None for [ResourceEvent::Unchanged], which carries no
    /// information worth propagating.
    pub fn singleton(event: ResourceEvent, r: DynResource) -> Option<Self> {
        let mut rmap = ResourceMap::new();
        rmap.insert(r.resource_type().to_string(), vec![r]);
        let mut out = Self::default();
        match event {
            ResourceEvent::New => out.new = rmap,
            ResourceEvent::Changed => out.changed = rmap,
            ResourceEvent::Gone => out.gone = rmap,
            ResourceEvent::Unchanged => return None,
        }
        Some(out)
    }

    /// True if the diff carries no resources at all.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.gone.is_empty()
    }

    /// Encode this diff as its wire object:
    /// `{"new": {<type>: [..]}, "changed": {..}, "gone": {..}}`.
    pub fn encode(&self) -> CvtResult<serde_json::Value> {
        fn enc_map(rmap: &ResourceMap) -> CvtResult<serde_json::Value> {
            let mut out = serde_json::Map::new();
            for (rtype, resources) in rmap {
                let entries = resources
                    .iter()
                    .map(|r| r.encode())
                    .collect::<CvtResult<Vec<_>>>()?;
                out.insert(rtype.clone(), serde_json::Value::Array(entries));
            }
            Ok(serde_json::Value::Object(out))
        }

        Ok(serde_json::json!({
            "new": enc_map(&self.new)?,
            "changed": enc_map(&self.changed)?,
            "gone": enc_map(&self.gone)?,
        }))
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        let mut collect = |desc: &str, rmap: &ResourceMap| {
            for (rtype, resources) in rmap {
                parts.push(format!("{} {} {}", resources.len(), desc, rtype));
            }
        };
        collect("new", &self.new);
        collect("changed", &self.changed);
        collect("gone", &self.gone);
        parts.sort();
        write!(f, "resource diff: {}", parts.join(", "))
    }
}
