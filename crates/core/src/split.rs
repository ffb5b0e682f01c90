//! A hashring composed with an optional stencil.

use crate::{Hashring, Stencil};
use culvert_api::*;

/// A hashring with a corresponding stencil. The backend uses one
/// SplitHashring per resource type to map resources to distributors.
/// Without a stencil it behaves as a plain, unpartitioned hashring:
/// every distributor owns every resource. Browser-download links are
/// served that way.
#[derive(Debug, Default)]
pub struct SplitHashring {
    ring: Hashring,
    stencil: Option<Stencil>,
}

impl SplitHashring {
    /// A split hashring whose resources all distributors share.
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    /// A split hashring partitioned by the given stencil.
    pub fn partitioned(stencil: Stencil) -> Self {
        Self {
            ring: Hashring::new(),
            stencil: Some(stencil),
        }
    }

    /// The resources allocated to the given distributor, as a fresh
    /// hashring. Callers must not assume any identity with the parent
    /// ring; mutations on the returned ring are not seen by the parent.
    pub fn get_for_dist(&self, dist_name: &str) -> CvtResult<Hashring> {
        match &self.stencil {
            None => {
                let everything: crate::FilterFunc = Box::new(|_| true);
                Ok(self.ring.filter(&everything))
            }
            Some(stencil) => {
                Ok(self.ring.filter(&stencil.filter_fn(dist_name)?))
            }
        }
    }

    /// True if the given resource maps to the given distributor. The
    /// fast path for event propagation, which must not filter the whole
    /// ring per event.
    pub fn does_dist_own_resource(
        &self,
        r: &dyn Resource,
        dist_name: &str,
    ) -> bool {
        match &self.stencil {
            None => true,
            Some(stencil) => stencil.does_dist_own_resource(r, dist_name),
        }
    }

    /// Whether this ring is partitioned by a stencil at all.
    pub fn is_partitioned(&self) -> bool {
        self.stencil.is_some()
    }
}

impl std::ops::Deref for SplitHashring {
    type Target = Hashring;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}
