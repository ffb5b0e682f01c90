//! The stencil: a deterministic interval partitioner that overlays a
//! hashring and assigns every resource to exactly one distributor.

use crate::FilterFunc;
use culvert_api::*;
use std::collections::HashMap;

/// A numerical interval `[begin, end]` owned by one distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    /// Inclusive lower bound.
    pub begin: u64,
    /// Inclusive upper bound.
    pub end: u64,
    /// The owning distributor.
    pub name: String,
}

impl Interval {
    /// True if `n` falls into `[begin, end]`.
    pub fn contains(&self, n: u64) -> bool {
        self.begin <= n && n <= self.end
    }
}

/// An ordered list of non-overlapping intervals, contiguous from zero.
///
/// The assignment of a resource to a distributor is a pure function of
/// the resource's uid, the proportions table, and the sorted distributor
/// name list. Nothing else, notably not process state or wall time, may
/// influence it: two independent backends built from the same config
/// must partition identically.
#[derive(Debug, Clone, Default)]
pub struct Stencil {
    intervals: Vec<Interval>,
}

/// Turn the distributor proportions into a stencil. Distributor names
/// are laid out in ascending order, each owning an interval as wide as
/// its weight. Zero-weight entries are skipped.
pub fn build_stencil(proportions: &HashMap<String, u32>) -> Stencil {
    let mut names: Vec<&String> = proportions.keys().collect();
    names.sort();

    let mut stencil = Stencil::default();
    let mut cursor = 0_u64;
    for name in names {
        let weight = proportions[name] as u64;
        if weight == 0 {
            continue;
        }
        stencil.intervals.push(Interval {
            begin: cursor,
            end: cursor + weight - 1,
            name: name.clone(),
        });
        cursor += weight;
    }
    stencil
}

/// A pure mix of the uid down to a bucket index. A fresh computation per
/// call: sharing a seeded generator across calls would race and break
/// reproducibility.
fn bucket(uid: Hashkey, upper_end: u64) -> u64 {
    let mut z = uid.0.wrapping_add(0x9E3779B97F4A7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^= z >> 31;
    z % (upper_end + 1)
}

impl Stencil {
    /// The maximum of all interval upper bounds. An empty stencil is an
    /// error.
    pub fn upper_end(&self) -> CvtResult<u64> {
        self.intervals
            .iter()
            .map(|i| i.end)
            .max()
            .ok_or_else(|| {
                CvtError::other("cannot determine upper end of empty stencil")
            })
    }

    /// The interval the given number falls into.
    pub fn find_by_value(&self, n: u64) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.contains(n))
    }

    /// The distributor name the given resource maps to: its pin if it
    /// has one, otherwise the owner of the bucket its uid mixes into.
    pub fn dist_for_resource(&self, r: &dyn Resource) -> Option<String> {
        if let Some(pinned) = r.distributor() {
            return Some(pinned);
        }
        let upper_end = self.upper_end().ok()?;
        match self.find_by_value(bucket(r.uid(), upper_end)) {
            Some(interval) => Some(interval.name.clone()),
            None => {
                tracing::error!(
                    uid = %r.uid(),
                    "bug: resource does not fall in any interval"
                );
                None
            }
        }
    }

    /// True if the given resource maps to the given distributor.
    pub fn does_dist_own_resource(
        &self,
        r: &dyn Resource,
        dist_name: &str,
    ) -> bool {
        self.dist_for_resource(r).as_deref() == Some(dist_name)
    }

    /// A hashring filter selecting this distributor's non-overlapping
    /// share of resources. Pinned resources bypass the interval walk.
    pub fn filter_fn(&self, dist_name: &str) -> CvtResult<FilterFunc> {
        let upper_end = self.upper_end()?;
        let intervals = self.intervals.clone();
        let dist_name = dist_name.to_string();

        Ok(Box::new(move |r: &dyn Resource| {
            if let Some(pinned) = r.distributor() {
                return pinned == dist_name;
            }
            let n = bucket(r.uid(), upper_end);
            match intervals.iter().find(|i| i.contains(n)) {
                Some(interval) => interval.name == dist_name,
                None => {
                    tracing::error!(
                        uid = %r.uid(),
                        "bug: resource does not fall in any interval"
                    );
                    false
                }
            }
        }))
    }
}

#[cfg(test)]
mod test;
