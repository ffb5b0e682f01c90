//! Per-client deterministic sub-selection with rotation windows.
//!
//! Distributors that answer anonymous requests must hand the same small
//! resource set to the same requester for a while, without keeping any
//! per-client state. The trick is two-level: quantize the client address
//! to a prefix and use its hash key as a stable starting position, and
//! partition the ring into equally sized time slices so the full set
//! rotates through disjoint partitions before anything is re-shown.

use crate::SplitHashring;
use culvert_api::*;
use std::collections::HashMap;
use std::net::IpAddr;

/// The hash key of a client address, quantized to a /16 for v4 and a
/// /32 for v6 so adjacent addresses in the same network see the same
/// resources.
pub fn ip_hashkey(ip: IpAddr) -> Hashkey {
    let prefix = match ip {
        IpAddr::V4(v4) => {
            let masked = u32::from(v4) & 0xffff_0000;
            IpAddr::V4(masked.into()).to_string()
        }
        IpAddr::V6(v6) => {
            let masked = u128::from(v6) & (0xffff_ffff_u128 << 96);
            IpAddr::V6(masked.into()).to_string()
        }
    };
    Hashkey::compute(&prefix)
}

/// The rotation schedule: `num_periods` equally sized partitions, each
/// shown for `period_hours` wall-clock hours.
#[derive(Debug, Clone, Copy)]
pub struct PeriodRotation {
    /// How long one partition is shown.
    pub period_hours: u64,
    /// How many partitions the ring is split into.
    pub num_periods: u64,
}

impl PeriodRotation {
    /// The stencil proportions for the rotation ring: one equally
    /// weighted pseudo-distributor per period, named "0".."n-1".
    pub fn proportions(&self) -> HashMap<String, u32> {
        (0..self.num_periods).map(|i| (i.to_string(), 1)).collect()
    }

    /// The name of the partition shown at the given instant, or None
    /// when either knob is zero, which degenerates to no partitioning
    /// at all.
    pub fn slice_at(&self, now: Timestamp) -> Option<String> {
        if self.num_periods == 0 || self.period_hours == 0 {
            return None;
        }
        let period = now.as_hours() as u64 / self.period_hours;
        Some((period % self.num_periods).to_string())
    }

    /// Select up to `want` resources for the given client at the given
    /// instant: the current partition of the ring, entered at the
    /// client's prefix hash. If the partition holds no more than `want`
    /// resources the whole partition is returned.
    pub fn select(
        &self,
        ring: &SplitHashring,
        ip: IpAddr,
        want: usize,
        now: Timestamp,
    ) -> CvtResult<Vec<DynResource>> {
        let sub = match self.slice_at(now) {
            Some(slice) => ring.get_for_dist(&slice)?,
            None => {
                let everything: crate::FilterFunc = Box::new(|_| true);
                ring.filter(&everything)
            }
        };
        if sub.len() <= want {
            Ok(sub.get_all())
        } else {
            sub.get_many(ip_hashkey(ip), want)
        }
    }
}
