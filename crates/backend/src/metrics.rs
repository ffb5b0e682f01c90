//! Prometheus metrics.
//!
//! Metrics tracked:
//! - `culvert_backend_resources` - gauge of resources by type
//! - `culvert_backend_tested_resources` - gauge of the per-type fraction
//!   of resources in each probe state
//! - `culvert_backend_distributor_resources` - gauge of resources per
//!   distributor and type
//! - `culvert_backend_distributing_non_functional` - whether the
//!   only-functional gate is down
//! - `culvert_backend_ignoring_descriptors` - whether the descriptor
//!   feed is being ignored because most relays look dead
//! - `culvert_backend_requests_total` - counter of api requests

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register all metric
/// descriptions. The returned handle renders the scrape body.
pub fn init_metrics() -> culvert_api::CvtResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| culvert_api::CvtError::other_src("metrics init", e))?;

    describe_gauge!(
        "culvert_backend_resources",
        "The number of resources we have"
    );
    describe_gauge!(
        "culvert_backend_tested_resources",
        "The fraction of resources currently in each probe state"
    );
    describe_gauge!(
        "culvert_backend_distributor_resources",
        "The number of resources we have per distributor"
    );
    describe_gauge!(
        "culvert_backend_distributing_non_functional",
        "Whether non-functional resources are being distributed"
    );
    describe_gauge!(
        "culvert_backend_ignoring_descriptors",
        "Whether the descriptor feed is ignored due to a high ratio of \
         non-running relays"
    );
    describe_counter!(
        "culvert_backend_requests_total",
        "The number of api requests"
    );

    Ok(handle)
}

/// Update the per-type resource count gauge.
pub fn set_resource_count(rtype: &str, count: usize) {
    gauge!("culvert_backend_resources", "type" => rtype.to_string())
        .set(count as f64);
}

/// Update the per-type, per-state tested fraction gauge.
pub fn set_tested_fraction(rtype: &str, status: &str, fraction: f64) {
    gauge!(
        "culvert_backend_tested_resources",
        "type" => rtype.to_string(),
        "status" => status.to_string(),
    )
    .set(fraction);
}

/// Update the per-distributor resource count gauge.
pub fn set_distributor_resources(dist: &str, rtype: &str, count: usize) {
    gauge!(
        "culvert_backend_distributor_resources",
        "distributor" => dist.to_string(),
        "type" => rtype.to_string(),
    )
    .set(count as f64);
}

/// Record whether the only-functional gate is down.
pub fn set_distributing_non_functional(distributing: bool) {
    gauge!("culvert_backend_distributing_non_functional")
        .set(if distributing { 1.0 } else { 0.0 });
}

/// Record whether the descriptor feed is being ignored.
pub fn set_ignoring_descriptors(ignoring: bool) {
    gauge!("culvert_backend_ignoring_descriptors")
        .set(if ignoring { 1.0 } else { 0.0 });
}

/// Count one api request against the given target.
pub fn count_request(target: &str) {
    counter!(
        "culvert_backend_requests_total",
        "target" => target.to_string(),
    )
    .increment(1);
}
