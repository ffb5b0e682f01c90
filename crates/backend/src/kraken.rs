//! The ingestion loop. Periodically re-parses the descriptor feeds,
//! assembles resources, feeds them to the backend collection, prunes
//! expired entries and recomputes the health aggregates.

use crate::metrics;
use crate::parse;
use crate::Config;
use culvert_api::*;
use culvert_core::BackendResources;
use std::sync::Arc;

/// Distribute only functional resources while at least this mean
/// fraction of resources is functional. Below it everything is handed
/// out: right after a restart, or during a prober outage, almost
/// nothing is tested yet and serving nothing would starve clients.
pub const MIN_FUNCTIONAL_FRACTION: f64 = 0.5;

/// Run the ingestion loop until the shutdown signal fires. The first
/// cycle runs immediately; afterwards one cycle per configured tick.
pub async fn run(
    config: Arc<Config>,
    resources: Arc<BackendResources>,
    test_func: TestFunc,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tracing::info!("initialising resource kraken");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        config.backend.update_interval_s,
    ));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let config = config.clone();
                let resources = resources.clone();
                let test_func = test_func.clone();
                // feeds are parsed from disk; keep that off the runtime
                let cycle = tokio::task::spawn_blocking(move || {
                    run_cycle(&config, &resources, &test_func);
                    tracing::info!(
                        collection = %resources.collection(),
                        "backend resources"
                    );
                });
                if let Err(err) = cycle.await {
                    tracing::error!(?err, "ingestion cycle panicked");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("kraken shut down");
                return;
            }
        }
    }
}

/// One full ingestion cycle.
pub fn run_cycle(
    config: &Config,
    resources: &BackendResources,
    test_func: &TestFunc,
) {
    reload_bridge_descriptors(config, resources, test_func);
    prune_expired_resources(resources);
    calc_tested_resources(resources);
    update_assignments(config, resources);
}

/// Steps 1-5: parse the feeds, assemble annotated resources, submit.
fn reload_bridge_descriptors(
    config: &Config,
    resources: &BackendResources,
    test_func: &TestFunc,
) {
    let b = &config.backend;

    let mut bridges = match std::fs::read_to_string(&b.networkstatus_file)
        .map_err(|e| CvtError::other_src("reading networkstatus", e))
        .and_then(|input| parse::parse_networkstatus(&input))
    {
        Ok(bridges) => bridges,
        Err(err @ CvtError::NotEnoughRunning { .. }) => {
            tracing::warn!(%err, "ignoring bridge descriptors");
            metrics::set_ignoring_descriptors(true);
            return;
        }
        Err(err) => {
            tracing::warn!(%err, "error loading network statuses");
            return;
        }
    };
    metrics::set_ignoring_descriptors(false);

    match std::fs::read_to_string(&b.descriptors_file) {
        Ok(input) => {
            let requests =
                parse::parse_descriptors(&input, &config.known_distributors());
            for (fingerprint, request) in requests {
                if let Some(bridge) = bridges.get_mut(&fingerprint) {
                    bridge.distribution = Some(request);
                }
            }
        }
        Err(err) => {
            tracing::warn!(?err, "error loading bridge descriptors file")
        }
    }

    let rotated = std::path::PathBuf::from(format!(
        "{}.new",
        b.extrainfo_file.display()
    ));
    for file in [&b.extrainfo_file, &rotated] {
        let input = match std::fs::read_to_string(file) {
            Ok(input) => input,
            Err(err) => {
                tracing::warn!(?err, ?file, "failed to read extrainfo");
                continue;
            }
        };
        match parse::parse_extrainfo(&input) {
            Ok(descriptors) => {
                for (fingerprint, transports) in descriptors {
                    match bridges.get_mut(&fingerprint) {
                        Some(bridge) => bridge.transports = transports,
                        None => tracing::debug!(
                            %fingerprint,
                            "extrainfo for unknown bridge"
                        ),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, ?file, "failed to parse extrainfo")
            }
        }
    }

    let blocklist = load_blocklist(config);

    tracing::info!(count = bridges.len(), "adding bridges");
    for (_, mut bridge) in bridges {
        let blocked_in = blocklist.blocked_in(&bridge.fingerprint);

        let transports = std::mem::take(&mut bridge.transports);
        let has_transports = !transports.is_empty();
        for mut transport in transports {
            // transports inherit the relay-level annotations
            transport.flags = bridge.flags;
            transport.distribution = bridge.distribution.clone();
            transport.set_blocked_in(blocked_in.clone());
            transport.set_test_func(test_func.clone());
            if !transport.is_valid() {
                tracing::info!(
                    fingerprint = %transport.fingerprint,
                    rtype = %transport.rtype,
                    "rejecting transport with unusable address"
                );
                continue;
            }
            resources.add(Arc::new(transport));
        }

        // only hand out the vanilla flavour if there are no transports
        if !has_transports {
            if !bridge.is_valid() {
                tracing::info!(
                    fingerprint = %bridge.fingerprint,
                    "rejecting vanilla bridge with unusable address"
                );
                continue;
            }
            bridge.set_blocked_in(blocked_in);
            bridge.set_test_func(test_func.clone());
            resources.add(Arc::new(bridge));
        }
    }
}

fn load_blocklist(config: &Config) -> parse::BlockList {
    let read = |path: &Option<std::path::PathBuf>| -> String {
        let Some(path) = path else {
            return String::new();
        };
        match std::fs::read_to_string(path) {
            Ok(input) => input,
            Err(err) => {
                tracing::warn!(?err, ?path, "problem loading block list");
                String::new()
            }
        }
    };
    parse::BlockList::parse(
        &read(&config.backend.blocklist_file),
        &read(&config.backend.allowlist_file),
    )
}

/// Step 6: drop expired resources, emitting gone events.
fn prune_expired_resources(resources: &BackendResources) {
    resources.prune();
    for rtype in resources.collection().types() {
        let ring = resources.collection().ring(rtype).expect("typed ring");
        metrics::set_resource_count(rtype, ring.len());
    }
}

/// Step 7: per-type health fractions and the only-functional gate.
pub fn calc_tested_resources(resources: &BackendResources) {
    let mut functional_acc = 0.0;
    let mut types = 0_usize;

    for rtype in resources.collection().types() {
        types += 1;
        let all = resources
            .collection()
            .ring(rtype)
            .expect("typed ring")
            .get_all();

        let mut counts = [0_usize; 3];
        for r in &all {
            let i = match r.test_result().status {
                ResourceStatus::Untested => 0,
                ResourceStatus::Functional => 1,
                ResourceStatus::Dysfunctional => 2,
            };
            counts[i] += 1;
        }

        for (i, status) in
            ["untested", "functional", "dysfunctional"].iter().enumerate()
        {
            let frac = if all.is_empty() {
                0.0
            } else {
                counts[i] as f64 / all.len() as f64
            };
            metrics::set_tested_fraction(rtype, status, frac);
            if i == 1 {
                functional_acc += frac;
            }
        }
    }

    let functional_fraction = if types == 0 {
        0.0
    } else {
        functional_acc / types as f64
    };
    let only_functional = functional_fraction >= MIN_FUNCTIONAL_FRACTION;
    resources.set_only_functional(only_functional);
    metrics::set_distributing_non_functional(!only_functional);
}

/// Append this cycle's distributor assignments and refresh the
/// per-distributor gauges.
fn update_assignments(config: &Config, resources: &BackendResources) {
    use std::io::Write;

    let b = &config.backend;
    let mut file = b.assignments_file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
        {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(?err, ?path, "cannot open assignments file");
                None
            }
        }
    });

    if let Some(file) = file.as_mut() {
        let _ = writeln!(
            file,
            "bridge-pool-assignment {}",
            Timestamp::now().as_micros(),
        );
    }

    for dist in b.distribution_proportions.keys() {
        for rtype in b.resources.keys() {
            let rs = resources.get(dist, rtype);
            if let Some(file) = file.as_mut() {
                for r in &rs {
                    let blocked: Vec<String> =
                        r.blocked_in().into_iter().collect();
                    let _ = writeln!(
                        file,
                        "{} {} type={} blocked={}",
                        r.canonical(),
                        dist,
                        rtype,
                        blocked.join(","),
                    );
                }
            }
            metrics::set_distributor_resources(dist, rtype, rs.len());
        }
    }
}

#[cfg(test)]
mod test;
