use super::*;
use crate::probe;
use std::path::Path;

const FP_ALPHA: &str = "0123456789ABCDEF0123456789ABCDEF01234567";
const FP_BETA: &str = "1A2B3C4D5E6F70819293A4B5C6D7E8F901234567";
const FP_GAMMA: &str = "2222222222222222222222222222222222222222";

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// alpha runs an obfs4 transport, beta is a pinned vanilla bridge,
/// gamma advertises a private address, delta is not running.
fn write_feeds(config: &Config) {
    let b = &config.backend;
    write(
        &b.networkstatus_file,
        &format!(
            "r alpha {FP_ALPHA} 203.0.113.5 9001\n\
             s Fast Running Stable Valid\n\
             r beta {FP_BETA} 203.0.113.6 443\n\
             s Running Valid\n\
             r gamma {FP_GAMMA} 10.0.0.1 9001\n\
             s Running\n\
             r delta 3333333333333333333333333333333333333333 203.0.113.8 9001\n\
             s Valid\n"
        ),
    );
    write(
        &b.descriptors_file,
        &format!(
            "fingerprint {FP_BETA}\n\
             bridge-distribution-request moat\n\
             fingerprint {FP_ALPHA}\n\
             bridge-distribution-request any\n"
        ),
    );
    write(
        &b.extrainfo_file,
        &format!(
            "extra-info alpha {FP_ALPHA}\n\
             transport obfs4 203.0.113.5:9031 cert=deadbeef,iat-mode=0\n\
             -----END SIGNATURE-----\n"
        ),
    );
    write(
        &std::path::PathBuf::from(format!(
            "{}.new",
            b.extrainfo_file.display()
        )),
        "",
    );
}

fn testing_setup(
    dir: &Path,
) -> (Config, std::sync::Arc<culvert_core::BackendResources>) {
    let mut config = Config::testing(dir);
    config.backend.blocklist_file = Some(dir.join("blocklist"));
    write(&dir.join("blocklist"), &format!("{FP_ALPHA} ru,cn\n"));
    write_feeds(&config);
    let resources = std::sync::Arc::new(
        culvert_core::BackendResources::new(config.build_collection()),
    );
    (config, resources)
}

#[test]
fn cycle_assembles_annotated_resources() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resources) = testing_setup(dir.path());

    run_cycle(&config, &resources, &probe::test_func(None));

    // alpha's transport, annotated with the relay's flags and blocklist
    let obfs4 = resources.collection().ring("obfs4").unwrap();
    assert_eq!(1, obfs4.len());
    let transport = &obfs4.get_all()[0];
    assert!(transport.canonical().contains("203.0.113.5:9031"));
    assert!(transport.blocked_in().contains("ru"));
    assert!(transport.blocked_in().contains("cn"));
    assert_eq!(None, transport.distributor());

    // alpha has a transport, so no vanilla flavour; beta is vanilla and
    // pinned; gamma's address is unusable
    let vanilla = resources.collection().ring("vanilla").unwrap();
    assert_eq!(1, vanilla.len());
    let bridge = &vanilla.get_all()[0];
    assert!(bridge.canonical().starts_with("203.0.113.6:443"));
    assert_eq!(Some("moat".to_string()), bridge.distributor());
}

#[test]
fn repeated_cycles_do_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resources) = testing_setup(dir.path());
    let test_func = probe::test_func(None);

    run_cycle(&config, &resources, &test_func);
    run_cycle(&config, &resources, &test_func);

    assert_eq!(1, resources.collection().ring("obfs4").unwrap().len());
    assert_eq!(1, resources.collection().ring("vanilla").unwrap().len());
}

#[test]
fn mostly_dead_feed_is_ignored_wholesale() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resources) = testing_setup(dir.path());
    let test_func = probe::test_func(None);

    run_cycle(&config, &resources, &test_func);
    let obfs4_before = resources.collection().ring("obfs4").unwrap().len();
    let vanilla_before =
        resources.collection().ring("vanilla").unwrap().len();

    // a feed where only one relay of three is running must not touch
    // the rings, not even to remove beta
    write(
        &config.backend.networkstatus_file,
        &format!(
            "r alpha {FP_ALPHA} 203.0.113.5 9001\n\
             s Running\n\
             r beta {FP_BETA} 203.0.113.6 443\n\
             s Valid\n\
             r gamma {FP_GAMMA} 203.0.113.7 9001\n\
             s Valid\n"
        ),
    );
    run_cycle(&config, &resources, &test_func);

    assert_eq!(
        obfs4_before,
        resources.collection().ring("obfs4").unwrap().len(),
    );
    assert_eq!(
        vanilla_before,
        resources.collection().ring("vanilla").unwrap().len(),
    );
}

#[test]
fn functional_gate_follows_the_mean_fraction() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resources) = testing_setup(dir.path());

    run_cycle(&config, &resources, &probe::test_func(None));
    // nothing is tested yet, so everything must keep flowing
    assert!(!resources.only_functional());

    // mark everything functional and recompute
    for rtype in ["vanilla", "obfs4"] {
        for r in resources.collection().ring(rtype).unwrap().get_all() {
            r.test_state()
                .record(culvert_api::ResourceStatus::Functional, None);
        }
    }
    calc_tested_resources(&resources);
    assert!(resources.only_functional());
}

#[test]
fn assignments_log_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let (config, resources) = testing_setup(dir.path());

    run_cycle(&config, &resources, &probe::test_func(None));

    let log = std::fs::read_to_string(
        config.backend.assignments_file.as_ref().unwrap(),
    )
    .unwrap();
    assert!(log.contains("bridge-pool-assignment"));
    // beta is pinned to moat and must be logged there
    assert!(log
        .lines()
        .any(|l| l.starts_with("203.0.113.6:443") && l.contains(" moat ")));
}
