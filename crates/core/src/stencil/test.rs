use super::*;
use crate::dummy::Dummy;
use crate::SplitHashring;

fn proportions(entries: &[(&str, u32)]) -> HashMap<String, u32> {
    entries
        .iter()
        .map(|(name, weight)| (name.to_string(), *weight))
        .collect()
}

#[test]
fn build_lays_out_sorted_contiguous_intervals() {
    let stencil = build_stencil(&proportions(&[
        ("moat", 2),
        ("https", 1),
        ("email", 3),
    ]));

    assert_eq!(5, stencil.upper_end().unwrap());
    assert_eq!("email", stencil.find_by_value(0).unwrap().name);
    assert_eq!("email", stencil.find_by_value(2).unwrap().name);
    assert_eq!("https", stencil.find_by_value(3).unwrap().name);
    assert_eq!("moat", stencil.find_by_value(4).unwrap().name);
    assert_eq!("moat", stencil.find_by_value(5).unwrap().name);
    assert!(stencil.find_by_value(6).is_none());
}

#[test]
fn empty_stencil_has_no_upper_end() {
    assert!(build_stencil(&HashMap::new()).upper_end().is_err());
    assert!(build_stencil(&proportions(&[("moat", 0)]))
        .upper_end()
        .is_err());
}

#[test]
fn every_resource_has_exactly_one_owner() {
    let dists = ["email", "https", "moat"];
    let stencil =
        build_stencil(&proportions(&[("https", 1), ("moat", 1), ("email", 1)]));

    for uid in 0..200_u64 {
        let r = Dummy::new(Hashkey(uid), Hashkey(uid)).build();
        let owners: Vec<&str> = dists
            .iter()
            .filter(|d| stencil.does_dist_own_resource(&*r, d))
            .copied()
            .collect();
        assert_eq!(1, owners.len(), "uid {uid} owned by {owners:?}");
    }
}

#[test]
fn assignment_is_deterministic_and_matches_the_bucket_walk() {
    // Partitioning scenario: three equal distributors, 15 unpinned
    // resources. Each distributor's slice must be exactly the set of
    // resources whose uid mixes into its interval.
    let prop = proportions(&[("https", 1), ("moat", 1), ("email", 1)]);
    let stencil = build_stencil(&prop);
    let upper_end = stencil.upper_end().unwrap();

    let ring = SplitHashring::partitioned(build_stencil(&prop));
    let uids: Vec<u64> = (101..=115).collect();
    for uid in &uids {
        ring.add(Dummy::new(Hashkey(*uid), Hashkey(*uid)).build())
            .unwrap();
    }

    for dist in ["email", "https", "moat"] {
        let expected: Vec<u64> = uids
            .iter()
            .filter(|uid| {
                stencil
                    .find_by_value(bucket(Hashkey(**uid), upper_end))
                    .unwrap()
                    .name
                    == dist
            })
            .copied()
            .collect();

        let mut got: Vec<u64> = ring
            .get_for_dist(dist)
            .unwrap()
            .get_all()
            .iter()
            .map(|r| r.uid().0)
            .collect();
        got.sort();

        assert_eq!(expected, got, "slice mismatch for {dist}");
    }

    // a second, independently built stencil partitions identically
    let again = build_stencil(&prop);
    for uid in &uids {
        let r = Dummy::new(Hashkey(*uid), Hashkey(*uid)).build();
        assert_eq!(
            stencil.dist_for_resource(&*r),
            again.dist_for_resource(&*r),
        );
    }
}

#[test]
fn pinned_resource_bypasses_the_stencil() {
    let prop = proportions(&[("https", 1), ("moat", 1)]);
    let stencil = build_stencil(&prop);

    // find a uid the stencil would hand to https, then pin it to moat
    let uid = (0..500_u64)
        .find(|uid| {
            let r = Dummy::new(Hashkey(*uid), Hashkey(*uid)).build();
            stencil.does_dist_own_resource(&*r, "https")
        })
        .expect("no https-owned uid in range");

    let mut pinned = Dummy::new(Hashkey(uid), Hashkey(uid));
    pinned.distribution = Some("moat".into());

    let ring = SplitHashring::partitioned(build_stencil(&prop));
    ring.add(pinned.build()).unwrap();

    assert_eq!(1, ring.get_for_dist("moat").unwrap().len());
    assert_eq!(0, ring.get_for_dist("https").unwrap().len());
}

#[test]
fn pin_to_unknown_name_matches_nobody() {
    // "none" is a valid pin that no configured distributor carries;
    // such resources are held but never handed out
    let prop = proportions(&[("https", 1), ("moat", 1)]);
    let ring = SplitHashring::partitioned(build_stencil(&prop));

    let mut never = Dummy::new(Hashkey(7), Hashkey(7));
    never.distribution = Some("none".into());
    ring.add(never.build()).unwrap();

    assert_eq!(0, ring.get_for_dist("https").unwrap().len());
    assert_eq!(0, ring.get_for_dist("moat").unwrap().len());
    assert_eq!(1, ring.len());
}

#[test]
fn unpartitioned_ring_is_shared_by_all() {
    let ring = SplitHashring::unpartitioned();
    ring.add(Dummy::new(Hashkey(1), Hashkey(1)).build()).unwrap();

    assert!(ring.does_dist_own_resource(
        &*Dummy::new(Hashkey(1), Hashkey(1)).build(),
        "anyone",
    ));
    assert_eq!(1, ring.get_for_dist("anyone").unwrap().len());
    assert_eq!(1, ring.get_for_dist("someone-else").unwrap().len());
}
