use super::*;

const FP1: &str = "0123456789ABCDEF0123456789ABCDEF01234567";
const FP2: &str = "1A2B3C4D5E6F70819293A4B5C6D7E8F901234567";

fn status_doc() -> String {
    format!(
        "r alpha {FP1} 203.0.113.5 9001\n\
         a [2001:db8::5]:9001\n\
         s Fast Running Stable Valid\n\
         r beta {FP2} 203.0.113.6 443\n\
         s Fast Valid\n"
    )
}

#[test]
fn networkstatus_keeps_only_running_relays() {
    // one of two running is exactly the 0.5 threshold, not below it
    let bridges = parse_networkstatus(&status_doc()).unwrap();

    assert_eq!(1, bridges.len());
    let alpha = &bridges[FP1];
    assert_eq!(Some("203.0.113.5".parse().unwrap()), alpha.address);
    assert_eq!(9001, alpha.port);
    assert!(alpha.flags.running && alpha.flags.fast);
    assert_eq!(2, alpha.or_addresses.len());
    assert_eq!(6, alpha.or_addresses[1].ip_version);
}

#[test]
fn networkstatus_aborts_when_most_relays_are_down() {
    // 100 relays, 40 running: the feed must be rejected wholesale
    let mut doc = String::new();
    for i in 0..100 {
        doc.push_str(&format!(
            "r node{i} {:040X} 203.0.113.{} {}\n",
            i,
            i % 250 + 1,
            9000 + i,
        ));
        if i < 40 {
            doc.push_str("s Running\n");
        } else {
            doc.push_str("s Valid\n");
        }
    }

    match parse_networkstatus(&doc) {
        Err(CvtError::NotEnoughRunning { running, total }) => {
            assert_eq!(40, running);
            assert_eq!(100, total);
        }
        other => panic!("expected NotEnoughRunning, got {other:?}"),
    }
}

#[test]
fn networkstatus_drops_malformed_records() {
    let doc = format!(
        "r broken not-hex 203.0.113.9 9001\n\
         s Running\n\
         r alpha {FP1} 203.0.113.5 9001\n\
         s Running\n"
    );
    let bridges = parse_networkstatus(&doc).unwrap();
    assert_eq!(1, bridges.len());
    assert!(bridges.contains_key(FP1));
}

#[test]
fn descriptors_accept_known_names_and_sentinels() {
    const FP3: &str = "2222222222222222222222222222222222222222";

    let known = vec![
        "https".to_string(),
        "moat".to_string(),
        "none".to_string(),
    ];
    let doc = format!(
        "fingerprint {}\n\
         bridge-distribution-request moat\n\
         fingerprint {}\n\
         bridge-distribution-request any\n\
         fingerprint {FP3}\n\
         bridge-distribution-request none\n\
         fingerprint AAAA\n\
         bridge-distribution-request carrier-pigeon\n",
        // descriptors carry fingerprints in spaced groups
        "0123 4567 89AB CDEF 0123 4567 89AB CDEF 0123 4567",
        FP2,
    );

    let requests = parse_descriptors(&doc, &known);
    assert_eq!(2, requests.len());
    assert_eq!("moat", requests[FP1]);
    // "none" is a real pin that matches no distributor downstream
    assert_eq!("none", requests[FP3]);
    // "any" means unpinned, unknown names are dropped
    assert!(!requests.contains_key(FP2));
    assert!(!requests.contains_key("AAAA"));
}

#[test]
fn extrainfo_collects_transport_blocks() {
    let doc = format!(
        "extra-info alpha {FP1}\n\
         transport obfs4 203.0.113.5:9031 cert=deadbeef,iat-mode=0\n\
         transport scramblesuit 203.0.113.5:9032 password=SECRET\n\
         -----END SIGNATURE-----\n\
         extra-info beta {FP2}\n\
         transport obfs4 [2001:db8::6]:443\n\
         -----END SIGNATURE-----\n"
    );

    let transports = parse_extrainfo(&doc).unwrap();
    assert_eq!(2, transports.len());

    let alpha = &transports[FP1];
    assert_eq!(2, alpha.len());
    assert_eq!("obfs4", alpha[0].rtype);
    assert_eq!(FP1, alpha[0].fingerprint);
    assert_eq!("deadbeef", alpha[0].params["cert"]);
    assert_eq!("0", alpha[0].params["iat-mode"]);

    let beta = &transports[FP2];
    assert_eq!(1, beta.len());
    assert_eq!(Some("2001:db8::6".parse().unwrap()), beta[0].address);
    assert_eq!(443, beta[0].port);
    assert!(beta[0].params.is_empty());
}

#[test]
fn malformed_transport_lines_are_dropped_not_fatal() {
    let doc = format!(
        "extra-info alpha {FP1}\n\
         transport obfs4 203.0.113.5:0\n\
         transport obfs4 203.0.113.5:9031 certdeadbeef\n\
         transport obfs4 nonsense\n\
         transport meek 203.0.113.5:9032\n\
         -----END SIGNATURE-----\n"
    );
    let transports = parse_extrainfo(&doc).unwrap();
    let alpha = &transports[FP1];
    assert_eq!(1, alpha.len());
    assert_eq!("meek", alpha[0].rtype);
}

#[test]
fn addr_port_forms() {
    assert_eq!(
        ("203.0.113.5".parse::<IpAddr>().unwrap(), 443),
        parse_addr_port("203.0.113.5:443").unwrap(),
    );
    assert_eq!(
        ("2001:db8::5".parse::<IpAddr>().unwrap(), 9001),
        parse_addr_port("[2001:db8::5]:9001").unwrap(),
    );
    assert!(parse_addr_port("203.0.113.5").is_err());
    assert!(parse_addr_port("203.0.113.5:0").is_err());
    assert!(parse_addr_port("example.com:443").is_err());
}

#[test]
fn allowlist_negates_blocklist() {
    let blocklist = format!("{FP1} ru,cn\n{FP2} ir\n# comment\n");
    let allowlist = format!("{FP1} cn\n{FP2} ir\n");

    let bl = BlockList::parse(&blocklist, &allowlist);

    let alpha = bl.blocked_in(FP1);
    assert!(alpha.contains("ru"));
    assert!(!alpha.contains("cn"));
    assert!(bl.blocked_in(FP2).is_empty());
    assert!(bl.blocked_in("unlisted").is_empty());
}
