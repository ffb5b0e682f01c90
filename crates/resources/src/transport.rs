//! Pluggable-transport endpoints: an obfuscation layer on top of a
//! bridge, identified by a transport name and parameters.

use crate::bridge::{oid_suffix, tor_addr, usable_address, BRIDGE_EXPIRY};
use crate::{Flags, OrAddress, PROTO_TCP};
use culvert_api::*;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// A pluggable-transport endpoint.
///
/// Unlike a bridge, a transport's uid covers its whole canonical line.
/// Some relays run more than one transport of the same type, so a
/// type-and-fingerprint uid would make two distinct endpoints fight over
/// one ring slot and flap their oid forever.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Transport {
    /// The transport name, e.g. "obfs4". Doubles as the resource type.
    #[serde(rename = "type")]
    pub rtype: String,
    /// Transport protocol underneath the obfuscation.
    pub protocol: String,
    /// The address clients dial.
    pub address: Option<IpAddr>,
    /// The port clients dial.
    pub port: u16,
    /// The fingerprint of the relay running this transport.
    pub fingerprint: String,
    /// The relay's OR addresses.
    #[serde(rename = "or-addresses", default)]
    pub or_addresses: Vec<OrAddress>,
    /// The pinned distributor, inherited from the relay.
    #[serde(default)]
    pub distribution: Option<String>,
    /// The relay's capability flags.
    #[serde(default)]
    pub flags: Flags,
    /// Countries this endpoint is known to be blocked in.
    #[serde(rename = "blocked-in", default)]
    pub blocked_in: LocationSet,
    /// Transport parameters, e.g. obfs4 cert and iat-mode. Kept sorted
    /// so the canonical line is deterministic.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(skip)]
    state: TestState,
    #[serde(skip)]
    test_func: Option<TestFunc>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("line", &self.canonical())
            .field("distribution", &self.distribution)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Transport {
    /// A new, empty transport.
    pub fn new() -> Self {
        Self {
            rtype: String::new(),
            protocol: PROTO_TCP.to_string(),
            address: None,
            port: 0,
            fingerprint: String::new(),
            or_addresses: Vec::new(),
            distribution: None,
            flags: Flags::default(),
            blocked_in: LocationSet::new(),
            params: BTreeMap::new(),
            state: TestState::untested(),
            test_func: None,
        }
    }

    /// True if the other transport describes the same endpoint.
    pub fn same_endpoint(&self, other: &Transport) -> bool {
        self.rtype == other.rtype
            && self.address == other.address
            && self.port == other.port
            && self.fingerprint == other.fingerprint
            && self.params == other.params
    }
}

impl Resource for Transport {
    fn resource_type(&self) -> &str {
        &self.rtype
    }

    fn uid(&self) -> Hashkey {
        Hashkey::compute(&self.canonical())
    }

    fn oid(&self) -> Hashkey {
        Hashkey::compute(&format!(
            "{}|{}",
            self.canonical(),
            oid_suffix(&self.distribution, &self.or_addresses, &self.flags),
        ))
    }

    fn canonical(&self) -> String {
        let args: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!(
            "{} {}:{} {} {}",
            self.rtype,
            tor_addr(&self.address),
            self.port,
            self.fingerprint,
            args.join(" "),
        )
        .trim()
        .to_string()
    }

    fn expiry(&self) -> std::time::Duration {
        BRIDGE_EXPIRY
    }

    fn distributor(&self) -> Option<String> {
        self.distribution.clone()
    }

    fn blocked_in(&self) -> LocationSet {
        self.blocked_in.clone()
    }

    fn set_blocked_in(&mut self, locations: LocationSet) {
        self.blocked_in = locations;
    }

    fn test_state(&self) -> &TestState {
        &self.state
    }

    fn set_test_func(&mut self, f: TestFunc) {
        self.test_func = Some(f);
    }

    fn test(&self) -> BoxFut<'_, ()> {
        Box::pin(async move {
            if let Some(f) = &self.test_func {
                f(self).await;
            }
        })
    }

    fn is_valid(&self) -> bool {
        !self.rtype.is_empty()
            && self.port != 0
            && matches!(&self.address, Some(a) if usable_address(a))
    }

    fn is_public(&self) -> bool {
        false
    }

    fn encode(&self) -> CvtResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| CvtError::other_src("encoding transport", e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FP: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

    fn transport() -> Transport {
        let mut t = Transport::new();
        t.rtype = "obfs4".into();
        t.address = Some("203.0.113.5".parse().unwrap());
        t.port = 9031;
        t.fingerprint = FP.into();
        t.params.insert("iat-mode".into(), "0".into());
        t.params.insert("cert".into(), "deadbeef".into());
        t
    }

    #[test]
    fn canonical_line_sorts_params() {
        assert_eq!(
            format!("obfs4 203.0.113.5:9031 {FP} cert=deadbeef iat-mode=0"),
            transport().canonical(),
        );
    }

    #[test]
    fn canonical_line_without_params_has_no_trailing_space() {
        let mut bare = transport();
        bare.params.clear();
        assert_eq!(
            format!("obfs4 203.0.113.5:9031 {FP}"),
            bare.canonical(),
        );
    }

    #[test]
    fn two_transports_of_one_relay_get_distinct_uids() {
        let a = transport();
        let mut b = transport();
        b.address = Some("203.0.113.99".parse().unwrap());

        // same relay fingerprint and type, still two ring slots
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.uid(), b.uid());
    }

    #[test]
    fn oid_tracks_annotations_uid_does_not() {
        let plain = transport();

        let mut annotated = transport();
        annotated.distribution = Some("moat".into());
        annotated.flags.running = true;

        assert_eq!(plain.uid(), annotated.uid());
        assert_ne!(plain.oid(), annotated.oid());
    }

    #[test]
    fn same_endpoint_ignores_annotations() {
        let a = transport();
        let mut b = transport();
        b.flags.running = true;
        b.distribution = Some("moat".into());
        assert!(a.same_endpoint(&b));

        let mut c = transport();
        c.params.insert("iat-mode".into(), "1".into());
        assert!(!a.same_endpoint(&c));
    }
}
