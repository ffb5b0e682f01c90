//! Vanilla bridges: relays that are not publicly listed.

use crate::RESOURCE_TYPE_VANILLA;
use culvert_api::*;
use sha1::{Digest, Sha1};
use std::net::IpAddr;

/// Bridges should upload new descriptors at least every 18 hours, so an
/// incarnation that has not been refreshed for longer than that is gone.
pub const BRIDGE_EXPIRY: std::time::Duration =
    std::time::Duration::from_secs(18 * 60 * 60);

/// The protocol vanilla bridges and all current pluggable transports
/// run on.
pub const PROTO_TCP: &str = "tcp";

/// The capability flags a relay advertises in the network status.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Flags {
    /// The relay is fast.
    #[serde(default)]
    pub fast: bool,
    /// The relay is stable.
    #[serde(default)]
    pub stable: bool,
    /// The relay was reachable at the last authority scan.
    #[serde(default)]
    pub running: bool,
    /// The relay is valid.
    #[serde(default)]
    pub valid: bool,
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.fast as u8, self.stable as u8, self.running as u8,
            self.valid as u8,
        )
    }
}

/// One onion-routing address of a relay.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
pub struct OrAddress {
    /// 4 or 6.
    #[serde(rename = "ip-version")]
    pub ip_version: u8,
    /// The address.
    pub address: IpAddr,
    /// The OR port.
    pub port: u16,
}

/// A vanilla bridge.
///
/// `uid` hashes the type tag and the sha1-hashed fingerprint, so the uid
/// survives address churn while never exposing the raw fingerprint
/// through the ring position. `oid` additionally covers the bridge line,
/// the distributor pin, the OR addresses and the flags: anything a
/// subscriber can observe.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct Bridge {
    /// The type tag, always "vanilla".
    #[serde(rename = "type")]
    pub rtype: String,
    /// Transport protocol, always tcp for vanilla Tor.
    pub protocol: String,
    /// The address clients dial.
    pub address: Option<IpAddr>,
    /// The port clients dial.
    pub port: u16,
    /// The upper-case hex relay fingerprint.
    pub fingerprint: String,
    /// All advertised OR addresses.
    #[serde(rename = "or-addresses", default)]
    pub or_addresses: Vec<OrAddress>,
    /// The pinned distributor, if the operator requested one.
    #[serde(default)]
    pub distribution: Option<String>,
    /// The advertised capability flags.
    #[serde(default)]
    pub flags: Flags,
    /// Countries this bridge is known to be blocked in.
    #[serde(rename = "blocked-in", default)]
    pub blocked_in: LocationSet,
    /// The bridge's pluggable transports. Distributed as resources of
    /// their own, so never serialized with the bridge.
    #[serde(skip)]
    pub transports: Vec<crate::Transport>,
    #[serde(skip)]
    state: TestState,
    #[serde(skip)]
    test_func: Option<TestFunc>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("line", &self.bridge_line())
            .field("distribution", &self.distribution)
            .field("flags", &self.flags)
            .field("transports", &self.transports.len())
            .finish()
    }
}

impl Bridge {
    /// A new, empty vanilla bridge.
    pub fn new() -> Self {
        Self {
            rtype: RESOURCE_TYPE_VANILLA.to_string(),
            protocol: PROTO_TCP.to_string(),
            address: None,
            port: 0,
            fingerprint: String::new(),
            or_addresses: Vec::new(),
            distribution: None,
            flags: Flags::default(),
            blocked_in: LocationSet::new(),
            transports: Vec::new(),
            state: TestState::untested(),
            test_func: None,
        }
    }

    /// Add a transport unless an identical one is already on record.
    pub fn add_transport(&mut self, transport: crate::Transport) {
        if !self.transports.iter().any(|t| t.same_endpoint(&transport)) {
            self.transports.push(transport);
        }
    }

    /// The bridge line clients put into their configuration.
    pub fn bridge_line(&self) -> String {
        format!(
            "{}:{} {}",
            tor_addr(&self.address),
            self.port,
            self.fingerprint
        )
        .trim()
        .to_string()
    }
}

impl Resource for Bridge {
    fn resource_type(&self) -> &str {
        &self.rtype
    }

    fn uid(&self) -> Hashkey {
        bridge_uid(&self.rtype, &self.fingerprint)
    }

    fn oid(&self) -> Hashkey {
        Hashkey::compute(&format!(
            "{}|{}",
            self.bridge_line(),
            oid_suffix(&self.distribution, &self.or_addresses, &self.flags),
        ))
    }

    fn canonical(&self) -> String {
        self.bridge_line()
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
            // a bridge with transports is reached through them, so they
            // are what gets probed; only a bare bridge is probed itself
            for t in &self.transports {
                t.test().await;
            }
            if self.transports.is_empty() {
                if let Some(f) = &self.test_func {
                    f(self).await;
                }
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
            .map_err(|e| CvtError::other_src("encoding bridge", e))
    }
}

/// A bridge's uid: the type tag concatenated with the hashed
/// fingerprint, run through the ring hash.
pub(crate) fn bridge_uid(rtype: &str, fingerprint: &str) -> Hashkey {
    let hashed = match hash_fingerprint(fingerprint) {
        Ok(hashed) => hashed,
        Err(err) => {
            tracing::error!(?err, fingerprint, "bug: unhashable fingerprint");
            fingerprint.to_string()
        }
    };
    Hashkey::compute(&format!("{rtype}{hashed}"))
}

/// Hash a relay fingerprint the way relay search does: sha1 over the
/// decoded fingerprint bytes, re-encoded as upper-case hex.
pub fn hash_fingerprint(fingerprint: &str) -> CvtResult<String> {
    let raw = hex::decode(fingerprint.trim())
        .map_err(|e| CvtError::other_src("decoding fingerprint", e))?;
    let hashed = Sha1::digest(&raw);
    Ok(hex::encode_upper(hashed))
}

/// The shared oid ingredient list of bridges and transports: everything
/// observable besides the canonical line itself.
pub(crate) fn oid_suffix(
    distribution: &Option<String>,
    or_addresses: &[OrAddress],
    flags: &Flags,
) -> String {
    let ors: Vec<String> = or_addresses
        .iter()
        .map(|o| format!("{}:{}:{}", o.ip_version, o.address, o.port))
        .collect();
    format!(
        "{}|{}|{}",
        distribution.as_deref().unwrap_or(""),
        ors.join(","),
        flags,
    )
}

/// Format an address the way Tor expects it in a bridge line: IPv6
/// enclosed in square brackets.
pub(crate) fn tor_addr(addr: &Option<IpAddr>) -> String {
    match addr {
        None => String::new(),
        Some(IpAddr::V4(v4)) => v4.to_string(),
        Some(IpAddr::V6(v6)) => format!("[{v6}]"),
    }
}

/// Only addresses a censored client can plausibly dial are usable.
pub(crate) fn usable_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_private()
                || v4.is_loopback()
                || v4.is_multicast()
                || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            let seg0 = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                // unique local fc00::/7
                || (seg0 & 0xfe00) == 0xfc00
                // link local fe80::/10
                || (seg0 & 0xffc0) == 0xfe80)
        }
    }
}
