//! Parsers for the line-oriented descriptor feeds the backend ingests.
//!
//! Per-record problems are logged and the record dropped; the cycle goes
//! on. Only the feed-wide running-fraction check aborts a whole cycle,
//! because a feed where most relays look dead is a feed produced by a
//! freshly restarted authority, not a network where most relays died.

use culvert_api::*;
use culvert_resources::{Bridge, OrAddress, Transport};
use std::collections::HashMap;
use std::net::IpAddr;

/// Abort the cycle when fewer than this fraction of relays in the
/// network status carry the Running flag.
pub const MIN_RUNNING_FRACTION: f64 = 0.5;

const TRANSPORT_PREFIX: &str = "transport";
const EXTRA_INFO_PREFIX: &str = "extra-info";
const RECORD_END_PREFIX: &str = "-----END SIGNATURE-----";
const DIST_REQUEST_PREFIX: &str = "bridge-distribution-request";
const MIN_TRANSPORT_WORDS: usize = 3;

/// Parse a network-status document into fingerprint-to-bridge. Records
/// lacking the Running flag are dropped; if the dropped fraction gets
/// out of hand the whole feed is rejected with
/// [CvtError::NotEnoughRunning].
pub fn parse_networkstatus(
    input: &str,
) -> CvtResult<HashMap<String, Bridge>> {
    let mut bridges = HashMap::new();
    let mut current: Option<Bridge> = None;
    let mut total = 0_usize;
    let mut running = 0_usize;

    let mut finish =
        |bridge: Option<Bridge>, total: &mut usize, running: &mut usize| {
            let Some(bridge) = bridge else { return };
            *total += 1;
            if bridge.flags.running {
                *running += 1;
                bridges.insert(bridge.fingerprint.clone(), bridge);
            } else {
                tracing::debug!(
                    fingerprint = %bridge.fingerprint,
                    "relay in networkstatus but not running"
                );
            }
        };

    for line in input.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("r ") {
            finish(current.take(), &mut total, &mut running);
            match parse_status_entry(rest) {
                Ok(bridge) => current = Some(bridge),
                Err(err) => {
                    tracing::warn!(?err, line, "dropping status record")
                }
            }
        } else if let Some(rest) = line.strip_prefix("a ") {
            if let Some(bridge) = current.as_mut() {
                match parse_addr_port(rest.trim()) {
                    Ok((address, port)) => {
                        bridge.or_addresses.push(OrAddress {
                            ip_version: if address.is_ipv6() { 6 } else { 4 },
                            address,
                            port,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(?err, line, "dropping or-address")
                    }
                }
            }
        } else if let Some(rest) = line.strip_prefix("s ") {
            if let Some(bridge) = current.as_mut() {
                for flag in rest.split_whitespace() {
                    match flag {
                        "Fast" => bridge.flags.fast = true,
                        "Stable" => bridge.flags.stable = true,
                        "Running" => bridge.flags.running = true,
                        "Valid" => bridge.flags.valid = true,
                        _ => {}
                    }
                }
            }
        }
    }
    finish(current.take(), &mut total, &mut running);

    if total > 0 && (running as f64) / (total as f64) < MIN_RUNNING_FRACTION
    {
        // a just-restarted authority marks almost everything not
        // running; taking that at face value would empty the rings
        return Err(CvtError::NotEnoughRunning { running, total });
    }
    Ok(bridges)
}

/// One `r` record: `<nick> <fingerprint> <address> <or-port>`.
fn parse_status_entry(rest: &str) -> CvtResult<Bridge> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    if words.len() < 4 {
        return Err(CvtError::parse("too few fields in status entry"));
    }

    let mut bridge = Bridge::new();
    bridge.fingerprint = words[1].to_string();
    if bridge.fingerprint.is_empty()
        || hex::decode(&bridge.fingerprint).is_err()
    {
        return Err(CvtError::parse(format!(
            "bad fingerprint {:?}",
            words[1]
        )));
    }
    let address: IpAddr = words[2]
        .parse()
        .map_err(|e| CvtError::other_src("bad status address", e))?;
    let port: u16 = words[3]
        .parse()
        .map_err(|e| CvtError::other_src("bad status port", e))?;
    bridge.address = Some(address);
    bridge.port = port;
    bridge.or_addresses.push(OrAddress {
        ip_version: if address.is_ipv6() { 6 } else { 4 },
        address,
        port,
    });
    Ok(bridge)
}

/// Parse the descriptors document for bridge-distribution-request
/// values, returning fingerprint-to-request. Only configured
/// distributor names and the sentinels "any" and "none" are accepted.
pub fn parse_descriptors(
    input: &str,
    known_distributors: &[String],
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut fingerprint: Option<String> = None;

    for line in input.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("fingerprint ") {
            fingerprint = Some(rest.split_whitespace().collect::<String>());
        } else if let Some(rest) = line.strip_prefix(DIST_REQUEST_PREFIX) {
            let request = rest.trim();
            let Some(fp) = fingerprint.clone() else {
                tracing::warn!(line, "distribution request before fingerprint");
                continue;
            };
            if request == "any" {
                continue;
            }
            if known_distributors.iter().any(|d| d == request) {
                out.insert(fp, request.to_string());
            } else {
                tracing::warn!(
                    fingerprint = %fp,
                    request,
                    "unsupported distribution request"
                );
            }
        }
    }
    out
}

/// Parse an extra-info document into fingerprint-to-transports. Blocks
/// start with an `extra-info` line and end with the signature trailer.
pub fn parse_extrainfo(
    input: &str,
) -> CvtResult<HashMap<String, Vec<Transport>>> {
    let mut out: HashMap<String, Vec<Transport>> = HashMap::new();
    let mut fingerprint = String::new();
    let mut transports: Vec<Transport> = Vec::new();

    for line in input.lines() {
        let line = line.trim();

        if line.starts_with(EXTRA_INFO_PREFIX) {
            let words: Vec<&str> = line.split(' ').collect();
            if words.len() != 3 {
                return Err(CvtError::parse(
                    "incorrect number of words in extra-info line",
                ));
            }
            fingerprint = words[2].to_string();
            transports.clear();
        }

        if line.starts_with(TRANSPORT_PREFIX) {
            match parse_transport_line(line) {
                Ok(mut transport) => {
                    transport.fingerprint = fingerprint.clone();
                    if !transports
                        .iter()
                        .any(|t| t.same_endpoint(&transport))
                    {
                        transports.push(transport);
                    }
                }
                Err(err) => {
                    tracing::warn!(?err, line, "dropping transport line")
                }
            }
        }

        if line.starts_with(RECORD_END_PREFIX) && !fingerprint.is_empty() {
            out.insert(
                std::mem::take(&mut fingerprint),
                std::mem::take(&mut transports),
            );
        }
    }
    Ok(out)
}

/// One transport line: `transport <name> <host>:<port> [k=v,k=v,…]`.
pub fn parse_transport_line(line: &str) -> CvtResult<Transport> {
    if !line.starts_with(TRANSPORT_PREFIX) {
        return Err(CvtError::parse("no transport prefix"));
    }
    let words: Vec<&str> = line.split(' ').collect();
    if words.len() < MIN_TRANSPORT_WORDS {
        return Err(CvtError::parse(
            "not enough arguments in transport line",
        ));
    }

    let mut transport = Transport::new();
    transport.rtype = words[1].to_string();
    if transport.rtype.is_empty() {
        return Err(CvtError::parse("empty transport name"));
    }

    let (address, port) = parse_addr_port(words[2])?;
    transport.address = Some(address);
    transport.port = port;

    if words.len() > MIN_TRANSPORT_WORDS {
        for arg in words[3].split(',') {
            let Some((key, value)) = arg.split_once('=') else {
                return Err(CvtError::parse(format!(
                    "parameter {arg:?} not separated by '='"
                )));
            };
            if key.is_empty() || value.is_empty() {
                return Err(CvtError::parse(format!(
                    "empty key or value in {arg:?}"
                )));
            }
            transport
                .params
                .insert(key.to_string(), value.to_string());
        }
    }
    Ok(transport)
}

/// Split `host:port` or `[v6-host]:port`, requiring a non-zero port.
pub fn parse_addr_port(s: &str) -> CvtResult<(IpAddr, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| CvtError::parse(format!("no port in {s:?}")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let address: IpAddr = host
        .parse()
        .map_err(|e| CvtError::other_src(format!("bad address {host:?}"), e))?;
    let port: u16 = port
        .parse()
        .map_err(|e| CvtError::other_src(format!("bad port {port:?}"), e))?;
    if port == 0 {
        return Err(CvtError::parse("port must be 1-65535"));
    }
    Ok((address, port))
}

/// The merged block- and allowlist: which countries block which
/// fingerprint.
#[derive(Debug, Default)]
pub struct BlockList {
    blocked: HashMap<String, LocationSet>,
}

impl BlockList {
    /// Parse blocklist and allowlist documents. One line per entry:
    /// `<fingerprint> <cc>[,<cc>…]`. Allowlist entries negate blocklist
    /// entries with the same fingerprint and country.
    pub fn parse(block_input: &str, allow_input: &str) -> Self {
        let mut blocked: HashMap<String, LocationSet> = HashMap::new();
        for (fp, cc) in entries(block_input) {
            blocked.entry(fp).or_default().insert(cc);
        }
        for (fp, cc) in entries(allow_input) {
            if let Some(set) = blocked.get_mut(&fp) {
                set.remove(&cc);
            }
        }
        blocked.retain(|_, set| !set.is_empty());
        Self { blocked }
    }

    /// The countries the given fingerprint is blocked in.
    pub fn blocked_in(&self, fingerprint: &str) -> LocationSet {
        self.blocked
            .get(fingerprint)
            .cloned()
            .unwrap_or_default()
    }
}

fn entries(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((fp, countries)) = line.split_once(' ') else {
            tracing::warn!(line, "dropping malformed list entry");
            continue;
        };
        for cc in countries.split(',') {
            let cc = cc.trim().to_lowercase();
            if cc.len() == 2 {
                out.push((fp.to_string(), cc));
            } else {
                tracing::warn!(line, %cc, "dropping bad country code");
            }
        }
    }
    out
}

#[cfg(test)]
mod test;
