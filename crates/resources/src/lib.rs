#![deny(missing_docs)]
//! The concrete resource types culvert distributes, and the closed type
//! registry that maps wire type tags onto them.
//!
//! Identity derivation is the delicate part: the uid must survive benign
//! mutations of a resource while the oid must change with anything a
//! subscriber can observe. The per-type rules live with the types.

use culvert_api::*;

mod bridge;
pub use bridge::*;

mod transport;
pub use transport::*;

mod link;
pub use link::*;

/// Type tag of vanilla bridges.
pub const RESOURCE_TYPE_VANILLA: &str = "vanilla";
/// Type tag of obfs2 pluggable transports.
pub const RESOURCE_TYPE_OBFS2: &str = "obfs2";
/// Type tag of obfs3 pluggable transports.
pub const RESOURCE_TYPE_OBFS3: &str = "obfs3";
/// Type tag of obfs4 pluggable transports.
pub const RESOURCE_TYPE_OBFS4: &str = "obfs4";
/// Type tag of scramblesuit pluggable transports.
pub const RESOURCE_TYPE_SCRAMBLESUIT: &str = "scramblesuit";
/// Type tag of meek pluggable transports.
pub const RESOURCE_TYPE_MEEK: &str = "meek";
/// Type tag of snowflake pluggable transports.
pub const RESOURCE_TYPE_SNOWFLAKE: &str = "snowflake";
/// Type tag of websocket pluggable transports.
pub const RESOURCE_TYPE_WEBSOCKET: &str = "websocket";
/// Type tag of fte pluggable transports.
pub const RESOURCE_TYPE_FTE: &str = "fte";
/// Type tag of httpt pluggable transports.
pub const RESOURCE_TYPE_HTTPT: &str = "httpt";
/// Type tag of i2p pluggable transports.
pub const RESOURCE_TYPE_I2P: &str = "i2p";
/// Type tag of browser-download links.
pub const RESOURCE_TYPE_TBLINK: &str = "tblink";

/// The pluggable-transport type tags.
pub const TRANSPORT_TYPES: &[&str] = &[
    RESOURCE_TYPE_OBFS2,
    RESOURCE_TYPE_OBFS3,
    RESOURCE_TYPE_OBFS4,
    RESOURCE_TYPE_SCRAMBLESUIT,
    RESOURCE_TYPE_MEEK,
    RESOURCE_TYPE_SNOWFLAKE,
    RESOURCE_TYPE_WEBSOCKET,
    RESOURCE_TYPE_FTE,
    RESOURCE_TYPE_HTTPT,
    RESOURCE_TYPE_I2P,
];

/// True if the given tag belongs to the closed type registry.
pub fn is_known_type(rtype: &str) -> bool {
    rtype == RESOURCE_TYPE_VANILLA
        || rtype == RESOURCE_TYPE_TBLINK
        || TRANSPORT_TYPES.contains(&rtype)
}

/// Decode a wire resource object into the concrete type registered for
/// the given tag. The tag is authoritative: it picks the Rust type and
/// is written back into the decoded value.
pub fn decode_resource(
    rtype: &str,
    value: &serde_json::Value,
) -> CvtResult<DynResource> {
    let err =
        |e: serde_json::Error| CvtError::other_src("decoding resource", e);

    if rtype == RESOURCE_TYPE_VANILLA {
        let mut bridge: Bridge =
            serde_json::from_value(value.clone()).map_err(err)?;
        bridge.rtype = RESOURCE_TYPE_VANILLA.to_string();
        Ok(std::sync::Arc::new(bridge))
    } else if rtype == RESOURCE_TYPE_TBLINK {
        let mut link: BrowserLink =
            serde_json::from_value(value.clone()).map_err(err)?;
        link.rtype = RESOURCE_TYPE_TBLINK.to_string();
        Ok(std::sync::Arc::new(link))
    } else if TRANSPORT_TYPES.contains(&rtype) {
        let mut transport: Transport =
            serde_json::from_value(value.clone()).map_err(err)?;
        transport.rtype = rtype.to_string();
        Ok(std::sync::Arc::new(transport))
    } else {
        Err(CvtError::parse(format!("unknown resource type {rtype:?}")))
    }
}

/// Decode a wire diff `{"new": {<type>: [..]}, "changed": .., "gone": ..}`
/// into a [ResourceDiff]. Entries of unknown type fail the decode.
pub fn decode_diff(value: &serde_json::Value) -> CvtResult<ResourceDiff> {
    let decode_map = |key: &str| -> CvtResult<ResourceMap> {
        let mut out = ResourceMap::new();
        let Some(rmap) = value.get(key) else {
            return Ok(out);
        };
        let Some(rmap) = rmap.as_object() else {
            return Err(CvtError::parse(format!("diff {key:?} not an object")));
        };
        for (rtype, entries) in rmap {
            let Some(entries) = entries.as_array() else {
                return Err(CvtError::parse(format!(
                    "diff entries for {rtype:?} not an array"
                )));
            };
            let resources = entries
                .iter()
                .map(|v| decode_resource(rtype, v))
                .collect::<CvtResult<Vec<_>>>()?;
            out.insert(rtype.clone(), resources);
        }
        Ok(out)
    };

    Ok(ResourceDiff {
        new: decode_map("new")?,
        changed: decode_map("changed")?,
        gone: decode_map("gone")?,
    })
}
