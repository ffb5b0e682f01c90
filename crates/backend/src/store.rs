//! JSON persistence for resource types flagged `stored`.
//!
//! One file per type under the storage dir, holding the wire-encoded
//! resources. The wire object feeds the same canonical-line derivation
//! on reload, so uids and oids survive the round trip.

use crate::Config;
use culvert_api::*;
use culvert_core::BackendResources;

fn storage_path(
    config: &Config,
    rtype: &str,
) -> Option<std::path::PathBuf> {
    config
        .backend
        .storage_dir
        .as_ref()
        .map(|dir| dir.join(format!("{rtype}.json")))
}

/// Load every stored type from the storage dir into the collection.
/// Missing files are normal on first start.
pub fn load(config: &Config, resources: &BackendResources) {
    for (rtype, rconf) in &config.backend.resources {
        if !rconf.stored {
            continue;
        }
        let Some(path) = storage_path(config, rtype) else {
            continue;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                continue;
            }
            Err(err) => {
                tracing::warn!(?err, ?path, "cannot read stored resources");
                continue;
            }
        };
        let entries: Vec<serde_json::Value> =
            match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(
                        ?err,
                        ?path,
                        "cannot decode stored resources"
                    );
                    continue;
                }
            };

        let Some(ring) = resources.collection().ring(rtype) else {
            tracing::warn!(%rtype, "stored type not registered, skipping");
            continue;
        };
        let mut loaded = 0_usize;
        for entry in &entries {
            match culvert_resources::decode_resource(rtype, entry) {
                Ok(r) => {
                    // straight onto the ring: nobody is subscribed this
                    // early and nothing here is news
                    let _ = ring.add(r);
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(%err, %rtype, "dropping stored resource")
                }
            }
        }
        tracing::info!(%rtype, loaded, "loaded stored resources");
    }
}

/// Save every stored type to the storage dir.
pub fn save(config: &Config, resources: &BackendResources) {
    for (rtype, rconf) in &config.backend.resources {
        if !rconf.stored {
            continue;
        }
        let Some(path) = storage_path(config, rtype) else {
            continue;
        };
        let Some(ring) = resources.collection().ring(rtype) else {
            continue;
        };

        let entries = ring
            .get_all()
            .iter()
            .filter_map(|r| match r.encode() {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(%err, %rtype, "cannot encode resource");
                    None
                }
            })
            .collect::<Vec<_>>();

        if let Some(dir) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(dir) {
                tracing::warn!(?err, ?dir, "cannot create storage dir");
                continue;
            }
        }
        let body = match serde_json::to_string_pretty(&entries) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(?err, %rtype, "cannot serialize resources");
                continue;
            }
        };
        match std::fs::write(&path, body) {
            Ok(()) => {
                tracing::info!(%rtype, count = entries.len(), ?path, "saved")
            }
            Err(err) => {
                tracing::warn!(?err, ?path, "cannot write stored resources")
            }
        }
    }
}
