//! Backend configuration loading and validation.

use culvert_api::*;
use culvert_core::Collection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_update_interval_s() -> u64 {
    30 * 60
}

/// The central configuration file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// The backend section. Distributor front-ends carry their own
    /// sections in their own deployments.
    pub backend: BackendConfig,
}

/// Configuration of the backend proper.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackendConfig {
    /// The cached extra-info document. Its rotated companion is derived
    /// by appending ".new".
    pub extrainfo_file: PathBuf,

    /// The network-status document enumerating advertised relays.
    pub networkstatus_file: PathBuf,

    /// The descriptors document carrying bridge-distribution-request
    /// lines.
    pub descriptors_file: PathBuf,

    /// Fingerprint-to-country blocklist, one entry per line.
    #[serde(default)]
    pub blocklist_file: Option<PathBuf>,

    /// Allowlist entries negate blocklist entries with the same
    /// fingerprint and country.
    #[serde(default)]
    pub allowlist_file: Option<PathBuf>,

    /// Where resource types flagged `stored` are persisted across
    /// restarts.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// The bridge-pool assignments log, appended once per ingestion
    /// cycle.
    #[serde(default)]
    pub assignments_file: Option<PathBuf>,

    /// The external health prober. Absent means resources stay
    /// untested.
    #[serde(default)]
    pub prober_endpoint: Option<String>,

    /// Per-distributor bearer tokens for the snapshot and stream api.
    pub api_tokens: HashMap<String, String>,

    /// The share of resources each distributor gets. If https is set to
    /// x and moat to y, https gets x/(x+y) of every partitioned type.
    pub distribution_proportions: HashMap<String, u32>,

    /// The resource type registry.
    pub resources: HashMap<String, ResourceConfig>,

    /// The distributor-facing web api.
    pub web_api: WebApiConfig,

    /// Seconds between ingestion cycles.
    #[serde(default = "default_update_interval_s")]
    pub update_interval_s: u64,
}

/// Per-resource-type configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceConfig {
    /// Unpartitioned types are shared by every distributor instead of
    /// being split by a stencil.
    #[serde(default)]
    pub unpartitioned: bool,

    /// Stored types survive restarts via the storage dir.
    #[serde(default)]
    pub stored: bool,

    /// Restrict this type to a subset of the configured distributors.
    /// Empty means all of them.
    #[serde(default)]
    pub distributors: Vec<String>,
}

/// Where and how the web api listens.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebApiConfig {
    /// The listen address.
    pub api_address: std::net::SocketAddr,

    /// TLS certificate path. The reference deployment terminates TLS in
    /// a fronting proxy; kept for parity.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// TLS key path, see cert_file.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl Config {
    /// Load the given JSON configuration file. The file carries api
    /// tokens, so it must not be readable by anyone but the operator.
    pub fn load(path: &Path) -> CvtResult<Self> {
        tracing::info!(?path, "loading configuration");

        let meta = std::fs::metadata(path)
            .map_err(|e| CvtError::other_src("reading config", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CvtError::config(format!(
                    "{path:?} contains secrets and must have 0600 \
                     permissions, has {mode:o}"
                )));
            }
        }
        #[cfg(not(unix))]
        let _ = meta;

        let content = std::fs::read_to_string(path)
            .map_err(|e| CvtError::other_src("reading config", e))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CvtError::other_src("decoding config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-references the serde layer cannot.
    pub fn validate(&self) -> CvtResult<()> {
        let b = &self.backend;
        if b.distribution_proportions.is_empty() {
            return Err(CvtError::config("empty distribution_proportions"));
        }
        for (rtype, rconf) in &b.resources {
            for dist in &rconf.distributors {
                if !b.distribution_proportions.contains_key(dist) {
                    return Err(CvtError::config(format!(
                        "resource {rtype:?} references distributor \
                         {dist:?} missing from distribution_proportions"
                    )));
                }
            }
        }
        if let Some(endpoint) = &b.prober_endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                CvtError::other_src("invalid prober_endpoint", e)
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CvtError::config(format!(
                    "prober_endpoint {endpoint:?} is not http(s)"
                )));
            }
        }
        Ok(())
    }

    /// Build the typed collection this configuration describes.
    /// Partitioned types restricted to a distributor subset get a
    /// stencil over that subset only.
    pub fn build_collection(&self) -> Collection {
        let b = &self.backend;
        let mut collection = Collection::new();
        for (rtype, rconf) in &b.resources {
            let proportions: HashMap<String, u32> =
                if rconf.distributors.is_empty() {
                    b.distribution_proportions.clone()
                } else {
                    b.distribution_proportions
                        .iter()
                        .filter(|(name, _)| {
                            rconf.distributors.contains(name)
                        })
                        .map(|(name, weight)| (name.clone(), *weight))
                        .collect()
                };
            collection.add_resource_type(
                rtype,
                rconf.unpartitioned,
                &proportions,
            );
        }
        collection
    }

    /// The distributor names a bridge-distribution-request may name:
    /// every configured distributor, plus the "none" sentinel.
    pub fn known_distributors(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .backend
            .distribution_proportions
            .keys()
            .cloned()
            .collect();
        out.push("none".to_string());
        out.sort();
        out
    }

    /// A config pointing into the given directory, suitable for tests.
    pub fn testing(dir: &Path) -> Self {
        Self {
            backend: BackendConfig {
                extrainfo_file: dir.join("cached-extrainfo"),
                networkstatus_file: dir.join("networkstatus-bridges"),
                descriptors_file: dir.join("bridge-descriptors"),
                blocklist_file: None,
                allowlist_file: None,
                storage_dir: Some(dir.join("storage")),
                assignments_file: Some(dir.join("assignments.log")),
                prober_endpoint: None,
                api_tokens: [(
                    "https".to_string(),
                    "test-token".to_string(),
                )]
                .into_iter()
                .collect(),
                distribution_proportions: [
                    ("https".to_string(), 1),
                    ("moat".to_string(), 1),
                ]
                .into_iter()
                .collect(),
                resources: [
                    (
                        "vanilla".to_string(),
                        ResourceConfig {
                            stored: true,
                            ..Default::default()
                        },
                    ),
                    ("obfs4".to_string(), ResourceConfig::default()),
                    (
                        "tblink".to_string(),
                        ResourceConfig {
                            unpartitioned: true,
                            ..Default::default()
                        },
                    ),
                ]
                .into_iter()
                .collect(),
                web_api: WebApiConfig {
                    api_address: (std::net::Ipv4Addr::LOCALHOST, 0).into(),
                    cert_file: None,
                    key_file: None,
                },
                update_interval_s: default_update_interval_s(),
            },
        }
    }
}
