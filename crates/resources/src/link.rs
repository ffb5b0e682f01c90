//! Browser-download links: where to fetch a censorship-circumvention
//! browser build for a given locale and platform.

use crate::RESOURCE_TYPE_TBLINK;
use culvert_api::*;

/// Links older than a year are stale, a newer build has long been
/// released by then.
pub const LINK_EXPIRY: std::time::Duration =
    std::time::Duration::from_secs(365 * 24 * 60 * 60);

/// A browser release version. The "mayor" spelling is fixed by the wire
/// format.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Version {
    /// Major version component.
    pub mayor: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.mayor, self.minor, self.patch)
    }
}

impl std::str::FromStr for Version {
    type Err = CvtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = Version::default();
        let mut parts = s.split('.');
        let bad = |e: std::num::ParseIntError| {
            CvtError::other_src(format!("invalid version {s:?}"), e)
        };
        out.mayor = parts
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(bad)?;
        if let Some(minor) = parts.next() {
            out.minor = minor.parse().map_err(bad)?;
        }
        if let Some(patch) = parts.next() {
            out.patch = patch.parse().map_err(bad)?;
        }
        Ok(out)
    }
}

/// A link to download a browser build with a certain locale for a
/// certain platform.
///
/// Links are public, considered functional without probing, and carry
/// `uid == oid`: the URL is both the identity and the content. An
/// updater that replaces a build republishes under a new URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BrowserLink {
    /// The type tag, always "tblink".
    #[serde(rename = "type")]
    pub rtype: String,
    /// The build's locale, e.g. "en-US".
    pub locale: String,
    /// The build's platform, e.g. "linux64".
    pub platform: String,
    /// The build's version.
    pub version: Version,
    /// The hosting back-end this link points into.
    pub provider: String,
    /// The name of the downloadable file.
    pub file_name: String,
    /// The download URL.
    pub link: String,
    /// The URL of the detached signature.
    pub sig_link: String,
    /// Overrides the URL-derived oid, for providers whose URLs are not
    /// stable across re-uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_oid: Option<Hashkey>,
    /// Overrides the default expiry, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_expiry_s: Option<u64>,
    /// Countries this provider is known to be blocked in.
    #[serde(rename = "blocked-in", default)]
    pub blocked_in: LocationSet,
    #[serde(skip, default = "TestState::functional")]
    state: TestState,
}

impl Default for BrowserLink {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserLink {
    /// A new, empty browser-download link.
    pub fn new() -> Self {
        Self {
            rtype: RESOURCE_TYPE_TBLINK.to_string(),
            locale: String::new(),
            platform: String::new(),
            version: Version::default(),
            provider: String::new(),
            file_name: String::new(),
            link: String::new(),
            sig_link: String::new(),
            custom_oid: None,
            custom_expiry_s: None,
            blocked_in: LocationSet::new(),
            state: TestState::functional(),
        }
    }
}

impl Resource for BrowserLink {
    fn resource_type(&self) -> &str {
        &self.rtype
    }

    fn uid(&self) -> Hashkey {
        self.oid()
    }

    fn oid(&self) -> Hashkey {
        match self.custom_oid {
            Some(oid) => oid,
            None => Hashkey::compute(&self.link),
        }
    }

    fn canonical(&self) -> String {
        self.link.clone()
    }

    fn expiry(&self) -> std::time::Duration {
        match self.custom_expiry_s {
            Some(secs) => std::time::Duration::from_secs(secs),
            None => LINK_EXPIRY,
        }
    }

    fn distributor(&self) -> Option<String> {
        None
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

    fn set_test_func(&mut self, _f: TestFunc) {}

    fn test(&self) -> BoxFut<'_, ()> {
        // nothing to dial, links are taken at face value
        Box::pin(async {})
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn is_public(&self) -> bool {
        true
    }

    fn encode(&self) -> CvtResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| CvtError::other_src("encoding link", e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn link() -> BrowserLink {
        let mut l = BrowserLink::new();
        l.locale = "en-US".into();
        l.platform = "linux64".into();
        l.version = "13.0.5".parse().unwrap();
        l.provider = "archive".into();
        l.file_name = "browser-13.0.5.tar.xz".into();
        l.link = "https://example.org/tb.tar.xz".into();
        l.sig_link = "https://example.org/tb.tar.xz.asc".into();
        l
    }

    #[test]
    fn uid_equals_oid_equals_link_hash() {
        let l = link();
        assert_eq!(l.uid(), l.oid());
        assert_eq!(Hashkey(0x808dfb1d787fee3a), l.uid());
    }

    #[test]
    fn custom_oid_takes_precedence() {
        let mut l = link();
        l.custom_oid = Some(Hashkey(42));
        assert_eq!(Hashkey(42), l.oid());
        assert_eq!(Hashkey(42), l.uid());
    }

    #[test]
    fn links_are_functional_without_probing() {
        assert_eq!(
            ResourceStatus::Functional,
            link().test_result().status,
        );
        assert!(link().is_public());
        assert!(link().is_valid());
    }

    #[test]
    fn version_ordering_and_parsing() {
        let v: Version = "13.5".parse().unwrap();
        assert_eq!(
            Version {
                mayor: 13,
                minor: 5,
                patch: 0
            },
            v,
        );
        assert_eq!("13.5.0", v.to_string());

        let newer: Version = "13.5.1".parse().unwrap();
        assert!(newer > v);
        assert!("13".parse::<Version>().unwrap() < v);
        assert!("garbage".parse::<Version>().is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let l = link();
        let wire = l.encode().unwrap();
        assert_eq!("tblink", wire["type"]);
        assert_eq!(13, wire["version"]["mayor"]);
        assert_eq!("browser-13.0.5.tar.xz", wire["file_name"]);

        let back: BrowserLink = serde_json::from_value(wire).unwrap();
        assert_eq!(l.uid(), back.uid());
        // deserialized links start functional too
        assert_eq!(
            ResourceStatus::Functional,
            back.test_result().status,
        );
    }
}
