//! Distributor-side resource requests.

/// A request for resources that a distributor sends to the backend, for
/// both the one-shot snapshot endpoint and the long-lived stream.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceRequest {
    /// The name of the requesting distributor.
    pub request_origin: String,

    /// The resource types the distributor wants to be told about.
    pub resource_types: Vec<String>,
}

impl ResourceRequest {
    /// Construct a new request.
    pub fn new(origin: impl Into<String>, types: Vec<String>) -> Self {
        Self {
            request_origin: origin.into(),
            resource_types: types,
        }
    }

    /// Does this request ask for the given resource type?
    pub fn has_resource_type(&self, rtype: &str) -> bool {
        self.resource_types.iter().any(|t| t == rtype)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn has_resource_type() {
        let req = ResourceRequest::new(
            "settings",
            vec!["obfs4".into(), "vanilla".into()],
        );
        assert!(req.has_resource_type("obfs4"));
        assert!(req.has_resource_type("vanilla"));
        assert!(!req.has_resource_type("snowflake"));
    }

    #[test]
    fn request_serde_roundtrip() {
        let req = ResourceRequest::new("https", vec!["obfs4".into()]);
        let enc = serde_json::to_string(&req).unwrap();
        assert_eq!(
            r#"{"request_origin":"https","resource_types":["obfs4"]}"#,
            enc,
        );
        let dec: ResourceRequest = serde_json::from_str(&enc).unwrap();
        assert_eq!("https", dec.request_origin);
        assert_eq!(vec!["obfs4".to_string()], dec.resource_types);
    }
}
