//! A simple [Resource] implementation used in unit tests, here and in
//! the crates layering on top of the engine.

use culvert_api::*;
use std::sync::Arc;

/// A minimal resource with directly settable uid, oid and expiry.
pub struct Dummy {
    /// The object id to report.
    pub object_id: Hashkey,
    /// The unique id to report.
    pub unique_id: Hashkey,
    /// The expiry to report.
    pub expiry_time: std::time::Duration,
    /// The pinned distributor, if any.
    pub distribution: Option<String>,
    /// The blocked-in set to report.
    pub blocked: LocationSet,
    state: TestState,
    test_func: Option<TestFunc>,
}

impl std::fmt::Debug for Dummy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dummy")
            .field("unique_id", &self.unique_id)
            .field("object_id", &self.object_id)
            .finish()
    }
}

impl Dummy {
    /// Construct a new dummy resource. It starts out functional so the
    /// only-functional gate does not hide it from test assertions.
    pub fn new(oid: Hashkey, uid: Hashkey) -> Self {
        Self {
            object_id: oid,
            unique_id: uid,
            expiry_time: std::time::Duration::from_secs(60 * 60),
            distribution: None,
            blocked: LocationSet::new(),
            state: TestState::functional(),
            test_func: None,
        }
    }

    /// A dummy that has not been probed yet.
    pub fn untested(oid: Hashkey, uid: Hashkey) -> Self {
        let mut out = Self::new(oid, uid);
        out.state = TestState::untested();
        out
    }

    /// The same dummy, wrapped for a hashring.
    pub fn build(self) -> DynResource {
        Arc::new(self)
    }
}

impl Resource for Dummy {
    fn resource_type(&self) -> &str {
        "dummy"
    }

    fn uid(&self) -> Hashkey {
        self.unique_id
    }

    fn oid(&self) -> Hashkey {
        self.object_id
    }

    fn canonical(&self) -> String {
        format!("dummy-{}-{}", self.unique_id, self.object_id)
    }

    fn expiry(&self) -> std::time::Duration {
        self.expiry_time
    }

    fn distributor(&self) -> Option<String> {
        self.distribution.clone()
    }

    fn blocked_in(&self) -> LocationSet {
        self.blocked.clone()
    }

    fn set_blocked_in(&mut self, locations: LocationSet) {
        self.blocked = locations;
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
        true
    }

    fn is_public(&self) -> bool {
        false
    }

    fn encode(&self) -> CvtResult<serde_json::Value> {
        Ok(serde_json::json!({
            "type": self.resource_type(),
            "uid": self.unique_id,
            "oid": self.object_id,
        }))
    }
}
