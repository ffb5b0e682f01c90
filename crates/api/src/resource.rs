//! The resource trait and resource health types.
//!
//! Everything the backend distributes is a [Resource]: a vanilla bridge,
//! a pluggable-transport endpoint, or a browser-download link. The trait
//! captures the capability set the engine relies on; the concrete types
//! live in the culvert_resources crate.

use crate::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// A set of lowercase ISO-3166-1 alpha-2 country codes.
pub type LocationSet = BTreeSet<String>;

/// The health state of a resource as reported by the external prober.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// The resource has not been probed yet.
    Untested,
    /// The last probe reached the resource.
    Functional,
    /// The last probe failed to reach the resource.
    Dysfunctional,
}

/// The outcome of the most recent health probe of a resource.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TestResult {
    /// The probed state.
    pub status: ResourceStatus,
    /// When the probe ran, if it ever did.
    pub last_tested: Option<Timestamp>,
    /// The probe's error message, if it failed.
    pub error: Option<String>,
}

impl Default for TestResult {
    fn default() -> Self {
        Self {
            status: ResourceStatus::Untested,
            last_tested: None,
            error: None,
        }
    }
}

/// Shared, interior-mutable probe state.
///
/// Resources are held as `Arc<dyn Resource>` once they enter a hashring,
/// while probes complete asynchronously afterwards. Concrete resources
/// embed this cell so a probe can record its outcome into the very value
/// the ring is serving.
#[derive(Clone, Default)]
pub struct TestState(Arc<Mutex<TestResult>>);

impl std::fmt::Debug for TestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.get().fmt(f)
    }
}

impl TestState {
    /// A state that starts out untested.
    pub fn untested() -> Self {
        Self::default()
    }

    /// A state that is considered functional without probing.
    /// Download links get this, there is nothing to dial.
    pub fn functional() -> Self {
        let out = Self::default();
        out.record(ResourceStatus::Functional, None);
        out
    }

    /// Get a copy of the current test result.
    pub fn get(&self) -> TestResult {
        self.0.lock().expect("poisoned test state").clone()
    }

    /// Record a probe outcome, stamping the probe time.
    pub fn record(&self, status: ResourceStatus, error: Option<String>) {
        let mut guard = self.0.lock().expect("poisoned test state");
        guard.status = status;
        guard.last_tested = Some(Timestamp::now());
        guard.error = error;
    }
}

/// The injected health check. The function receives the resource to
/// probe and records the outcome through [Resource::test_state].
pub type TestFunc = Arc<
    dyn for<'a> Fn(&'a dyn Resource) -> BoxFut<'a, ()> + 'static + Send + Sync,
>;

/// A unit the backend distributes.
pub trait Resource: 'static + Send + Sync + std::fmt::Debug {
    /// The stable type tag of this resource, e.g. "vanilla" or "obfs4".
    /// One of the closed set registered at startup.
    fn resource_type(&self) -> &str;

    /// The 64-bit identity used as the hashring key. Two resources with
    /// the same uid denote the same physical asset; the uid is stable
    /// across benign mutations.
    fn uid(&self) -> Hashkey;

    /// The 64-bit content fingerprint. The oid changes iff the
    /// observable content of the resource changed, in which case
    /// subscribers must be told.
    fn oid(&self) -> Hashkey;

    /// The canonical one-line serialization, e.g. a bridge line. Feeds
    /// the oid derivation and is what distributors hand to end users.
    fn canonical(&self) -> String;

    /// How long an unrefreshed incarnation of this resource stays in a
    /// hashring before it is pruned.
    fn expiry(&self) -> std::time::Duration;

    /// The distributor this resource is pinned to, or None if the
    /// stencil is free to assign it.
    fn distributor(&self) -> Option<String>;

    /// The countries this resource is known to be blocked in.
    fn blocked_in(&self) -> LocationSet;

    /// Replace the blocked-in set. Called during assembly, before the
    /// resource is shared with a hashring.
    fn set_blocked_in(&mut self, locations: LocationSet);

    /// Access the shared probe state of this resource.
    fn test_state(&self) -> &TestState;

    /// A copy of the most recent probe outcome.
    fn test_result(&self) -> TestResult {
        self.test_state().get()
    }

    /// Install the injected health check. Called during assembly.
    fn set_test_func(&mut self, f: TestFunc);

    /// Run the injected health check, if one is installed. A resource
    /// submitted before its check was attached stays untested until the
    /// next ingestion cycle re-submits it.
    fn test(&self) -> BoxFut<'_, ()>;

    /// Structural validity: a bridge needs a parseable public address
    /// and a non-zero port. Invalid resources are rejected at ingestion.
    fn is_valid(&self) -> bool;

    /// Whether this resource may be handed to anyone who asks, as
    /// opposed to being rationed through a distributor channel.
    fn is_public(&self) -> bool;

    /// Encode this resource as its wire object.
    fn encode(&self) -> CvtResult<serde_json::Value>;
}

/// Trait-object [Resource].
pub type DynResource = Arc<dyn Resource>;
