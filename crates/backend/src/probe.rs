//! The health-probe client: builds the test function the engine injects
//! into every ingested resource.
//!
//! The engine never tests connectivity itself; it calls whatever this
//! module hands it. The prober is an external service that dials the
//! resource and reports back.

use culvert_api::*;
use std::sync::Arc;

/// The prober imposes this per-call upper bound; a probe never blocks
/// longer, and never blocks a ring either way.
pub const PROBE_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(60);

#[derive(serde::Serialize)]
struct ProbeRequest<'a> {
    #[serde(rename = "type")]
    rtype: &'a str,
    line: &'a str,
}

#[derive(serde::Deserialize)]
struct ProbeResponse {
    functional: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Build the injected test function. Without an endpoint the function
/// does nothing and resources stay untested, which keeps the
/// only-functional gate down and everything distributable.
pub fn test_func(endpoint: Option<String>) -> TestFunc {
    let endpoint = endpoint.map(Arc::<str>::from);

    Arc::new(move |r: &dyn Resource| {
        let Some(endpoint) = endpoint.clone() else {
            return Box::pin(async {});
        };
        let rtype = r.resource_type().to_string();
        let line = r.canonical();
        let state = r.test_state().clone();

        Box::pin(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                probe_once(&endpoint, &rtype, &line)
            })
            .await;

            match outcome {
                Ok(Ok(response)) => {
                    let status = if response.functional {
                        ResourceStatus::Functional
                    } else {
                        ResourceStatus::Dysfunctional
                    };
                    state.record(status, response.error);
                }
                Ok(Err(err)) => {
                    // an unreachable prober says nothing about the
                    // resource; leave the last verdict in place
                    tracing::warn!(%err, "probe failed");
                }
                Err(err) => {
                    tracing::warn!(?err, "probe task failed");
                }
            }
        })
    })
}

fn probe_once(
    endpoint: &str,
    rtype: &str,
    line: &str,
) -> CvtResult<ProbeResponse> {
    let agent = ureq::AgentBuilder::new().timeout(PROBE_TIMEOUT).build();
    let response = agent
        .post(endpoint)
        .send_json(ProbeRequest { rtype, line })
        .map_err(|e| CvtError::other_src("contacting prober", e))?;
    response
        .into_json::<ProbeResponse>()
        .map_err(|e| CvtError::other_src("decoding prober response", e))
}

#[cfg(test)]
mod test {
    use super::*;
    use culvert_core::dummy::Dummy;

    #[tokio::test(flavor = "multi_thread")]
    async fn absent_endpoint_leaves_resources_untested() {
        let mut dummy = Dummy::untested(Hashkey(1), Hashkey(1));
        dummy.set_test_func(test_func(None));
        let dummy = dummy.build();

        dummy.test().await;
        assert_eq!(ResourceStatus::Untested, dummy.test_result().status);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_prober_keeps_the_last_verdict() {
        // nothing listens on this port; the probe must fail without
        // flipping the state to dysfunctional
        let mut dummy = Dummy::untested(Hashkey(1), Hashkey(1));
        dummy.set_test_func(test_func(Some(
            "http://127.0.0.1:9/probe".to_string(),
        )));
        let dummy = dummy.build();

        dummy.test().await;
        assert_eq!(ResourceStatus::Untested, dummy.test_result().status);
    }
}
