//! Fire-and-forget analytics events.
//!
//! Certain anomalies (a request with no Host header, a hostname that
//! never resolves) are worth reporting to an external sink for later
//! investigation. Delivery happens on a detached task; failures are
//! logged and dropped.

use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProxyEvent<'a> {
    event: &'a str,
    detail: &'a str,
}

/// Posts analytics events to the configured sink, if any.
#[derive(Debug, Clone)]
pub struct EventReporter {
    endpoint: Option<Arc<str>>,
    client: reqwest::Client,
}

impl EventReporter {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.map(Arc::from),
            client: reqwest::Client::new(),
        }
    }

    /// Queue one event. Returns immediately; delivery happens on a
    /// spawned task and never affects the calling request.
    pub fn fire(&self, event: &'static str, detail: String) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            let payload = ProxyEvent {
                event,
                detail: &detail,
            };
            match client.post(endpoint.as_ref()).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::debug!(
                        event,
                        status = response.status().as_u16(),
                        "Event sink rejected event"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(event, error = %e, "Event delivery failed");
                }
            }
        });
    }
}
