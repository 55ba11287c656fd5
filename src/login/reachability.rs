use std::time::Duration;
use tracing::debug;

/// Advisory liveness probe for a remote server.
///
/// Any failure (connection error, timeout, bad URL, non-2xx status) reads as
/// unreachable.
#[derive(Debug, Clone)]
pub struct Reachability {
    client: reqwest::Client,
    timeout: Duration,
}

impl Reachability {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub async fn probe(&self, url: &str) -> bool {
        debug!(url = %url, "Probing remote reachability");
        let result = self.client.get(url).timeout(self.timeout).send().await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "Remote is reachable");
                true
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Remote answered with an error status");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Remote is not reachable");
                false
            }
        }
    }
}
