use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use super::validator::CredentialsValidator;
use crate::online::OnlineMonitor;

/// Startup determination of connectivity and saved-login validity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialState {
    pub authorized: bool,
    pub is_online: bool,
}

/// Decide the starting session state.
///
/// Never fails: a broken credential lookup reads as "no credentials" and every
/// validation error reads as "not authorized".
pub async fn resolve_initial_state(
    online: &OnlineMonitor,
    credentials: &CredentialStore,
    validator: &CredentialsValidator,
) -> InitialState {
    let is_online = online.is_online();

    let saved = match credentials.load() {
        Ok(saved) => saved,
        Err(e) => {
            warn!(error = %e, "Failed to load saved credentials, treating as none");
            None
        }
    };

    let authorized = match saved {
        Some(ref saved) if is_online => {
            debug!("Online with saved credentials, checking authorization");
            match validator.validate(Some(saved)).await {
                Ok(()) => true,
                Err(e) => {
                    info!(error = %e, "Saved credentials are not usable");
                    false
                }
            }
        }
        _ => {
            debug!(
                is_online,
                has_credentials = saved.is_some(),
                "Skipping authorization check"
            );
            false
        }
    };

    let state = InitialState {
        authorized,
        is_online,
    };
    info!(is_online, authorized, "Resolved initial login state");
    state
}
