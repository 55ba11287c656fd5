//! Login lifecycle: saved credentials, remote validation, initial state
//! resolution, and the session state machine.

pub mod credentials;
pub mod initial;
pub mod reachability;
pub mod session;
pub mod validator;

pub use credentials::{CredentialStore, CredentialStoreError, Credentials};
pub use initial::{resolve_initial_state, InitialState};
pub use reachability::Reachability;
pub use session::{ConnectionStatus, LoginError, SessionService, SessionState};
pub use validator::{CredentialsValidator, ValidationError};
